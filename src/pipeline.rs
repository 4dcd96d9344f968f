//! End-to-end orchestration of the analysis pipeline
//!
//! One function wires the stages together in their dependency order:
//! parse → normalize → PTS → global threshold/periods → both regular
//! chains → labeled chain → decision. Every stage logs its own progress;
//! this module only adds the start/end markers.

use tracing::info;

use crate::lmc::Lmc;
use crate::parser;
use crate::pts::Pts;
use crate::rmc::{Direction, Rmc};
use crate::transform;
use crate::{AnalysisError, Verdict};

/// Run the whole termination analysis on one program text.
pub fn analyze_source(source: &str) -> Result<Verdict, AnalysisError> {
    info!("starting core analysis");
    let (mut program, mut table, annotation) = parser::parse(source)?;
    transform::normalize(&mut program, &mut table, annotation)?;

    let pts = Pts::build(&program)?;
    let (threshold, period_pos, period_neg) = pts.threshold_and_periods()?;

    let forward = Rmc::new(&pts, Direction::Forward, threshold, period_pos);
    let backward = Rmc::new(&pts, Direction::Backward, threshold, period_neg);
    let lmc = Lmc::new(&pts, threshold, &forward, &backward)?;

    let verdict = lmc.decide();
    info!(ast = verdict.ast, past = verdict.past, "core analysis completed");
    Ok(verdict)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(src: &str) -> Verdict {
        analyze_source(src).unwrap()
    }

    fn assert_verdict(src: &str, ast: bool, past: bool) {
        assert_eq!(verdict(src), Verdict { ast, past }, "program: {src}");
    }

    #[test]
    fn symmetric_random_walk_is_ast_but_not_past() {
        assert_verdict(
            "int x = 1;\nwhile (x > 0) { { x := x + 1 } [1/2] { x := x - 1 } }",
            true,
            false,
        );
    }

    #[test]
    fn upward_biased_walk_diverges() {
        assert_verdict(
            "int x = 1;\nwhile (x > 0) { { x := x + 1 } [2/3] { x := x - 1 } }",
            false,
            false,
        );
    }

    #[test]
    fn downward_biased_walk_terminates_positively() {
        assert_verdict(
            "int x = 1;\nwhile (x > 0) { { x := x - 1 } [2/3] { x := x + 1 } }",
            true,
            true,
        );
    }

    #[test]
    fn deterministic_countdown_terminates_positively() {
        assert_verdict("int x = 10;\nwhile (x > 0) { x := x - 1 }", true, true);
    }

    #[test]
    fn monotone_nondecreasing_loop_never_terminates() {
        assert_verdict(
            "int x = 0;\nwhile (x >= 0) { { x := x + 1 } [1/2] { skip } }",
            false,
            false,
        );
    }

    #[test]
    fn bounded_two_dimensional_walk_terminates() {
        assert_verdict(
            "/*@ Bounded, [x, 0, 3], [y, 0, 3] @*/
             int x = 1; int y = 1;
             while (x > 0) {
                 if (y > 2) { y := y - 1 } else { { x := x - 1 } [1/2] { y := y + 1 } }
             }",
            true,
            true,
        );
    }

    #[test]
    fn parity_countdown_exercises_periods() {
        assert_verdict(
            "int x = 4;\nwhile (MOD(x, 2) = 0 and x > 0) { x := x - 2 }",
            true,
            true,
        );
    }

    #[test]
    fn conditionally_bounded_countdown_terminates() {
        assert_verdict(
            "/*@ CondBounded, c, [v, 1, 1, 0, 1] @*/
             int c = 3; int v = 3;
             while (c > 0 and v > 0) { c := c - 1; v := v - 1 }",
            true,
            true,
        );
    }

    #[test]
    fn immediate_exit_terminates() {
        assert_verdict("int x = 0;\nwhile (x > 0) { x := x - 1 }", true, true);
    }

    #[test]
    fn negative_initial_value_walks_back_to_zero() {
        assert_verdict("int x = -4;\nwhile (x < 0) { x := x + 1 }", true, true);
    }

    #[test]
    fn unclassified_programs_are_reported() {
        let err = analyze_source(
            "int x = 1; int c = 1;
             while (x > 0 and c > 0) { x := x + 1; x := x - 1; c := c - 1; c := c + 1 }",
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Transform(_)));
    }

    #[test]
    fn parse_errors_are_reported() {
        let err = analyze_source("int x = 1;\nwhile (x > 0) { x := }").unwrap_err();
        assert!(matches!(err, AnalysisError::Parse(_)));
    }

    #[test]
    fn constant_two_counter_race_terminates() {
        // z = x + y decreases by one per iteration whichever branch runs.
        assert_verdict(
            "int x = 2; int y = 2;\nwhile (x + y > 0) { { x := x - 1 } [1/2] { y := y - 1 } }",
            true,
            true,
        );
    }
}
