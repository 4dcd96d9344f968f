//! Probabilistic transition system builder
//!
//! Lowers a normalized 1-d program into a control-flow graph whose arcs
//! carry a guard over the counter, an exact rational probability, and a
//! counter update in `{-1, 0, +1}`.
//!
//! ## Invariants
//!
//! - For every state `u` and counter value `x`, the probabilities of the
//!   outgoing arcs whose guards hold at `x` sum to exactly 1.
//! - Runs of consecutive assignments are coalesced into one signed update
//!   and expanded into `|u|` unit-step states, so every arc moves the
//!   counter by at most one.
//! - State `0` is the program entry; the last-added state is the terminal,
//!   whose only arcs are three self-loops driving the counter monotonically
//!   to 0 (`x>0 ⇒ -1`, `x<0 ⇒ +1`, `x=0 ⇒ 0`).
//!
//! The recursive lowering communicates through small *exit records*: a
//! pending arc `(source, guard, probability, update)` that the parent welds
//! into whatever state comes next. This is how the cyclic `while` wiring is
//! expressed without back-patching the graph.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use num_traits::One;
use tracing::info;

use crate::guard::GuardExpr;
use crate::program::{is_effectively_empty, Guard, Program, Stmt};
use crate::symbolic::{CmpOp, Expr, Pred, SymbolicError};
use crate::{Rat, StateId};

/// Failures while lowering the syntax tree.
#[derive(Debug, thiserror::Error)]
pub enum PtsError {
    #[error("malformed syntax tree: {0}")]
    MalformedAst(String),
    #[error("guard `{0}` does not range over the counter alone")]
    UnsupportedArity(String),
}

/// Label attached to each PTS state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StateLabel {
    Assign,
    While,
    If,
    Choice,
    Empty,
    Terminal,
}

/// One guarded probabilistic arc.
#[derive(Clone, Debug)]
pub struct Transition {
    pub guard: GuardExpr,
    pub prob: Rat,
    /// Counter update, always in `{-1, 0, +1}`.
    pub delta: i64,
}

/// A state of the induced Markov chain: control state plus counter value.
pub type McState = (StateId, i64);

/// The compiled transition system. Immutable once built.
#[derive(Debug)]
pub struct Pts {
    var_name: String,
    init_val: i64,
    labels: Vec<StateLabel>,
    transitions: BTreeMap<(StateId, StateId), Vec<Transition>>,
    non_trivial_guards: Vec<GuardExpr>,
}

/// A pending arc produced by a lowered block, welded by the parent.
struct ExitRecord {
    from: StateId,
    guard: GuardExpr,
    prob: Rat,
    delta: i64,
}

struct Builder<'p> {
    var_name: &'p str,
    labels: Vec<StateLabel>,
    transitions: BTreeMap<(StateId, StateId), Vec<Transition>>,
    non_trivial_guards: Vec<GuardExpr>,
}

impl<'p> Builder<'p> {
    fn add_state(&mut self, label: StateLabel) -> StateId {
        self.labels.push(label);
        StateId(self.labels.len() - 1)
    }

    fn add_transition(
        &mut self,
        from: StateId,
        to: StateId,
        guard: GuardExpr,
        prob: Rat,
        delta: i64,
    ) -> Result<(), PtsError> {
        match guard.var() {
            Some(v) if v != self.var_name => {
                return Err(PtsError::UnsupportedArity(guard.to_string()))
            }
            None if guard.free_var_count() > 1 => {
                return Err(PtsError::UnsupportedArity(guard.to_string()))
            }
            _ => {}
        }
        if !guard.is_trivial() {
            self.non_trivial_guards.push(guard.clone());
        }
        self.transitions
            .entry((from, to))
            .or_default()
            .push(Transition { guard, prob, delta });
        Ok(())
    }

    fn weld(&mut self, exit: ExitRecord, entry: StateId) -> Result<(), PtsError> {
        self.add_transition(exit.from, entry, exit.guard, exit.prob, exit.delta)
    }

    fn resolve_guard(&self, guard: &Guard) -> Result<GuardExpr, PtsError> {
        match guard {
            Guard::Expr(g) => Ok(g.clone()),
            Guard::Label(i) => Err(PtsError::MalformedAst(format!(
                "guard label {i} was never bound"
            ))),
        }
    }

    /// Lower a statement list; returns its exit records and entry state.
    fn build_block(&mut self, stmts: &[Stmt]) -> Result<(Vec<ExitRecord>, StateId), PtsError> {
        if stmts.is_empty() {
            let s = self.add_state(StateLabel::Empty);
            let exit = ExitRecord {
                from: s,
                guard: GuardExpr::truth(),
                prob: Rat::one(),
                delta: 0,
            };
            return Ok((vec![exit], s));
        }

        let mut merged_exits: Vec<Vec<ExitRecord>> = Vec::new();
        let mut merged_entries: Vec<StateId> = Vec::new();
        let mut i = 0;
        while i < stmts.len() {
            match &stmts[i] {
                Stmt::Assign { .. } => {
                    let mut update = 0i64;
                    while let Some(Stmt::Assign { delta, .. }) = stmts.get(i) {
                        update += *delta;
                        i += 1;
                    }
                    if update == 0 {
                        continue; // the run cancels out entirely
                    }
                    let (exits, entry) = self.build_assign_group(update);
                    merged_exits.push(exits);
                    merged_entries.push(entry);
                }
                Stmt::Skip => {
                    i += 1;
                }
                other => {
                    let (exits, entry) = self.build_stmt(other)?;
                    i += 1;
                    merged_exits.push(exits);
                    merged_entries.push(entry);
                }
            }
        }

        if merged_entries.is_empty() {
            return self.build_block(&[]);
        }
        for k in 1..merged_entries.len() {
            let exits = std::mem::take(&mut merged_exits[k - 1]);
            for exit in exits {
                self.weld(exit, merged_entries[k])?;
            }
        }
        let final_exits = merged_exits.pop().unwrap_or_default();
        Ok((final_exits, merged_entries[0]))
    }

    /// Expand a coalesced assignment run into `|update|` unit-step states.
    fn build_assign_group(&mut self, update: i64) -> (Vec<ExitRecord>, StateId) {
        let sign = update.signum();
        let first = self.add_state(StateLabel::Assign);
        let mut last_exit = ExitRecord {
            from: first,
            guard: GuardExpr::truth(),
            prob: Rat::one(),
            delta: sign,
        };
        for _ in 1..update.abs() {
            let s = self.add_state(StateLabel::Assign);
            // Welding cannot fail here: the guard is trivially true.
            let _ = self.weld(last_exit, s);
            last_exit = ExitRecord {
                from: s,
                guard: GuardExpr::truth(),
                prob: Rat::one(),
                delta: sign,
            };
        }
        (vec![last_exit], first)
    }

    fn build_stmt(&mut self, stmt: &Stmt) -> Result<(Vec<ExitRecord>, StateId), PtsError> {
        match stmt {
            Stmt::While { guard, body } => {
                let s = self.add_state(StateLabel::While);
                let g = self.resolve_guard(guard)?;
                let exits = vec![ExitRecord {
                    from: s,
                    guard: g.negate(),
                    prob: Rat::one(),
                    delta: 0,
                }];
                if is_effectively_empty(body) {
                    self.add_transition(s, s, g, Rat::one(), 0)?;
                } else {
                    let (body_exits, body_entry) = self.build_block(body)?;
                    self.add_transition(s, body_entry, g, Rat::one(), 0)?;
                    for exit in body_exits {
                        self.weld(exit, s)?;
                    }
                }
                Ok((exits, s))
            }
            Stmt::If {
                guard,
                then_branch,
                else_branch,
            } => {
                let s = self.add_state(StateLabel::If);
                let g = self.resolve_guard(guard)?;
                let neg = g.negate();
                let mut exits = Vec::new();
                if is_effectively_empty(then_branch) {
                    exits.push(ExitRecord {
                        from: s,
                        guard: g,
                        prob: Rat::one(),
                        delta: 0,
                    });
                } else {
                    let (branch_exits, entry) = self.build_block(then_branch)?;
                    self.add_transition(s, entry, g, Rat::one(), 0)?;
                    exits.extend(branch_exits);
                }
                if is_effectively_empty(else_branch) {
                    exits.push(ExitRecord {
                        from: s,
                        guard: neg,
                        prob: Rat::one(),
                        delta: 0,
                    });
                } else {
                    let (branch_exits, entry) = self.build_block(else_branch)?;
                    self.add_transition(s, entry, neg, Rat::one(), 0)?;
                    exits.extend(branch_exits);
                }
                Ok((exits, s))
            }
            Stmt::Choice { prob, lhs, rhs } => {
                let s = self.add_state(StateLabel::Choice);
                let p = prob.clone();
                let np = Rat::one() - &p;
                let mut exits = Vec::new();
                if is_effectively_empty(lhs) {
                    exits.push(ExitRecord {
                        from: s,
                        guard: GuardExpr::truth(),
                        prob: p,
                        delta: 0,
                    });
                } else {
                    let (branch_exits, entry) = self.build_block(lhs)?;
                    self.add_transition(s, entry, GuardExpr::truth(), p, 0)?;
                    exits.extend(branch_exits);
                }
                if is_effectively_empty(rhs) {
                    exits.push(ExitRecord {
                        from: s,
                        guard: GuardExpr::truth(),
                        prob: np,
                        delta: 0,
                    });
                } else {
                    let (branch_exits, entry) = self.build_block(rhs)?;
                    self.add_transition(s, entry, GuardExpr::truth(), np, 0)?;
                    exits.extend(branch_exits);
                }
                Ok((exits, s))
            }
            Stmt::Assign { .. } | Stmt::Skip => Err(PtsError::MalformedAst(
                "assignment outside a coalesced run".into(),
            )),
        }
    }
}

impl Pts {
    /// Compile a normalized single-counter program.
    pub fn build(program: &Program) -> Result<Pts, PtsError> {
        let (var_name, init_val) = match program.variables.as_slice() {
            [(name, value)] => (name.clone(), *value),
            vars => {
                return Err(PtsError::MalformedAst(format!(
                    "expected a single counter, found {} variables",
                    vars.len()
                )))
            }
        };
        info!("starting creation of the probabilistic transition system");

        let mut builder = Builder {
            var_name: &var_name,
            labels: Vec::new(),
            transitions: BTreeMap::new(),
            non_trivial_guards: Vec::new(),
        };
        let (exits, _entry) = builder.build_block(&program.body)?;
        let terminal = builder.add_state(StateLabel::Terminal);
        for exit in exits {
            builder.weld(exit, terminal)?;
        }
        let x = Expr::var(&var_name);
        builder.add_transition(
            terminal,
            terminal,
            GuardExpr::new(Pred::cmp(CmpOp::Gt, x.clone())),
            Rat::one(),
            -1,
        )?;
        builder.add_transition(
            terminal,
            terminal,
            GuardExpr::new(Pred::cmp(CmpOp::Lt, x.clone())),
            Rat::one(),
            1,
        )?;
        builder.add_transition(
            terminal,
            terminal,
            GuardExpr::new(Pred::cmp(CmpOp::Eq, x)),
            Rat::one(),
            0,
        )?;

        let Builder {
            labels,
            transitions,
            non_trivial_guards,
            ..
        } = builder;
        info!(
            states = labels.len(),
            arcs = transitions.values().map(Vec::len).sum::<usize>(),
            "probabilistic transition system created"
        );
        Ok(Pts {
            var_name,
            init_val,
            labels,
            transitions,
            non_trivial_guards,
        })
    }

    pub fn states_num(&self) -> usize {
        self.labels.len()
    }

    pub fn init_val(&self) -> i64 {
        self.init_val
    }

    pub fn var_name(&self) -> &str {
        &self.var_name
    }

    pub fn initial(&self) -> StateId {
        StateId(0)
    }

    pub fn terminal(&self) -> StateId {
        StateId(self.labels.len() - 1)
    }

    pub fn label(&self, state: StateId) -> StateLabel {
        self.labels[state.as_usize()]
    }

    pub fn labels(&self) -> &[StateLabel] {
        &self.labels
    }

    pub fn transitions(&self) -> &BTreeMap<(StateId, StateId), Vec<Transition>> {
        &self.transitions
    }

    pub fn non_trivial_guards(&self) -> &[GuardExpr] {
        &self.non_trivial_guards
    }

    /// Probability of a one-step move between two Markov chain states, or
    /// `None` when no arc realizes it.
    pub fn mc_transition_prob(&self, from: McState, to: McState) -> Option<Rat> {
        let list = self.transitions.get(&(from.0, to.0))?;
        for t in list {
            if t.guard.evaluate(from.1) && from.1 + t.delta == to.1 {
                return Some(t.prob.clone());
            }
        }
        None
    }

    /// Total probability mass leaving `state` at counter value `x`.
    pub fn outgoing_probability_mass(&self, state: StateId, x: i64) -> Rat {
        let mut mass = Rat::new(0.into(), 1.into());
        for ((from, _), list) in &self.transitions {
            if *from != state {
                continue;
            }
            for t in list {
                if t.guard.evaluate(x) {
                    mass += &t.prob;
                }
            }
        }
        mass
    }

    /// Global threshold and periods over all non-trivial guards, combined
    /// with the initial counter value.
    pub fn threshold_and_periods(&self) -> Result<(i64, i64, i64), SymbolicError> {
        if self.non_trivial_guards.is_empty() {
            return Ok((self.init_val.abs(), 1, 1));
        }
        let mut threshold = self.init_val.abs();
        let mut period_pos = 1i64;
        let mut period_neg = 1i64;
        for guard in &self.non_trivial_guards {
            let (t, pp, pn) = guard.threshold_and_period()?;
            threshold = threshold.max(t);
            period_pos = num_integer::lcm(period_pos, pp);
            period_neg = num_integer::lcm(period_neg, pn);
        }
        info!(
            threshold,
            period_pos, period_neg, "global threshold and periods computed"
        );
        Ok((threshold, period_pos, period_neg))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::transform::normalize;

    fn compile(src: &str) -> Pts {
        let (mut prog, mut table, ann) = parse(src).unwrap();
        normalize(&mut prog, &mut table, ann).unwrap();
        Pts::build(&prog).unwrap()
    }

    const RANDOM_WALK: &str = "int x = 1;\nwhile (x > 0) { { x := x + 1 } [1/2] { x := x - 1 } }";

    #[test]
    fn random_walk_layout() {
        let pts = compile(RANDOM_WALK);
        assert_eq!(
            pts.labels(),
            &[
                StateLabel::While,
                StateLabel::Choice,
                StateLabel::Assign,
                StateLabel::Assign,
                StateLabel::Terminal,
            ]
        );
        assert_eq!(pts.initial(), StateId(0));
        assert_eq!(pts.terminal(), StateId(4));
    }

    #[test]
    fn outgoing_mass_is_one_everywhere() {
        for src in [
            RANDOM_WALK,
            "int x = 10;\nwhile (x > 0) { x := x - 1 }",
            "int x = 0;\nwhile (x >= 0) { { x := x + 1 } [1/2] { skip } }",
        ] {
            let pts = compile(src);
            for s in 0..pts.states_num() {
                for x in -3..=3 {
                    let mass = pts.outgoing_probability_mass(StateId(s), x);
                    assert!(mass.is_one(), "state {s} at {x} has mass {mass}");
                }
            }
        }
    }

    #[test]
    fn all_updates_are_unit_steps() {
        let pts = compile("int x = 3;\nwhile (x > 0) { { x := x - 2 } [1/3] { x := x + 3 } }");
        for list in pts.transitions().values() {
            for t in list {
                assert!(t.delta.abs() <= 1);
            }
        }
    }

    #[test]
    fn terminal_has_exactly_three_self_loops() {
        let pts = compile(RANDOM_WALK);
        let terminal = pts.terminal();
        let mut self_loops = 0;
        for ((from, to), list) in pts.transitions() {
            if *from == terminal {
                assert_eq!(*to, terminal, "terminal must not leave itself");
                self_loops += list.len();
            }
        }
        assert_eq!(self_loops, 3);
        // Self-loops drive the counter toward zero.
        assert_eq!(
            pts.mc_transition_prob((terminal, 5), (terminal, 4)),
            Some(Rat::one())
        );
        assert_eq!(
            pts.mc_transition_prob((terminal, -5), (terminal, -4)),
            Some(Rat::one())
        );
        assert_eq!(
            pts.mc_transition_prob((terminal, 0), (terminal, 0)),
            Some(Rat::one())
        );
    }

    #[test]
    fn assignment_runs_are_coalesced() {
        // +2 then -2 cancels; the body collapses to a single empty state.
        let pts = compile("int x = 1;\nwhile (x > 0) { x := x + 2; x := x - 2 }");
        assert_eq!(
            pts.labels(),
            &[StateLabel::While, StateLabel::Empty, StateLabel::Terminal]
        );
        assert!(pts.transitions().contains_key(&(StateId(0), StateId(1))));
        assert!(pts.transitions().contains_key(&(StateId(1), StateId(0))));
        // A syntactically empty body instead loops the while state on itself.
        let pts = compile("int x = 1;\nwhile (x > 0) { skip }");
        assert_eq!(pts.labels(), &[StateLabel::While, StateLabel::Terminal]);
        assert!(pts.transitions().contains_key(&(StateId(0), StateId(0))));
    }

    #[test]
    fn multi_step_assignments_expand_to_unit_chains() {
        let pts = compile("int x = 4;\nwhile (x > 0) { x := x - 2 }");
        assert_eq!(
            pts.labels(),
            &[
                StateLabel::While,
                StateLabel::Assign,
                StateLabel::Assign,
                StateLabel::Terminal,
            ]
        );
        // Each assign state steps by exactly -1.
        assert_eq!(
            pts.mc_transition_prob((StateId(1), 4), (StateId(2), 3)),
            Some(Rat::one())
        );
        assert_eq!(
            pts.mc_transition_prob((StateId(2), 3), (StateId(0), 2)),
            Some(Rat::one())
        );
    }

    #[test]
    fn transition_probabilities_of_the_walk() {
        let pts = compile(RANDOM_WALK);
        let half = Rat::new(1.into(), 2.into());
        assert_eq!(
            pts.mc_transition_prob((StateId(0), 1), (StateId(1), 1)),
            Some(Rat::one())
        );
        assert_eq!(
            pts.mc_transition_prob((StateId(1), 1), (StateId(2), 1)),
            Some(half.clone())
        );
        assert_eq!(
            pts.mc_transition_prob((StateId(1), 1), (StateId(3), 1)),
            Some(half)
        );
        // Guard fails at 0: the loop exits instead.
        assert_eq!(pts.mc_transition_prob((StateId(0), 0), (StateId(1), 0)), None);
        assert_eq!(
            pts.mc_transition_prob((StateId(0), 0), (StateId(4), 0)),
            Some(Rat::one())
        );
    }

    #[test]
    fn global_threshold_accounts_for_the_initial_value() {
        let pts = compile("int x = 10;\nwhile (x > 0) { x := x - 1 }");
        assert_eq!(pts.threshold_and_periods().unwrap(), (10, 1, 1));
        let pts = compile(RANDOM_WALK);
        assert_eq!(pts.threshold_and_periods().unwrap(), (1, 1, 1));
    }

    #[test]
    fn unbound_labels_are_rejected() {
        use crate::program::{Guard, Program, Stmt};
        let program = Program {
            variables: vec![("x".into(), 0)],
            body: vec![Stmt::While {
                guard: Guard::Label(0),
                body: vec![],
            }],
        };
        assert!(matches!(
            Pts::build(&program),
            Err(PtsError::MalformedAst(_))
        ));
    }

    #[test]
    fn rejects_foreign_guard_variables() {
        use crate::program::{Guard, Program, Stmt};
        use crate::symbolic::{CmpOp, Expr, Pred};
        let program = Program {
            variables: vec![("x".into(), 0)],
            body: vec![Stmt::While {
                guard: Guard::Expr(GuardExpr::new(Pred::cmp(CmpOp::Gt, Expr::var("y")))),
                body: vec![],
            }],
        };
        assert!(matches!(
            Pts::build(&program),
            Err(PtsError::UnsupportedArity(_))
        ));
    }
}
