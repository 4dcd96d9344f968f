//! Crate root: public surface, core aliases, and pipeline-wide invariants
//!
//! Pastry decides two termination properties of probabilistic counter
//! programs (PCPs) over unbounded integer counters: almost-sure termination
//! (AST) and positive almost-sure termination (PAST). The public entry point
//! is [`analyze_source`], which runs the whole pipeline on one program text:
//!
//! ```text
//! source → AST → class detection → normalizer → 1-d PCP → PTS
//!        → (threshold, period⁺, period⁻) → RMC⁺/RMC⁻ → LMC → {ast, past}
//! ```
//!
//! ## Invariants
//!
//! - **Exact arithmetic.** Probabilities, matrix entries, and stationary
//!   distributions are big-integer rationals ([`Rat`]). Floating point only
//!   appears in the optional diagnostic reachability iterate, which is never
//!   consulted by the decision procedure.
//! - **Unit steps.** Every transition of the compiled [`pts::Pts`] updates
//!   the counter by exactly one of `{-1, 0, +1}`; larger assignment
//!   magnitudes are expanded into chains of unit-step states.
//! - **Determinism.** The core is single-threaded; all iteration orders are
//!   fixed (ordered maps, lexicographic nonzero sets), so a given input
//!   always produces the same answer, bit for bit.
//!
//! If any invariant is violated at runtime the failure mode is a precise
//! [`AnalysisError`], never a wrong verdict.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Symbolic expressions and predicates with `DIV`/`MOD` partial evaluation.
pub mod symbolic;
/// Guard wrapper plus threshold-and-period extraction.
pub mod guard;
/// Program syntax tree and the guard replacement table.
pub mod program;
/// Text-to-AST parser (comments, annotation block, declarations, body).
pub mod parser;
/// Class detection and the four k-d → 1-d reductions.
pub mod transform;
/// Probabilistic transition system builder.
pub mod pts;
/// Regular Markov chain: QBD matrices, reachability, SCC categorization.
pub mod rmc;
/// Labeled Markov chain: composite reachability graph and decisions.
pub mod lmc;
/// End-to-end orchestration.
pub mod pipeline;

// ============================================================================
// Canonical aliases and root-level re-exports
// ============================================================================

/// Arbitrary-precision integer used throughout the symbolic layer.
pub type Int = num_bigint::BigInt;

/// Exact rational scalar (big-integer numerator and denominator).
pub type Rat = num_rational::BigRational;

/// Identifier of a PTS control state (dense, `0` is the initial state and
/// the largest id is the terminal state).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub usize);

impl StateId {
    /// Access the underlying index.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Outcome of the termination analysis for one input program.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    /// The program terminates with probability 1.
    pub ast: bool,
    /// The program terminates with finite expected time (implies `ast`).
    pub past: bool,
}

/// Any failure of the analysis pipeline, unified across modules.
///
/// Per-module error enums are wrapped here so callers can match on the
/// failure class without knowing which stage produced it.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Malformed source text or annotation block.
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    /// The program fits no supported PCP class, or an annotation is unusable.
    #[error(transparent)]
    Transform(#[from] transform::TransformError),
    /// A guard is outside the supported symbolic fragment.
    #[error(transparent)]
    Symbolic(#[from] symbolic::SymbolicError),
    /// The syntax tree could not be lowered into a transition system.
    #[error(transparent)]
    Pts(#[from] pts::PtsError),
    /// A bottom component of the abstract chain resists categorization.
    #[error(transparent)]
    Rmc(#[from] rmc::RmcError),
}

pub use crate::pipeline::analyze_source;
pub use crate::guard::GuardExpr;
pub use crate::symbolic::{Expr, Pred};
