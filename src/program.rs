//! Program syntax tree
//!
//! The AST mirrors the source grammar: assignments with signed unit
//! magnitudes, `while`, `if`, probabilistic choice, and `skip`. Guards are
//! either *labels* into a [`GuardTable`] (the state during parsing and
//! k-dimensional transformation) or bound [`GuardExpr`] values (the state a
//! normalized 1-d program is in). The table indirection exists because the
//! k-d → 1-d reductions rewrite every guard wholesale; keeping predicates in
//! one ordered table lets a transform substitute them all without walking
//! the tree twice.

#![allow(missing_docs)]

use crate::guard::GuardExpr;
use crate::symbolic::Pred;
use crate::Rat;

/// A guard position in the syntax tree.
#[derive(Clone, Debug)]
pub enum Guard {
    /// Index into the [`GuardTable`] assigned during parsing.
    Label(usize),
    /// A bound predicate over the (single) counter.
    Expr(GuardExpr),
}

impl Guard {
    /// The bound guard expression.
    ///
    /// Normalization binds every label before the PTS is built; the builder
    /// rejects leftover labels instead of calling this.
    pub fn expr(&self) -> &GuardExpr {
        match self {
            Guard::Expr(g) => g,
            Guard::Label(i) => panic!("guard label {i} was never bound"),
        }
    }
}

/// One statement of a probabilistic counter program.
#[derive(Clone, Debug)]
pub enum Stmt {
    Skip,
    /// `var := var ± |delta|`, stored as a signed step.
    Assign { var: String, delta: i64 },
    While {
        guard: Guard,
        body: Vec<Stmt>,
    },
    If {
        guard: Guard,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    /// `{ lhs } [prob] { rhs }`.
    Choice {
        prob: Rat,
        lhs: Vec<Stmt>,
        rhs: Vec<Stmt>,
    },
}

impl Stmt {
    /// Assignment helper used by the transforms.
    pub fn assign(var: impl Into<String>, delta: i64) -> Self {
        Stmt::Assign { var: var.into(), delta }
    }
}

/// A block that lowers to nothing: empty, or a lone `skip`.
pub fn is_effectively_empty(block: &[Stmt]) -> bool {
    block.is_empty() || (block.len() == 1 && matches!(block[0], Stmt::Skip))
}

/// A parsed program: declared variables with initial values (in declaration
/// order) and the statement list.
#[derive(Clone, Debug, Default)]
pub struct Program {
    /// Declaration-ordered variables. After normalization exactly one
    /// remains; its name is the counter.
    pub variables: Vec<(String, i64)>,
    pub body: Vec<Stmt>,
}

impl Program {
    pub fn initial_value(&self, name: &str) -> Option<i64> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|(n, _)| n == name)
    }
}

/// Ordered table of guard predicates, indexed by [`Guard::Label`].
#[derive(Clone, Debug, Default)]
pub struct GuardTable {
    preds: Vec<Pred>,
}

impl GuardTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate and return its label.
    pub fn insert(&mut self, pred: Pred) -> usize {
        self.preds.push(pred);
        self.preds.len() - 1
    }

    pub fn get(&self, label: usize) -> Option<&Pred> {
        self.preds.get(label)
    }

    pub fn set(&mut self, label: usize, pred: Pred) {
        self.preds[label] = pred;
    }

    pub fn len(&self) -> usize {
        self.preds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pred> {
        self.preds.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Pred> {
        self.preds.iter_mut()
    }
}
