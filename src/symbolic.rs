//! Symbolic expressions & predicates over integer counters
//!
//! Polynomials and boolean combinations over integer variables, closed under
//! `+`, `-`, `*`, integer powers, the comparisons and the logical
//! connectives, plus two first-class constructors `DIV(a, b)` and
//! `MOD(a, b)` for floor division and floor remainder.
//!
//! ## Partial evaluation
//!
//! All values are built through smart constructors, which fold constants,
//! flatten nested sums/products, and apply the two `DIV`/`MOD` rules on the
//! spot:
//!
//! - `DIV(a, 1) = a` and `MOD(a, 1) = 0`;
//! - both operators fully evaluate when both arguments are integer literals
//!   (floor semantics, so `DIV(-7, 2) = -4` and `MOD(-7, 2) = 1`).
//!
//! Substitution rebuilds through the same constructors, so a substituted
//! expression re-simplifies exactly like a freshly parsed one.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use num_integer::Integer;
use num_traits::{One, Signed, Zero};

use crate::Int;

/// Failures of the symbolic fragment.
#[derive(Debug, thiserror::Error)]
pub enum SymbolicError {
    /// A guard expression references more than one variable where a single
    /// counter is required.
    #[error("expression references {0} variables, at most one is supported")]
    UnsupportedArity(usize),
    /// Sibling innermost `DIV`/`MOD` occurrences disagree on the divisor.
    #[error("mismatched inner divisors: {0} vs {1}")]
    Nonuniform(Int, Int),
    /// Anything else the analyzer cannot make sense of.
    #[error("malformed expression: {0}")]
    Malformed(String),
}

// ============================================================================
// Expressions
// ============================================================================

/// A symbolic integer expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Int(Int),
    Var(String),
    Add(Vec<Expr>),
    Mul(Vec<Expr>),
    Pow(Box<Expr>, u32),
    Div(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),
}

pub(crate) fn int_pow(base: &Int, exp: u32) -> Int {
    let mut acc = Int::one();
    for _ in 0..exp {
        acc *= base;
    }
    acc
}

/// Binomial coefficient C(n, k) as a big integer.
pub(crate) fn binomial(n: u32, k: u32) -> Int {
    if k > n {
        return Int::zero();
    }
    let mut acc = Int::one();
    for j in 0..k {
        acc = acc * Int::from(n - j) / Int::from(j + 1);
    }
    acc
}

impl Expr {
    pub fn int(value: impl Into<Int>) -> Self {
        Expr::Int(value.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    /// n-ary sum; flattens nested sums and folds integer literals.
    pub fn add(terms: Vec<Expr>) -> Self {
        let mut konst = Int::zero();
        let mut rest: Vec<Expr> = Vec::new();
        let mut queue: Vec<Expr> = terms;
        queue.reverse();
        while let Some(t) = queue.pop() {
            match t {
                Expr::Int(c) => konst += c,
                Expr::Add(inner) => {
                    for e in inner.into_iter().rev() {
                        queue.push(e);
                    }
                }
                other => rest.push(other),
            }
        }
        if rest.is_empty() {
            return Expr::Int(konst);
        }
        if konst.is_zero() {
            if rest.len() == 1 {
                return rest.pop().unwrap_or_else(|| Expr::Int(Int::zero()));
            }
            return Expr::Add(rest);
        }
        rest.push(Expr::Int(konst));
        Expr::Add(rest)
    }

    /// n-ary product; flattens nested products and folds integer literals.
    pub fn mul(factors: Vec<Expr>) -> Self {
        let mut konst = Int::one();
        let mut rest: Vec<Expr> = Vec::new();
        let mut queue: Vec<Expr> = factors;
        queue.reverse();
        while let Some(f) = queue.pop() {
            match f {
                Expr::Int(c) => konst *= c,
                Expr::Mul(inner) => {
                    for e in inner.into_iter().rev() {
                        queue.push(e);
                    }
                }
                other => rest.push(other),
            }
        }
        if konst.is_zero() {
            return Expr::Int(Int::zero());
        }
        if rest.is_empty() {
            return Expr::Int(konst);
        }
        if konst.is_one() {
            if rest.len() == 1 {
                return rest.pop().unwrap_or_else(|| Expr::Int(Int::one()));
            }
            return Expr::Mul(rest);
        }
        let mut out = vec![Expr::Int(konst)];
        out.extend(rest);
        Expr::Mul(out)
    }

    pub fn pow(base: Expr, exp: u32) -> Self {
        if exp == 0 {
            return Expr::Int(Int::one());
        }
        if exp == 1 {
            return base;
        }
        match base {
            Expr::Int(c) => Expr::Int(int_pow(&c, exp)),
            other => Expr::Pow(Box::new(other), exp),
        }
    }

    /// Floor division `DIV(a, b)`.
    pub fn div(a: Expr, b: Expr) -> Self {
        if let Expr::Int(ref c) = b {
            if c.is_one() {
                return a;
            }
            if let Expr::Int(ref n) = a {
                if !c.is_zero() {
                    return Expr::Int(n.div_floor(c));
                }
            }
        }
        Expr::Div(Box::new(a), Box::new(b))
    }

    /// Floor remainder `MOD(a, b)`.
    pub fn modulo(a: Expr, b: Expr) -> Self {
        if let Expr::Int(ref c) = b {
            if c.is_one() {
                return Expr::Int(Int::zero());
            }
            if let Expr::Int(ref n) = a {
                if !c.is_zero() {
                    return Expr::Int(n.mod_floor(c));
                }
            }
        }
        Expr::Mod(Box::new(a), Box::new(b))
    }

    pub fn neg(e: Expr) -> Self {
        Expr::mul(vec![Expr::int(-1), e])
    }

    pub fn sub(a: Expr, b: Expr) -> Self {
        Expr::add(vec![a, Expr::neg(b)])
    }

    // ------------------------- Queries -------------------------

    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Int(_) => {}
            Expr::Var(v) => {
                out.insert(v.clone());
            }
            Expr::Add(xs) | Expr::Mul(xs) => {
                for x in xs {
                    x.collect_vars(out);
                }
            }
            Expr::Pow(b, _) => b.collect_vars(out),
            Expr::Div(a, b) | Expr::Mod(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }

    pub fn has_div_mod(&self) -> bool {
        match self {
            Expr::Int(_) | Expr::Var(_) => false,
            Expr::Add(xs) | Expr::Mul(xs) => xs.iter().any(Expr::has_div_mod),
            Expr::Pow(b, _) => b.has_div_mod(),
            Expr::Div(..) | Expr::Mod(..) => true,
        }
    }

    // ------------------------- Rewriting -------------------------

    /// Simultaneous substitution: replacements are spliced in as-is and are
    /// not themselves re-substituted.
    pub fn subst(&self, map: &BTreeMap<String, Expr>) -> Expr {
        match self {
            Expr::Int(c) => Expr::Int(c.clone()),
            Expr::Var(v) => match map.get(v) {
                Some(e) => e.clone(),
                None => Expr::Var(v.clone()),
            },
            Expr::Add(xs) => Expr::add(xs.iter().map(|x| x.subst(map)).collect()),
            Expr::Mul(xs) => Expr::mul(xs.iter().map(|x| x.subst(map)).collect()),
            Expr::Pow(b, e) => Expr::pow(b.subst(map), *e),
            Expr::Div(a, b) => Expr::div(a.subst(map), b.subst(map)),
            Expr::Mod(a, b) => Expr::modulo(a.subst(map), b.subst(map)),
        }
    }

    /// Replace a single variable.
    pub fn subst_var(&self, var: &str, replacement: &Expr) -> Expr {
        let mut map = BTreeMap::new();
        map.insert(var.to_string(), replacement.clone());
        self.subst(&map)
    }

    // ------------------------- Evaluation -------------------------

    pub fn eval<F>(&self, lookup: &F) -> Result<Int, SymbolicError>
    where
        F: Fn(&str) -> Option<Int>,
    {
        match self {
            Expr::Int(c) => Ok(c.clone()),
            Expr::Var(v) => {
                lookup(v).ok_or_else(|| SymbolicError::Malformed(format!("unbound variable {v}")))
            }
            Expr::Add(xs) => {
                let mut acc = Int::zero();
                for x in xs {
                    acc += x.eval(lookup)?;
                }
                Ok(acc)
            }
            Expr::Mul(xs) => {
                let mut acc = Int::one();
                for x in xs {
                    acc *= x.eval(lookup)?;
                }
                Ok(acc)
            }
            Expr::Pow(b, e) => Ok(int_pow(&b.eval(lookup)?, *e)),
            Expr::Div(a, b) => {
                let (a, b) = (a.eval(lookup)?, b.eval(lookup)?);
                if b.is_zero() {
                    return Err(SymbolicError::Malformed("division by zero".into()));
                }
                Ok(a.div_floor(&b))
            }
            Expr::Mod(a, b) => {
                let (a, b) = (a.eval(lookup)?, b.eval(lookup)?);
                if b.is_zero() {
                    return Err(SymbolicError::Malformed("modulus by zero".into()));
                }
                Ok(a.mod_floor(&b))
            }
        }
    }

    /// Evaluate with a single variable bound to `value`.
    pub fn eval_at(&self, var: &str, value: &Int) -> Result<Int, SymbolicError> {
        self.eval(&|name: &str| (name == var).then(|| value.clone()))
    }

    // ------------------------- Polynomial views -------------------------

    /// Dense coefficients (low to high) of the expression viewed as a
    /// polynomial in `var`. Fails on `DIV`/`MOD` and on foreign variables.
    pub fn to_poly(&self, var: &str) -> Result<Vec<Int>, SymbolicError> {
        match self {
            Expr::Int(c) => {
                if c.is_zero() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![c.clone()])
                }
            }
            Expr::Var(v) => {
                if v == var {
                    Ok(vec![Int::zero(), Int::one()])
                } else {
                    Err(SymbolicError::UnsupportedArity(2))
                }
            }
            Expr::Add(xs) => {
                let mut acc = Vec::new();
                for x in xs {
                    acc = poly_add(&acc, &x.to_poly(var)?);
                }
                Ok(acc)
            }
            Expr::Mul(xs) => {
                let mut acc = vec![Int::one()];
                for x in xs {
                    acc = poly_mul(&acc, &x.to_poly(var)?);
                }
                Ok(acc)
            }
            Expr::Pow(b, e) => {
                let base = b.to_poly(var)?;
                let mut acc = vec![Int::one()];
                for _ in 0..*e {
                    acc = poly_mul(&acc, &base);
                }
                Ok(acc)
            }
            Expr::Div(..) | Expr::Mod(..) => Err(SymbolicError::Malformed(
                "DIV/MOD in polynomial context".into(),
            )),
        }
    }

    /// Linear form `Σ aᵢ·vᵢ + c` over arbitrarily many variables, or `None`
    /// when the expression is not linear (or contains `DIV`/`MOD`).
    pub fn linear_form(&self) -> Option<(BTreeMap<String, Int>, Int)> {
        match self {
            Expr::Int(c) => Some((BTreeMap::new(), c.clone())),
            Expr::Var(v) => {
                let mut coeffs = BTreeMap::new();
                coeffs.insert(v.clone(), Int::one());
                Some((coeffs, Int::zero()))
            }
            Expr::Add(xs) => {
                let mut coeffs: BTreeMap<String, Int> = BTreeMap::new();
                let mut konst = Int::zero();
                for x in xs {
                    let (c, k) = x.linear_form()?;
                    for (v, a) in c {
                        *coeffs.entry(v).or_insert_with(Int::zero) += a;
                    }
                    konst += k;
                }
                coeffs.retain(|_, a| !a.is_zero());
                Some((coeffs, konst))
            }
            Expr::Mul(xs) => {
                let mut coeffs: BTreeMap<String, Int> = BTreeMap::new();
                let mut konst = Int::one();
                for x in xs {
                    let (c, k) = x.linear_form()?;
                    if c.is_empty() {
                        // Constant factor scales everything accumulated so far.
                        for a in coeffs.values_mut() {
                            *a *= &k;
                        }
                        konst *= k;
                    } else {
                        if !coeffs.is_empty() {
                            return None; // product of two non-constant parts
                        }
                        for (v, a) in c {
                            coeffs.insert(v, a * &konst);
                        }
                        konst *= k;
                    }
                }
                coeffs.retain(|_, a| !a.is_zero());
                Some((coeffs, konst))
            }
            Expr::Pow(b, e) => match *e {
                0 => Some((BTreeMap::new(), Int::one())),
                1 => b.linear_form(),
                _ => {
                    let (c, k) = b.linear_form()?;
                    if c.is_empty() {
                        Some((BTreeMap::new(), int_pow(&k, *e)))
                    } else {
                        None
                    }
                }
            },
            Expr::Div(..) | Expr::Mod(..) => None,
        }
    }
}

// ------------------------- Polynomial helpers -------------------------

pub(crate) fn poly_trim(v: &mut Vec<Int>) {
    while v.last().is_some_and(Int::is_zero) {
        v.pop();
    }
}

pub(crate) fn poly_add(a: &[Int], b: &[Int]) -> Vec<Int> {
    let mut out = vec![Int::zero(); a.len().max(b.len())];
    for (i, c) in a.iter().enumerate() {
        out[i] += c;
    }
    for (i, c) in b.iter().enumerate() {
        out[i] += c;
    }
    poly_trim(&mut out);
    out
}

pub(crate) fn poly_mul(a: &[Int], b: &[Int]) -> Vec<Int> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![Int::zero(); a.len() + b.len() - 1];
    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            out[i + j] += ca * cb;
        }
    }
    poly_trim(&mut out);
    out
}

pub(crate) fn poly_eval(poly: &[Int], x: &Int) -> Int {
    let mut acc = Int::zero();
    for c in poly.iter().rev() {
        acc = acc * x + c;
    }
    acc
}

// ============================================================================
// Predicates
// ============================================================================

/// Comparison operator against zero.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Does `v ⋈ 0` hold?
    pub fn holds(self, v: &Int) -> bool {
        match self {
            CmpOp::Eq => v.is_zero(),
            CmpOp::Ne => !v.is_zero(),
            CmpOp::Lt => v.is_negative(),
            CmpOp::Le => !v.is_positive(),
            CmpOp::Gt => v.is_positive(),
            CmpOp::Ge => !v.is_negative(),
        }
    }

    pub fn negated(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }
}

/// A boolean predicate over symbolic expressions. Comparisons are kept in
/// the canonical form `e ⋈ 0` (the parser subtracts the right-hand side).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pred {
    Bool(bool),
    Cmp(CmpOp, Expr),
    And(Vec<Pred>),
    Or(Vec<Pred>),
    Not(Box<Pred>),
}

impl Pred {
    /// Comparison `e ⋈ 0`; folds to a literal when `e` is constant.
    pub fn cmp(op: CmpOp, e: Expr) -> Self {
        match e {
            Expr::Int(c) => Pred::Bool(op.holds(&c)),
            other => Pred::Cmp(op, other),
        }
    }

    pub fn and(parts: Vec<Pred>) -> Self {
        let mut out = Vec::new();
        for p in parts {
            match p {
                Pred::Bool(false) => return Pred::Bool(false),
                Pred::Bool(true) => {}
                Pred::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Pred::Bool(true),
            1 => out.into_iter().next().unwrap_or(Pred::Bool(true)),
            _ => Pred::And(out),
        }
    }

    pub fn or(parts: Vec<Pred>) -> Self {
        let mut out = Vec::new();
        for p in parts {
            match p {
                Pred::Bool(true) => return Pred::Bool(true),
                Pred::Bool(false) => {}
                Pred::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Pred::Bool(false),
            1 => out.into_iter().next().unwrap_or(Pred::Bool(false)),
            _ => Pred::Or(out),
        }
    }

    /// Logical negation: flips comparisons and applies De Morgan.
    pub fn negate(&self) -> Pred {
        match self {
            Pred::Bool(b) => Pred::Bool(!b),
            Pred::Cmp(op, e) => Pred::Cmp(op.negated(), e.clone()),
            Pred::And(xs) => Pred::or(xs.iter().map(Pred::negate).collect()),
            Pred::Or(xs) => Pred::and(xs.iter().map(Pred::negate).collect()),
            Pred::Not(inner) => (**inner).clone(),
        }
    }

    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Pred::Bool(_) => {}
            Pred::Cmp(_, e) => e.collect_vars(out),
            Pred::And(xs) | Pred::Or(xs) => {
                for x in xs {
                    x.collect_vars(out);
                }
            }
            Pred::Not(inner) => inner.collect_vars(out),
        }
    }

    pub fn subst(&self, map: &BTreeMap<String, Expr>) -> Pred {
        match self {
            Pred::Bool(b) => Pred::Bool(*b),
            Pred::Cmp(op, e) => Pred::cmp(*op, e.subst(map)),
            Pred::And(xs) => Pred::and(xs.iter().map(|x| x.subst(map)).collect()),
            Pred::Or(xs) => Pred::or(xs.iter().map(|x| x.subst(map)).collect()),
            Pred::Not(inner) => inner.subst(map).negate(),
        }
    }

    pub fn eval<F>(&self, lookup: &F) -> Result<bool, SymbolicError>
    where
        F: Fn(&str) -> Option<Int>,
    {
        match self {
            Pred::Bool(b) => Ok(*b),
            Pred::Cmp(op, e) => Ok(op.holds(&e.eval(lookup)?)),
            Pred::And(xs) => {
                for x in xs {
                    if !x.eval(lookup)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Pred::Or(xs) => {
                for x in xs {
                    if x.eval(lookup)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Pred::Not(inner) => Ok(!inner.eval(lookup)?),
        }
    }

    /// The polynomial-like sub-expressions of the predicate, collected by
    /// descending through the connectives (each comparison contributes its
    /// left-hand side in `e ⋈ 0` form).
    pub fn atoms(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match self {
            Pred::Bool(_) => {}
            Pred::Cmp(_, e) => out.push(e),
            Pred::And(xs) | Pred::Or(xs) => {
                for x in xs {
                    x.collect_atoms(out);
                }
            }
            Pred::Not(inner) => inner.collect_atoms(out),
        }
    }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(c) => write!(f, "{c}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Add(xs) => {
                for (i, x) in xs.iter().enumerate() {
                    let s = x.to_string();
                    if i == 0 {
                        write!(f, "{s}")?;
                    } else if let Some(rest) = s.strip_prefix('-') {
                        write!(f, " - {rest}")?;
                    } else {
                        write!(f, " + {s}")?;
                    }
                }
                Ok(())
            }
            Expr::Mul(xs) => {
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, "*")?;
                    }
                    match x {
                        Expr::Add(_) => write!(f, "({x})")?,
                        _ => write!(f, "{x}")?,
                    }
                }
                Ok(())
            }
            Expr::Pow(b, e) => match **b {
                Expr::Add(_) | Expr::Mul(_) => write!(f, "({b})**{e}"),
                _ => write!(f, "{b}**{e}"),
            },
            Expr::Div(a, b) => write!(f, "DIV({a}, {b})"),
            Expr::Mod(a, b) => write!(f, "MOD({a}, {b})"),
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for Pred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pred::Bool(b) => write!(f, "{b}"),
            Pred::Cmp(op, e) => write!(f, "{e} {op} 0"),
            Pred::And(xs) => {
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " and ")?;
                    }
                    match x {
                        Pred::Or(_) => write!(f, "({x})")?,
                        _ => write!(f, "{x}")?,
                    }
                }
                Ok(())
            }
            Pred::Or(xs) => {
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "{x}")?;
                }
                Ok(())
            }
            Pred::Not(inner) => write!(f, "not ({inner})"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::var("x")
    }

    #[test]
    fn div_mod_partial_evaluation() {
        // Literals evaluate with floor semantics.
        assert_eq!(Expr::div(Expr::int(7), Expr::int(2)), Expr::int(3));
        assert_eq!(Expr::div(Expr::int(-7), Expr::int(2)), Expr::int(-4));
        assert_eq!(Expr::modulo(Expr::int(-7), Expr::int(2)), Expr::int(1));
        // b = 1 simplifies even with a symbolic first argument.
        assert_eq!(Expr::div(x(), Expr::int(1)), x());
        assert_eq!(Expr::modulo(x(), Expr::int(1)), Expr::int(0));
        // Symbolic arguments are kept.
        assert!(matches!(Expr::modulo(x(), Expr::int(3)), Expr::Mod(..)));
    }

    #[test]
    fn constructors_fold_constants() {
        let e = Expr::add(vec![Expr::int(2), x(), Expr::int(3)]);
        assert_eq!(e, Expr::Add(vec![x(), Expr::int(5)]));
        assert_eq!(Expr::mul(vec![Expr::int(0), x()]), Expr::int(0));
        // Like terms are not collected, so x - x keeps its variable.
        assert_eq!(Expr::sub(x(), x()).free_vars().len(), 1);
        assert_eq!(Expr::pow(Expr::int(3), 4), Expr::int(81));
    }

    #[test]
    fn substitution_resimplifies() {
        // MOD(x, 3) with x := 7 collapses to a literal.
        let e = Expr::modulo(x(), Expr::int(3));
        let r = e.subst_var("x", &Expr::int(7));
        assert_eq!(r, Expr::int(1));
        // DIV(y, 1) appearing through substitution simplifies away.
        let e = Expr::div(x(), Expr::var("k"));
        let r = e.subst_var("k", &Expr::int(1));
        assert_eq!(r, x());
    }

    #[test]
    fn poly_extraction() {
        // (x + 1)^2 = 1 + 2x + x^2
        let e = Expr::pow(Expr::add(vec![x(), Expr::int(1)]), 2);
        let p = e.to_poly("x").unwrap();
        assert_eq!(p, vec![Int::from(1), Int::from(2), Int::from(1)]);
        assert_eq!(poly_eval(&p, &Int::from(3)), Int::from(16));
        // Foreign variable is rejected.
        assert!(Expr::var("y").to_poly("x").is_err());
    }

    #[test]
    fn linear_forms() {
        // 2x - 3y + 4
        let e = Expr::add(vec![
            Expr::mul(vec![Expr::int(2), x()]),
            Expr::mul(vec![Expr::int(-3), Expr::var("y")]),
            Expr::int(4),
        ]);
        let (coeffs, konst) = e.linear_form().unwrap();
        assert_eq!(coeffs.get("x"), Some(&Int::from(2)));
        assert_eq!(coeffs.get("y"), Some(&Int::from(-3)));
        assert_eq!(konst, Int::from(4));
        // x*y is not linear.
        assert!(Expr::mul(vec![x(), Expr::var("y")]).linear_form().is_none());
        // x^2 is not linear, x^1 is.
        assert!(Expr::pow(x(), 2).linear_form().is_none());
        assert!(Expr::pow(x(), 1).linear_form().is_some());
    }

    #[test]
    fn predicate_negation_and_eval() {
        let p = Pred::cmp(CmpOp::Gt, x()); // x > 0
        let n = p.negate(); // x <= 0
        let at = |v: i64| {
            let val = Int::from(v);
            p.eval(&|_| Some(val.clone())).unwrap()
        };
        assert!(at(1));
        assert!(!at(0));
        assert!(n.eval(&|_| Some(Int::from(0))).unwrap());
        // Constant comparisons fold at construction.
        assert_eq!(Pred::cmp(CmpOp::Ge, Expr::int(0)), Pred::Bool(true));
    }

    #[test]
    fn atoms_descend_connectives() {
        let p = Pred::and(vec![
            Pred::cmp(CmpOp::Gt, x()),
            Pred::or(vec![
                Pred::cmp(CmpOp::Lt, Expr::var("y")),
                Pred::cmp(CmpOp::Eq, Expr::var("z")),
            ]),
        ]);
        assert_eq!(p.atoms().len(), 3);
    }

    #[test]
    fn binomials() {
        assert_eq!(binomial(4, 2), Int::from(6));
        assert_eq!(binomial(5, 0), Int::from(1));
        assert_eq!(binomial(3, 5), Int::from(0));
    }
}
