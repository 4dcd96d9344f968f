//! Guards and the threshold-and-period analysis
//!
//! A [`GuardExpr`] wraps a predicate over (at most) one counter variable.
//! This module derives, for every guard, a *threshold* `T` and *periods*
//! `(π⁺, π⁻)` such that the truth value of the guard is `π⁺`-periodic on
//! `{x > T}` and `π⁻`-periodic on `{x < -T}`. These numbers are what let the
//! infinite state space of the induced Markov chain decompose into a finite
//! irregular kernel plus two periodic tails.
//!
//! ## Algorithm
//!
//! - A plain polynomial atom is bounded by Cauchy's root bound
//!   `⌈1 + max |cₖ / c_lead|⌉` with period 1: beyond the largest root the
//!   sign of a polynomial never changes.
//! - An atom containing `DIV`/`MOD` is decomposed by residue: with `A` the
//!   (uniform) innermost divisor, substituting `x ← i + A·x` for each
//!   residue `i ∈ [0, A)` lets the innermost operator be eliminated
//!   algebraically, and the recursion combines the per-residue results into
//!   `(A·(1 + max tᵢ), A·lcm πᵢ)`.
//! - The combined guard threshold is then *minimized* by scanning both
//!   frontiers inward while the one-period windows keep rotating unchanged,
//!   and the actual minimum periods are recomputed from the window values.

#![allow(missing_docs)]

use std::collections::{BTreeSet, VecDeque};

use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::symbolic::{binomial, int_pow, poly_eval, Expr, Pred, SymbolicError};
use crate::{Int, Rat};

// ============================================================================
// GuardExpr
// ============================================================================

/// A guard predicate together with its free-variable set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardExpr {
    pred: Pred,
    vars: BTreeSet<String>,
}

impl GuardExpr {
    pub fn new(pred: Pred) -> Self {
        let vars = pred.free_vars();
        Self { pred, vars }
    }

    /// The always-true guard.
    pub fn truth() -> Self {
        Self::new(Pred::Bool(true))
    }

    pub fn pred(&self) -> &Pred {
        &self.pred
    }

    /// The single free variable, when there is exactly one.
    pub fn var(&self) -> Option<&str> {
        if self.vars.len() == 1 {
            self.vars.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    pub fn free_var_count(&self) -> usize {
        self.vars.len()
    }

    /// A guard with no free variables never constrains the counter.
    pub fn is_trivial(&self) -> bool {
        self.vars.is_empty()
    }

    /// Truth value at counter value `x`.
    ///
    /// Requires at most one free variable; the PTS builder validates this
    /// for every guard before any evaluation happens.
    pub fn evaluate(&self, x: i64) -> bool {
        let v = Int::from(x);
        let var = self.vars.iter().next();
        self.pred
            .eval(&|name: &str| {
                if var.map(String::as_str) == Some(name) {
                    Some(v.clone())
                } else {
                    None
                }
            })
            .expect("guard arity is validated before evaluation")
    }

    pub fn negate(&self) -> GuardExpr {
        GuardExpr::new(self.pred.negate())
    }

    /// Threshold and positive/negative periods of this guard.
    pub fn threshold_and_period(&self) -> Result<(i64, i64, i64), SymbolicError> {
        predicate_threshold_and_period(&self.pred)
    }
}

impl std::fmt::Display for GuardExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pred)
    }
}

// ============================================================================
// Threshold and period of a predicate
// ============================================================================

/// Threshold `T` and periods `(π⁺, π⁻)` of a guard predicate.
pub fn predicate_threshold_and_period(pred: &Pred) -> Result<(i64, i64, i64), SymbolicError> {
    let vars = pred.free_vars();
    if vars.is_empty() {
        return Ok((0, 1, 1));
    }
    if vars.len() > 1 {
        return Err(SymbolicError::UnsupportedArity(vars.len()));
    }
    let var = vars.iter().next().map(String::as_str).unwrap_or_default();
    let var_tmp = fresh_symbol(var, &vars);

    let mut threshold = Int::zero();
    let mut period = Int::one();
    for expr in pred.atoms() {
        let (t, p) = expr_threshold_period(expr, var, &var_tmp)?;
        threshold = threshold.max(t);
        period = period.lcm(&p);
    }
    let threshold = to_i64(&threshold)?;
    let period = to_i64(&period)?;

    minimize_threshold_and_period(threshold, period, |x| {
        let v = Int::from(x);
        pred.eval(&|name: &str| (name == var).then(|| v.clone()))
    })
}

/// Threshold and periods of a bare expression, read as the predicate
/// "expression is non-zero" for minimization purposes.
pub fn expression_threshold_and_period(
    expr: &Expr,
    var: &str,
) -> Result<(i64, i64, i64), SymbolicError> {
    let var_tmp = fresh_symbol(var, &expr.free_vars());
    let (t, p) = expr_threshold_period(expr, var, &var_tmp)?;
    let t = to_i64(&t)?;
    let p = to_i64(&p)?;
    minimize_threshold_and_period(t, p, |x| Ok(!expr.eval_at(var, &Int::from(x))?.is_zero()))
}

fn to_i64(v: &Int) -> Result<i64, SymbolicError> {
    v.to_i64()
        .ok_or_else(|| SymbolicError::Malformed(format!("threshold or period out of range: {v}")))
}

fn fresh_symbol(base: &str, taken: &BTreeSet<String>) -> String {
    let mut name = format!("{base}_tmp");
    while taken.contains(&name) {
        name.push('_');
    }
    name
}

// ============================================================================
// Threshold and period of one expression
// ============================================================================

fn expr_threshold_period(
    expr: &Expr,
    var: &str,
    var_tmp: &str,
) -> Result<(Int, Int), SymbolicError> {
    if expr.free_vars().is_empty() {
        return Ok((Int::zero(), Int::one()));
    }
    if !expr.has_div_mod() {
        return Ok((cauchy_root_bound(expr, var)?, Int::one()));
    }

    let (modified, divisor) = rename_innermost(expr, var, var_tmp)?;
    let a_small = divisor
        .to_i64()
        .ok_or_else(|| SymbolicError::Malformed(format!("inner divisor too large: {divisor}")))?;

    let mut max_threshold = Int::zero();
    let mut period = Int::one();
    for i in 0..a_small {
        let residue = Int::from(i);
        let shifted = modified.subst_var(
            var,
            &Expr::add(vec![
                Expr::Int(residue.clone()),
                Expr::mul(vec![Expr::Int(divisor.clone()), Expr::var(var)]),
            ]),
        );
        let eliminated = eliminate_innermost(&shifted, var, var_tmp, &residue, &divisor)?;
        let (t, p) = expr_threshold_period(&eliminated, var, var_tmp)?;
        max_threshold = max_threshold.max(t);
        period = period.lcm(&p);
    }
    Ok((
        &divisor * (Int::one() + max_threshold),
        divisor * period,
    ))
}

/// Cauchy's bound on the absolute value of the roots of a polynomial:
/// every real root lies strictly inside `1 + max |cₖ / c_lead|`.
fn cauchy_root_bound(expr: &Expr, var: &str) -> Result<Int, SymbolicError> {
    let poly = expr.to_poly(var)?;
    if poly.len() <= 1 {
        return Ok(Int::zero());
    }
    let lead = poly[poly.len() - 1].abs();
    let mut max_ratio = Rat::zero();
    for c in &poly[..poly.len() - 1] {
        let r = Rat::new(c.abs(), lead.clone());
        if r > max_ratio {
            max_ratio = r;
        }
    }
    Ok((Rat::one() + max_ratio).ceil().to_integer())
}

/// Find the innermost `DIV`/`MOD` occurrences, record their shared divisor
/// `A`, and rename the analysis variable inside their first arguments to the
/// scratch symbol so the outer residue substitution leaves them alone.
fn rename_innermost(
    expr: &Expr,
    var: &str,
    var_tmp: &str,
) -> Result<(Expr, Int), SymbolicError> {
    fn record_divisor(b: &Expr, first: &mut Option<Int>) -> Result<Int, SymbolicError> {
        let d = match b {
            Expr::Int(c) if c.is_positive() => c.clone(),
            other => {
                return Err(SymbolicError::Malformed(format!(
                    "inner divisor must be a positive integer, got {other}"
                )))
            }
        };
        match first {
            None => *first = Some(d.clone()),
            Some(f) if *f == d => {}
            Some(f) => return Err(SymbolicError::Nonuniform(f.clone(), d)),
        }
        Ok(d)
    }

    fn walk(
        expr: &Expr,
        var: &str,
        var_tmp: &str,
        first: &mut Option<Int>,
    ) -> Result<Expr, SymbolicError> {
        match expr {
            Expr::Div(a0, b) if !a0.has_div_mod() => {
                let d = record_divisor(b, first)?;
                Ok(Expr::div(a0.subst_var(var, &Expr::var(var_tmp)), Expr::Int(d)))
            }
            Expr::Mod(a0, b) if !a0.has_div_mod() => {
                let d = record_divisor(b, first)?;
                Ok(Expr::modulo(
                    a0.subst_var(var, &Expr::var(var_tmp)),
                    Expr::Int(d),
                ))
            }
            Expr::Int(_) | Expr::Var(_) => Ok(expr.clone()),
            Expr::Add(xs) => Ok(Expr::add(
                xs.iter()
                    .map(|x| walk(x, var, var_tmp, first))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Mul(xs) => Ok(Expr::mul(
                xs.iter()
                    .map(|x| walk(x, var, var_tmp, first))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Pow(b, e) => Ok(Expr::pow(walk(b, var, var_tmp, first)?, *e)),
            Expr::Div(a0, b) => Ok(Expr::div(
                walk(a0, var, var_tmp, first)?,
                walk(b, var, var_tmp, first)?,
            )),
            Expr::Mod(a0, b) => Ok(Expr::modulo(
                walk(a0, var, var_tmp, first)?,
                walk(b, var, var_tmp, first)?,
            )),
        }
    }

    let mut first = None;
    let out = walk(expr, var, var_tmp, &mut first)?;
    let a = first.ok_or_else(|| {
        SymbolicError::Malformed("expected a DIV/MOD occurrence, found none".into())
    })?;
    Ok((out, a))
}

/// Eliminate the (renamed) innermost `DIV`/`MOD` nodes at residue `i`.
///
/// With `P` the polynomial first argument and `x ≡ i (mod A)` after the
/// residue substitution:
///
/// - `MOD(P, A)` is the constant `P(i) mod A`;
/// - `DIV(P, A)` is the quotient polynomial with constant term `⌊P(i)/A⌋`
///   and degree-`j` coefficient `Σₖ cₖ·C(k,j)·A^{j-1}·i^{k-j}`.
fn eliminate_innermost(
    expr: &Expr,
    var: &str,
    var_tmp: &str,
    residue: &Int,
    a: &Int,
) -> Result<Expr, SymbolicError> {
    let matches_divisor = |b: &Expr| matches!(b, Expr::Int(c) if c == a);
    match expr {
        Expr::Mod(a0, b) if !a0.has_div_mod() && matches_divisor(b) => {
            let p = a0.to_poly(var_tmp)?;
            Ok(Expr::Int(poly_eval(&p, residue).mod_floor(a)))
        }
        Expr::Div(a0, b) if !a0.has_div_mod() && matches_divisor(b) => {
            let p = a0.to_poly(var_tmp)?;
            let mut terms = vec![Expr::Int(poly_eval(&p, residue).div_floor(a))];
            for j in 1..p.len() {
                let mut coeff = Int::zero();
                for (k, c_k) in p.iter().enumerate().skip(j) {
                    coeff += c_k
                        * binomial(k as u32, j as u32)
                        * int_pow(a, (j - 1) as u32)
                        * int_pow(residue, (k - j) as u32);
                }
                if !coeff.is_zero() {
                    terms.push(Expr::mul(vec![
                        Expr::Int(coeff),
                        Expr::pow(Expr::var(var), j as u32),
                    ]));
                }
            }
            Ok(Expr::add(terms))
        }
        Expr::Int(_) | Expr::Var(_) => Ok(expr.clone()),
        Expr::Add(xs) => Ok(Expr::add(
            xs.iter()
                .map(|x| eliminate_innermost(x, var, var_tmp, residue, a))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Mul(xs) => Ok(Expr::mul(
            xs.iter()
                .map(|x| eliminate_innermost(x, var, var_tmp, residue, a))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Pow(b, e) => Ok(Expr::pow(
            eliminate_innermost(b, var, var_tmp, residue, a)?,
            *e,
        )),
        Expr::Div(a0, b) => Ok(Expr::div(
            eliminate_innermost(a0, var, var_tmp, residue, a)?,
            eliminate_innermost(b, var, var_tmp, residue, a)?,
        )),
        Expr::Mod(a0, b) => Ok(Expr::modulo(
            eliminate_innermost(a0, var, var_tmp, residue, a)?,
            eliminate_innermost(b, var, var_tmp, residue, a)?,
        )),
    }
}

// ============================================================================
// Threshold minimization
// ============================================================================

/// Smallest prefix length whose repetition reproduces the whole sequence.
fn find_minimum_period(values: &[bool]) -> i64 {
    let n = values.len();
    if n <= 1 {
        return n as i64;
    }
    for cand in 1..n {
        if n % cand == 0 && values.iter().enumerate().all(|(i, v)| *v == values[i % cand]) {
            return cand as i64;
        }
    }
    n as i64
}

/// Scan both frontiers inward, decrementing the threshold while the two
/// one-period windows stay invariant under rotation. Also recomputes the
/// minimum positive and negative periods from the window values.
pub(crate) fn minimize_threshold_and_period<F>(
    mut threshold: i64,
    period: i64,
    f: F,
) -> Result<(i64, i64, i64), SymbolicError>
where
    F: Fn(i64) -> Result<bool, SymbolicError>,
{
    let p_bools = (0..period)
        .map(|i| f(threshold + i))
        .collect::<Result<Vec<_>, _>>()?;
    let n_bools = (0..period)
        .map(|i| f(-threshold - i))
        .collect::<Result<Vec<_>, _>>()?;
    let period_p = find_minimum_period(&p_bools);
    let period_n = find_minimum_period(&n_bools);

    let mut p_counter = threshold;
    let mut n_counter = -threshold;
    let mut window_p = VecDeque::new();
    for i in (p_counter..=p_counter - 1 + period_p).rev() {
        window_p.push_back(f(i)?);
    }
    let mut window_n = VecDeque::new();
    for i in (n_counter + 1 - period_n)..=n_counter {
        window_n.push_back(f(i)?);
    }

    p_counter -= 1;
    n_counter += 1;
    while p_counter >= n_counter {
        window_p.push_back(f(p_counter)?);
        window_n.push_back(f(n_counter)?);
        if window_p.front() != window_p.back() || window_n.front() != window_n.back() {
            break;
        }
        threshold -= 1;
        window_p.pop_front();
        window_n.pop_front();
        p_counter -= 1;
        n_counter += 1;
    }
    Ok((threshold, period_p, period_n))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::CmpOp;
    use rand::Rng;

    fn x() -> Expr {
        Expr::var("x")
    }

    #[test]
    fn trivial_guard() {
        let g = GuardExpr::truth();
        assert!(g.is_trivial());
        assert_eq!(g.threshold_and_period().unwrap(), (0, 1, 1));
    }

    #[test]
    fn linear_guard_minimizes_to_one() {
        // x > 0: stable beyond 1 on both sides, period 1.
        let g = GuardExpr::new(Pred::cmp(CmpOp::Gt, x()));
        assert_eq!(g.threshold_and_period().unwrap(), (1, 1, 1));
        assert!(g.evaluate(1));
        assert!(!g.evaluate(0));
        assert!(!g.negate().evaluate(5));
    }

    #[test]
    fn parity_guard() {
        // MOD(x, 2) = 0: the scan shrinks the threshold all the way to 0.
        let g = GuardExpr::new(Pred::cmp(CmpOp::Eq, Expr::modulo(x(), Expr::int(2))));
        assert_eq!(g.threshold_and_period().unwrap(), (0, 2, 2));
        assert!(g.evaluate(-4));
        assert!(!g.evaluate(-3));
    }

    #[test]
    fn floor_division_guard() {
        // DIV(x, 3) - 1 > 0 is exactly x >= 6.
        let g = GuardExpr::new(Pred::cmp(
            CmpOp::Gt,
            Expr::sub(Expr::div(x(), Expr::int(3)), Expr::int(1)),
        ));
        assert_eq!(g.threshold_and_period().unwrap(), (6, 1, 1));
        assert!(g.evaluate(6));
        assert!(!g.evaluate(5));
    }

    #[test]
    fn minimization_is_idempotent() {
        let g = GuardExpr::new(Pred::cmp(CmpOp::Eq, Expr::modulo(x(), Expr::int(2))));
        let (t, pp, pn) = g.threshold_and_period().unwrap();
        let again = minimize_threshold_and_period(t, pp.lcm(&pn), |v| Ok(g.evaluate(v))).unwrap();
        assert_eq!(again, (t, pp, pn));
    }

    #[test]
    fn multi_variable_guard_is_rejected() {
        let p = Pred::cmp(CmpOp::Gt, Expr::add(vec![x(), Expr::var("y")]));
        assert!(matches!(
            predicate_threshold_and_period(&p),
            Err(SymbolicError::UnsupportedArity(2))
        ));
    }

    #[test]
    fn mismatched_divisors_are_rejected() {
        let p = Pred::cmp(
            CmpOp::Eq,
            Expr::add(vec![
                Expr::modulo(x(), Expr::int(2)),
                Expr::modulo(x(), Expr::int(3)),
            ]),
        );
        assert!(matches!(
            predicate_threshold_and_period(&p),
            Err(SymbolicError::Nonuniform(..))
        ));
    }

    #[test]
    fn minimum_period_of_sequences() {
        assert_eq!(find_minimum_period(&[true, false, true, false]), 2);
        assert_eq!(find_minimum_period(&[true, true, true]), 1);
        assert_eq!(find_minimum_period(&[true, false, false]), 3);
        assert_eq!(find_minimum_period(&[]), 0);
    }

    #[test]
    fn periodicity_holds_beyond_threshold() {
        let guards = [
            GuardExpr::new(Pred::cmp(CmpOp::Eq, Expr::modulo(x(), Expr::int(3)))),
            GuardExpr::new(Pred::cmp(
                CmpOp::Gt,
                Expr::sub(Expr::div(x(), Expr::int(2)), Expr::int(4)),
            )),
            GuardExpr::new(Pred::cmp(CmpOp::Ge, Expr::sub(x(), Expr::int(7)))),
        ];
        let mut rng = rand::thread_rng();
        for g in &guards {
            let (t, pp, pn) = g.threshold_and_period().unwrap();
            for _ in 0..200 {
                let above: i64 = rng.gen_range(t + 1..t + 500);
                assert_eq!(g.evaluate(above), g.evaluate(above + pp));
                let below: i64 = -rng.gen_range(t + 1..t + 500);
                assert_eq!(g.evaluate(below), g.evaluate(below - pn));
            }
        }
    }
}
