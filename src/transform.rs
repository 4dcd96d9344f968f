//! Class detection and the k-d → 1-d reductions
//!
//! A multi-variable program is reduced to a single counter before the
//! transition system is built. Detection order on unannotated programs:
//!
//! 1. **Constant**: every guard is one linear comparison and all guards
//!    share the same variable coefficients up to one uniform sign flip. The
//!    counter is the benchmark combination `z_ct = Σ aᵢ·vᵢ`.
//! 2. **Monotone**: every assigned variable moves in one direction only
//!    (one variable may be exempt), and guards are rectangular. Wrap-around
//!    loops inserted after each directional assignment make the program
//!    bounded, which reduces further.
//! 3. Otherwise the program is rejected as unclassified.
//!
//! Annotated programs skip detection: `Bounded` packs the tuple of bounded
//! variables (plus an optional unbounded one on top) into a mixed-radix
//! counter `z_bd`; `CondBounded` first re-centers each tracked variable
//! against the central one and then delegates to `Bounded`.
//!
//! All transforms mutate the program destructively: initial values are
//! recomputed, assignments are rescaled, and every guard in the table is
//! rewritten over the new counter and bound into the syntax tree.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use num_traits::{ToPrimitive, Zero};
use tracing::info;

use crate::guard::{expression_threshold_and_period, GuardExpr};
use crate::parser::{Annotation, BoundedAnn, BoundedVar, CondBoundedAnn};
use crate::program::{Guard, GuardTable, Program, Stmt};
use crate::symbolic::{CmpOp, Expr, Pred, SymbolicError};
use crate::Int;

const Z_CT: &str = "z_ct";
const Z_BD: &str = "z_bd";

/// Failures of classification and reduction.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(
        "the program could not be classified as a 1-d, constant, or monotone PCP, \
         and no usable annotation block was found"
    )]
    Unclassified,
    #[error("unusable annotation: {0}")]
    Annotation(String),
    #[error("arithmetic overflow while rescaling the program")]
    Overflow,
    #[error(transparent)]
    Symbolic(#[from] SymbolicError),
}

/// Reduce `program` to a single counter, binding every guard label.
pub fn normalize(
    program: &mut Program,
    table: &mut GuardTable,
    annotation: Option<Annotation>,
) -> Result<(), TransformError> {
    let dims = program.variables.len();
    if dims > 1 {
        match annotation {
            Some(Annotation::Bounded(ann)) => {
                info!("program classified as bounded {dims}-d PCP");
                convert_bounded(program, table, ann)
            }
            Some(Annotation::CondBounded(ann)) => {
                info!("program classified as conditionally bounded {dims}-d PCP");
                convert_condbounded(program, table, ann)
            }
            None => {
                if let Some(plan) = check_constant(program, table) {
                    info!("program classified as constant {dims}-d PCP");
                    convert_constant(program, table, &plan)
                } else if let Some(plan) = check_monotone(program, table)? {
                    info!("program classified as monotone {dims}-d PCP");
                    convert_monotone(program, table, plan)
                } else {
                    Err(TransformError::Unclassified)
                }
            }
        }
    } else {
        info!("program classified as 1-d PCP");
        bind_guards(&mut program.body, table);
        Ok(())
    }
}

/// Replace every remaining guard label by its bound predicate.
fn bind_guards(block: &mut [Stmt], table: &GuardTable) {
    for stmt in block {
        match stmt {
            Stmt::While { guard, body } => {
                bind_one(guard, table);
                bind_guards(body, table);
            }
            Stmt::If {
                guard,
                then_branch,
                else_branch,
            } => {
                bind_one(guard, table);
                bind_guards(then_branch, table);
                bind_guards(else_branch, table);
            }
            Stmt::Choice { lhs, rhs, .. } => {
                bind_guards(lhs, table);
                bind_guards(rhs, table);
            }
            Stmt::Assign { .. } | Stmt::Skip => {}
        }
    }
}

fn bind_one(guard: &mut Guard, table: &GuardTable) {
    if let Guard::Label(i) = guard {
        let pred = table
            .get(*i)
            .expect("guard labels are assigned from this table")
            .clone();
        *guard = Guard::Expr(GuardExpr::new(pred));
    }
}

fn assigned_vars(block: &[Stmt], out: &mut BTreeMap<String, ()>) {
    for stmt in block {
        match stmt {
            Stmt::Assign { var, .. } => {
                out.insert(var.clone(), ());
            }
            Stmt::While { body, .. } => assigned_vars(body, out),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                assigned_vars(then_branch, out);
                assigned_vars(else_branch, out);
            }
            Stmt::Choice { lhs, rhs, .. } => {
                assigned_vars(lhs, out);
                assigned_vars(rhs, out);
            }
            Stmt::Skip => {}
        }
    }
}

fn checked_mul(a: i64, b: i64) -> Result<i64, TransformError> {
    a.checked_mul(b).ok_or(TransformError::Overflow)
}

fn checked_add(a: i64, b: i64) -> Result<i64, TransformError> {
    a.checked_add(b).ok_or(TransformError::Overflow)
}

// ============================================================================
// Constant PCPs
// ============================================================================

struct ConstantPlan {
    /// Per label, the guard rewritten over `z_ct`.
    bound_preds: Vec<Pred>,
    /// Benchmark coefficients `aᵢ` of the first variable guard.
    bench: BTreeMap<String, Int>,
}

/// Check coefficient consistency across guards: each variable guard must be
/// a single linear comparison whose coefficients equal the benchmark's, or
/// all of them negated (the sign flip records the guard's orientation).
fn check_constant(program: &Program, table: &GuardTable) -> Option<ConstantPlan> {
    let z = Expr::var(Z_CT);
    let mut bound_preds = Vec::with_capacity(table.len());
    let mut bench: Option<BTreeMap<String, Int>> = None;

    for pred in table.iter() {
        if pred.free_vars().is_empty() {
            bound_preds.push(pred.clone());
            continue;
        }
        let Pred::Cmp(op, expr) = pred else {
            return None; // connectives disqualify the class
        };
        let (coeffs, konst) = expr.linear_form()?;
        if coeffs.is_empty() {
            bound_preds.push(pred.clone());
            continue;
        }
        match &bench {
            None => {
                bound_preds.push(Pred::cmp(
                    *op,
                    Expr::add(vec![z.clone(), Expr::Int(konst)]),
                ));
                bench = Some(coeffs);
            }
            Some(bench) => {
                if !coeffs.keys().all(|v| bench.contains_key(v)) {
                    return None;
                }
                let mut reversed = true;
                for (var, coeff) in bench {
                    let cur = coeffs.get(var).cloned().unwrap_or_else(Int::zero);
                    if &cur != coeff {
                        if !(cur == -coeff && reversed) {
                            return None;
                        }
                    } else if !cur.is_zero() {
                        reversed = false;
                    }
                }
                let oriented = if reversed { -konst } else { konst };
                bound_preds.push(Pred::cmp(
                    *op,
                    Expr::add(vec![z.clone(), Expr::Int(oriented)]),
                ));
            }
        }
    }

    let bench = bench?;
    // Every assigned variable needs a benchmark coefficient to rescale by.
    let mut assigned = BTreeMap::new();
    assigned_vars(&program.body, &mut assigned);
    if !assigned.keys().all(|v| bench.contains_key(v)) {
        return None;
    }
    Some(ConstantPlan { bound_preds, bench })
}

fn convert_constant(
    program: &mut Program,
    _table: &mut GuardTable,
    plan: &ConstantPlan,
) -> Result<(), TransformError> {
    let mut init = Int::zero();
    for (var, val) in &program.variables {
        if let Some(coeff) = plan.bench.get(var) {
            init += coeff * Int::from(*val);
        }
    }
    let init = init.to_i64().ok_or(TransformError::Overflow)?;
    rewrite_constant_block(&mut program.body, plan)?;
    program.variables = vec![(Z_CT.to_string(), init)];
    Ok(())
}

fn rewrite_constant_block(block: &mut [Stmt], plan: &ConstantPlan) -> Result<(), TransformError> {
    for stmt in block {
        match stmt {
            Stmt::Assign { var, delta } => {
                let coeff = plan
                    .bench
                    .get(var.as_str())
                    .and_then(Int::to_i64)
                    .ok_or(TransformError::Overflow)?;
                *delta = checked_mul(*delta, coeff)?;
                *var = Z_CT.to_string();
            }
            Stmt::While { guard, body } => {
                bind_from_plan(guard, plan);
                rewrite_constant_block(body, plan)?;
            }
            Stmt::If {
                guard,
                then_branch,
                else_branch,
            } => {
                bind_from_plan(guard, plan);
                rewrite_constant_block(then_branch, plan)?;
                rewrite_constant_block(else_branch, plan)?;
            }
            Stmt::Choice { lhs, rhs, .. } => {
                rewrite_constant_block(lhs, plan)?;
                rewrite_constant_block(rhs, plan)?;
            }
            Stmt::Skip => {}
        }
    }
    Ok(())
}

fn bind_from_plan(guard: &mut Guard, plan: &ConstantPlan) {
    if let Guard::Label(i) = guard {
        *guard = Guard::Expr(GuardExpr::new(plan.bound_preds[*i].clone()));
    }
}

// ============================================================================
// Monotone PCPs
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Trend {
    Inc,
    Dec,
    Free,
}

struct MonotonePlan {
    trends: BTreeMap<String, Trend>,
    /// Per directional variable: combined `(threshold, period)` over all
    /// guard atoms mentioning it.
    info: BTreeMap<String, (i64, i64)>,
}

/// Infer per-variable trends; at most one variable may change direction.
fn collect_trends(block: &[Stmt], trends: &mut BTreeMap<String, Trend>) -> bool {
    for stmt in block {
        let ok = match stmt {
            Stmt::Assign { var, delta } => {
                let dir = if *delta > 0 { Trend::Inc } else { Trend::Dec };
                match trends.get(var) {
                    None => {
                        trends.insert(var.clone(), dir);
                        true
                    }
                    Some(t) if *t == dir || *t == Trend::Free => true,
                    Some(_) => {
                        if trends.values().any(|t| *t == Trend::Free) {
                            false
                        } else {
                            trends.insert(var.clone(), Trend::Free);
                            true
                        }
                    }
                }
            }
            Stmt::While { body, .. } => collect_trends(body, trends),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => collect_trends(then_branch, trends) && collect_trends(else_branch, trends),
            Stmt::Choice { lhs, rhs, .. } => {
                collect_trends(lhs, trends) && collect_trends(rhs, trends)
            }
            Stmt::Skip => true,
        };
        if !ok {
            return false;
        }
    }
    true
}

/// Check the monotone conditions and gather per-variable thresholds.
fn check_monotone(
    program: &Program,
    table: &GuardTable,
) -> Result<Option<MonotonePlan>, TransformError> {
    let mut trends = BTreeMap::new();
    if !collect_trends(&program.body, &mut trends) {
        return Ok(None);
    }

    let mut gathered: BTreeMap<String, Vec<(i64, i64)>> = trends
        .iter()
        .filter(|(_, t)| matches!(t, Trend::Inc | Trend::Dec))
        .map(|(v, _)| (v.clone(), Vec::new()))
        .collect();

    // Rectangularity: every guard atom mentions at most one variable.
    for pred in table.iter() {
        for expr in pred.atoms() {
            let vars = expr.free_vars();
            if vars.is_empty() {
                continue;
            }
            if vars.len() > 1 {
                return Ok(None);
            }
            let var = vars.iter().next().cloned().unwrap_or_default();
            if let Some(list) = gathered.get_mut(&var) {
                let (t, period_p, period_n) = expression_threshold_and_period(expr, &var)?;
                let period = match trends.get(&var) {
                    Some(Trend::Inc) => period_p,
                    _ => period_n,
                };
                list.push((t, period));
            }
        }
    }

    let mut info = BTreeMap::new();
    for (var, list) in gathered {
        let threshold = list.iter().map(|(t, _)| *t).max().unwrap_or(0);
        let period = list.iter().fold(1i64, |acc, (_, p)| num_integer::lcm(acc, *p));
        info.insert(var, (threshold, period));
    }
    Ok(Some(MonotonePlan { trends, info }))
}

/// After each directional assignment, fold the variable back into its
/// periodic window: `while v > T+π { v := v - π }` (or the mirror image).
fn insert_wraparounds(block: &mut Vec<Stmt>, plan: &MonotonePlan, table: &mut GuardTable) {
    let mut i = 0;
    while i < block.len() {
        match &mut block[i] {
            Stmt::While { body, .. } => insert_wraparounds(body, plan, table),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                insert_wraparounds(then_branch, plan, table);
                insert_wraparounds(else_branch, plan, table);
            }
            Stmt::Choice { lhs, rhs, .. } => {
                insert_wraparounds(lhs, plan, table);
                insert_wraparounds(rhs, plan, table);
            }
            Stmt::Assign { .. } | Stmt::Skip => {}
        }
        let wrap = if let Stmt::Assign { var, .. } = &block[i] {
            let var = var.clone();
            let (t, p) = plan.info.get(&var).copied().unwrap_or((0, 1));
            match plan.trends.get(&var) {
                Some(Trend::Inc) => {
                    let label = table.insert(Pred::cmp(
                        CmpOp::Gt,
                        Expr::sub(Expr::var(&var), Expr::int(t + p)),
                    ));
                    Some(Stmt::While {
                        guard: Guard::Label(label),
                        body: vec![Stmt::assign(&var, -p)],
                    })
                }
                Some(Trend::Dec) => {
                    let label = table.insert(Pred::cmp(
                        CmpOp::Lt,
                        Expr::add(vec![Expr::var(&var), Expr::int(t + p)]),
                    ));
                    Some(Stmt::While {
                        guard: Guard::Label(label),
                        body: vec![Stmt::assign(&var, p)],
                    })
                }
                _ => None,
            }
        } else {
            None
        };
        if let Some(wrap) = wrap {
            block.insert(i + 1, wrap);
            i += 2;
        } else {
            i += 1;
        }
    }
}

fn convert_monotone(
    program: &mut Program,
    table: &mut GuardTable,
    plan: MonotonePlan,
) -> Result<(), TransformError> {
    insert_wraparounds(&mut program.body, &plan, table);

    let mut unbounded = None;
    let mut vars = Vec::new();
    for (name, init) in &program.variables {
        match plan.trends.get(name) {
            Some(Trend::Free) => unbounded = Some(name.clone()),
            None => {
                // Never assigned: the variable is pinned at its initial value.
                vars.push(BoundedVar {
                    name: name.clone(),
                    comp: (-init).max(0),
                    extent: init.abs() + 1,
                });
            }
            Some(Trend::Inc) => {
                let (t, p) = plan.info.get(name).copied().unwrap_or((0, 1));
                let comp = (-init).max(0);
                vars.push(BoundedVar {
                    name: name.clone(),
                    comp,
                    extent: checked_add((*init).max(checked_add(comp, checked_add(t, p)?)?), 1)?,
                });
            }
            Some(Trend::Dec) => {
                let (t, p) = plan.info.get(name).copied().unwrap_or((0, 1));
                let comp = (-init).max(checked_add(t, p)?);
                vars.push(BoundedVar {
                    name: name.clone(),
                    comp,
                    extent: checked_add(comp, 1)?,
                });
            }
        }
    }
    vars.sort_by_key(|v| v.extent);
    convert_bounded(program, table, BoundedAnn { unbounded, vars })
}

// ============================================================================
// Bounded PCPs
// ============================================================================

/// Pack the bounded tuple (and the unbounded variable, if any, on top) into
/// one mixed-radix counter `z_bd` and substitute the digits back into every
/// guard.
fn convert_bounded(
    program: &mut Program,
    table: &mut GuardTable,
    ann: BoundedAnn,
) -> Result<(), TransformError> {
    // Annotation entries for variables that did not survive filtering are
    // silently dropped, as is an absent unbounded variable.
    let vars: Vec<BoundedVar> = ann
        .vars
        .into_iter()
        .filter(|v| program.has_variable(&v.name))
        .collect();
    let unbounded = ann.unbounded.filter(|m| program.has_variable(m));
    for (name, _) in &program.variables {
        let covered =
            unbounded.as_deref() == Some(name.as_str()) || vars.iter().any(|v| v.name == *name);
        if !covered {
            return Err(TransformError::Annotation(format!(
                "variable `{name}` has no bound annotation"
            )));
        }
    }

    let z = Expr::var(Z_BD);
    let mut coeff: BTreeMap<String, i64> = BTreeMap::new();
    let mut subs: BTreeMap<String, Expr> = BTreeMap::new();
    let mut cum_expr = Expr::int(0);
    let mut cum_coeff: i64 = 1;
    let last = vars.len().saturating_sub(1);
    for (i, bv) in vars.iter().enumerate() {
        let next_coeff = checked_mul(cum_coeff, bv.extent)?;
        coeff.insert(bv.name.clone(), cum_coeff);
        let digit = if unbounded.is_none() && i == last {
            // The top digit needs no outer MOD.
            Expr::div(z.clone(), Expr::int(cum_coeff))
        } else {
            Expr::div(
                Expr::sub(
                    Expr::modulo(z.clone(), Expr::int(next_coeff)),
                    cum_expr.clone(),
                ),
                Expr::int(cum_coeff),
            )
        };
        let sub = Expr::sub(digit, Expr::int(bv.comp));
        // Accumulate the already-substituted form so every digit expression
        // closes over z_bd alone.
        cum_expr = Expr::add(vec![
            cum_expr,
            Expr::mul(vec![
                Expr::int(cum_coeff),
                Expr::add(vec![sub.clone(), Expr::int(bv.comp)]),
            ]),
        ]);
        subs.insert(bv.name.clone(), sub);
        cum_coeff = next_coeff;
    }
    if let Some(m) = &unbounded {
        coeff.insert(m.clone(), cum_coeff);
        subs.insert(m.clone(), Expr::div(z.clone(), Expr::int(cum_coeff)));
    }

    let mut init: i64 = 0;
    for bv in &vars {
        let v0 = program.initial_value(&bv.name).unwrap_or(0);
        init = checked_add(init, checked_mul(coeff[&bv.name], checked_add(v0, bv.comp)?)?)?;
    }
    if let Some(m) = &unbounded {
        let v0 = program.initial_value(m).unwrap_or(0);
        init = checked_add(init, checked_mul(coeff[m], v0)?)?;
    }

    rewrite_bounded_block(&mut program.body, table, &coeff, &subs)?;
    program.variables = vec![(Z_BD.to_string(), init)];
    Ok(())
}

fn rewrite_bounded_block(
    block: &mut [Stmt],
    table: &GuardTable,
    coeff: &BTreeMap<String, i64>,
    subs: &BTreeMap<String, Expr>,
) -> Result<(), TransformError> {
    for stmt in block {
        match stmt {
            Stmt::Assign { var, delta } => {
                let k = coeff
                    .get(var.as_str())
                    .copied()
                    .ok_or_else(|| {
                        TransformError::Annotation(format!("variable `{var}` has no slot"))
                    })?;
                *delta = checked_mul(*delta, k)?;
                *var = Z_BD.to_string();
            }
            Stmt::While { guard, body } => {
                substitute_guard(guard, table, subs);
                rewrite_bounded_block(body, table, coeff, subs)?;
            }
            Stmt::If {
                guard,
                then_branch,
                else_branch,
            } => {
                substitute_guard(guard, table, subs);
                rewrite_bounded_block(then_branch, table, coeff, subs)?;
                rewrite_bounded_block(else_branch, table, coeff, subs)?;
            }
            Stmt::Choice { lhs, rhs, .. } => {
                rewrite_bounded_block(lhs, table, coeff, subs)?;
                rewrite_bounded_block(rhs, table, coeff, subs)?;
            }
            Stmt::Skip => {}
        }
    }
    Ok(())
}

fn substitute_guard(guard: &mut Guard, table: &GuardTable, subs: &BTreeMap<String, Expr>) {
    let pred = match guard {
        Guard::Label(i) => table
            .get(*i)
            .expect("guard labels are assigned from this table")
            .clone(),
        Guard::Expr(g) => g.pred().clone(),
    };
    *guard = Guard::Expr(GuardExpr::new(pred.subst(subs)));
}

// ============================================================================
// Conditionally bounded PCPs
// ============================================================================

/// Re-center each tracked variable `v` as `v' = a·v − b·c − C` (bounded in
/// `[-D, D]` by the annotation's promise), co-update it on central steps,
/// and substitute `v = DIV(v' + b·c + C, a)` into the guards. The result is
/// a bounded program with the central variable on top.
fn convert_condbounded(
    program: &mut Program,
    table: &mut GuardTable,
    ann: CondBoundedAnn,
) -> Result<(), TransformError> {
    let central = ann.central;
    if !program.has_variable(&central) {
        return Err(TransformError::Annotation(format!(
            "central variable `{central}` is not a program variable"
        )));
    }
    let tracked: Vec<_> = ann
        .vars
        .into_iter()
        .filter(|v| program.has_variable(&v.name))
        .collect();
    for cv in &tracked {
        if cv.scale < 1 || cv.radius < 0 || cv.name == central {
            return Err(TransformError::Annotation(format!(
                "bad tuple for `{}`: scale must be positive and radius non-negative",
                cv.name
            )));
        }
    }
    for (name, _) in &program.variables {
        if name != &central && !tracked.iter().any(|v| v.name == *name) {
            return Err(TransformError::Annotation(format!(
                "variable `{name}` has no conditional bound annotation"
            )));
        }
    }

    let central_init = program.initial_value(&central).unwrap_or(0);
    for cv in &tracked {
        let v0 = program.initial_value(&cv.name).unwrap_or(0);
        let shifted = checked_add(
            checked_mul(cv.scale, v0)?,
            -checked_add(checked_mul(cv.slope, central_init)?, cv.offset)?,
        )?;
        for (name, val) in program.variables.iter_mut() {
            if name == &cv.name {
                *val = shifted;
            }
        }
    }

    rewrite_condbounded_block(&mut program.body, &tracked, &central)?;

    let mut subs = BTreeMap::new();
    for cv in &tracked {
        subs.insert(
            cv.name.clone(),
            Expr::div(
                Expr::add(vec![
                    Expr::var(&cv.name),
                    Expr::mul(vec![Expr::int(cv.slope), Expr::var(&central)]),
                    Expr::int(cv.offset),
                ]),
                Expr::int(cv.scale),
            ),
        );
    }
    for pred in table.iter_mut() {
        *pred = pred.subst(&subs);
    }

    let vars = tracked
        .iter()
        .map(|cv| {
            Ok(BoundedVar {
                name: cv.name.clone(),
                comp: cv.radius,
                extent: checked_add(checked_mul(2, cv.radius)?, 1)?,
            })
        })
        .collect::<Result<Vec<_>, TransformError>>()?;
    convert_bounded(
        program,
        table,
        BoundedAnn {
            unbounded: Some(central),
            vars,
        },
    )
}

fn rewrite_condbounded_block(
    block: &mut Vec<Stmt>,
    tracked: &[crate::parser::CondVar],
    central: &str,
) -> Result<(), TransformError> {
    let mut i = 0;
    while i < block.len() {
        enum Kind {
            Central(i64),
            Tracked(i64),
            Other,
        }
        let kind = match &block[i] {
            Stmt::Assign { var, delta } if var == central => Kind::Central(*delta),
            Stmt::Assign { var, .. } => {
                let cv = tracked.iter().find(|cv| cv.name == *var).ok_or_else(|| {
                    TransformError::Annotation(format!("variable `{var}` has no slot"))
                })?;
                Kind::Tracked(cv.scale)
            }
            _ => Kind::Other,
        };
        match kind {
            Kind::Central(step) => {
                // Central steps drag every tracked variable along by -b per
                // unit, keeping v' = a·v - b·c - C in its window.
                let mut insert_at = i + 1;
                for cv in tracked {
                    let co = checked_mul(-step, cv.slope)?;
                    if co != 0 {
                        block.insert(insert_at, Stmt::assign(&cv.name, co));
                        insert_at += 1;
                    }
                }
                i = insert_at;
            }
            Kind::Tracked(scale) => {
                if let Stmt::Assign { delta, .. } = &mut block[i] {
                    *delta = checked_mul(*delta, scale)?;
                }
                i += 1;
            }
            Kind::Other => {
                match &mut block[i] {
                    Stmt::While { body, .. } => {
                        rewrite_condbounded_block(body, tracked, central)?
                    }
                    Stmt::If {
                        then_branch,
                        else_branch,
                        ..
                    } => {
                        rewrite_condbounded_block(then_branch, tracked, central)?;
                        rewrite_condbounded_block(else_branch, tracked, central)?;
                    }
                    Stmt::Choice { lhs, rhs, .. } => {
                        rewrite_condbounded_block(lhs, tracked, central)?;
                        rewrite_condbounded_block(rhs, tracked, central)?;
                    }
                    _ => {}
                }
                i += 1;
            }
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn normalized(src: &str) -> Program {
        let (mut prog, mut table, ann) = parse(src).unwrap();
        normalize(&mut prog, &mut table, ann).unwrap();
        prog
    }

    fn guards_are_bound(block: &[Stmt]) -> bool {
        block.iter().all(|stmt| match stmt {
            Stmt::While { guard, body } => {
                matches!(guard, Guard::Expr(_)) && guards_are_bound(body)
            }
            Stmt::If {
                guard,
                then_branch,
                else_branch,
            } => {
                matches!(guard, Guard::Expr(_))
                    && guards_are_bound(then_branch)
                    && guards_are_bound(else_branch)
            }
            Stmt::Choice { lhs, rhs, .. } => guards_are_bound(lhs) && guards_are_bound(rhs),
            _ => true,
        })
    }

    #[test]
    fn one_dimensional_programs_just_bind() {
        let prog = normalized("int x = 1;\nwhile (x > 0) { x := x - 1 }");
        assert_eq!(prog.variables.len(), 1);
        assert!(guards_are_bound(&prog.body));
    }

    #[test]
    fn constant_class_reduces_to_the_benchmark_combination() {
        let prog = normalized(
            "int x = 2; int y = 3;\nwhile (x + y > 0) { { x := x - 1 } [1/2] { y := y - 2 } }",
        );
        // z_ct = x + y with both coefficients 1.
        assert_eq!(prog.variables, vec![(Z_CT.to_string(), 5)]);
        assert!(guards_are_bound(&prog.body));
        let Stmt::While { body, .. } = &prog.body[0] else {
            panic!("expected a while loop");
        };
        let Stmt::Choice { lhs, rhs, .. } = &body[0] else {
            panic!("expected a choice");
        };
        assert!(matches!(&lhs[0], Stmt::Assign { var, delta: -1 } if var == Z_CT));
        assert!(matches!(&rhs[0], Stmt::Assign { var, delta: -2 } if var == Z_CT));
    }

    #[test]
    fn constant_class_falls_through_on_unrelated_guards() {
        // The guards x > 0 and y > 0 carry unrelated coefficient vectors, so
        // the constant check fails and the monotone reduction takes over.
        let prog = normalized(
            "int x = 2; int y = 3;\nwhile (x > 0) { if (y > 0) { y := y - 1 } else { x := x - 1 } }",
        );
        assert_eq!(prog.variables.len(), 1);
        assert_eq!(prog.variables[0].0, Z_BD);
    }

    #[test]
    fn monotone_class_inserts_wraparound_loops() {
        let prog = normalized(
            "int x = 0; int c = 5;\nwhile (c > 0) { if (x < 3) { x := x + 1 } else { skip }; c := c - 1 }",
        );
        // c: threshold 1, period 1, comp = max(-5, 2) = 2, extent 3.
        // x: threshold 4, period 1, comp 0, extent max(0, 0+4+1)+1 = 6.
        // Sorted by extent: kappa_c = 1, kappa_x = 3.
        // init = 1*(5+2) + 3*(0+0) = 7.
        assert_eq!(prog.variables, vec![(Z_BD.to_string(), 7)]);
        assert!(guards_are_bound(&prog.body));
    }

    #[test]
    fn bounded_packing_and_initial_value() {
        let prog = normalized(
            "/*@ Bounded, [x, 0, 3], [y, 0, 3] @*/
             int x = 1; int y = 1;
             while (x > 0) {
                 if (y > 2) { y := y - 1 } else { { x := x - 1 } [1/2] { y := y + 1 } }
             }",
        );
        // kappa_x = 1, kappa_y = 4: z = (x+0) + 4*(y+0) = 1 + 4 = 5.
        assert_eq!(prog.variables, vec![(Z_BD.to_string(), 5)]);
        // All guards close over the packed counter alone.
        assert!(guards_are_bound(&prog.body));
        let Stmt::While { guard, body } = &prog.body[0] else {
            panic!("expected a while loop");
        };
        assert_eq!(guard.expr().var(), Some(Z_BD));
        // y-steps are rescaled by kappa_y.
        let Stmt::If {
            then_branch,
            else_branch,
            ..
        } = &body[0]
        else {
            panic!("expected an if");
        };
        assert!(matches!(&then_branch[0], Stmt::Assign { delta: -4, .. }));
        let Stmt::Choice { lhs, rhs, .. } = &else_branch[0] else {
            panic!("expected a choice");
        };
        assert!(matches!(&lhs[0], Stmt::Assign { delta: -1, .. }));
        assert!(matches!(&rhs[0], Stmt::Assign { delta: 4, .. }));
    }

    #[test]
    fn bounded_digit_guards_evaluate_correctly() {
        let prog = normalized(
            "/*@ Bounded, [x, 0, 3], [y, 0, 3] @*/
             int x = 2; int y = 1;
             while (x > 0 and y > 0) { x := x - 1; y := y - 1 }",
        );
        // z = 2 + 4*1 = 6; the guard must hold exactly when both digits are
        // positive.
        assert_eq!(prog.variables, vec![(Z_BD.to_string(), 6)]);
        let Stmt::While { guard, .. } = &prog.body[0] else {
            panic!("expected a while loop");
        };
        let g = guard.expr();
        assert!(g.evaluate(6)); // x=2, y=1
        assert!(!g.evaluate(4)); // x=0, y=1
        assert!(!g.evaluate(2)); // x=2, y=0
        assert!(g.evaluate(5)); // x=1, y=1
    }

    #[test]
    fn condbounded_recenters_and_packs() {
        let prog = normalized(
            "/*@ CondBounded, c, [v, 1, 1, 0, 1] @*/
             int c = 3; int v = 3;
             while (c > 0 and v > 0) { c := c - 1; v := v - 1 }",
        );
        // v' = v - c starts at 0; kappa_v = 1 (extent 3), central on top with
        // kappa_c = 3: z = (0 + 1) + 3*3 = 10.
        assert_eq!(prog.variables, vec![(Z_BD.to_string(), 10)]);
        assert!(guards_are_bound(&prog.body));
    }

    #[test]
    fn unclassified_without_annotation() {
        // x oscillates and c oscillates: two non-monotone variables, guards
        // with distinct coefficients.
        let (mut prog, mut table, ann) = parse(
            "int x = 1; int c = 1;
             while (x > 0 and c > 0) { x := x + 1; x := x - 1; c := c - 1; c := c + 1 }",
        )
        .unwrap();
        let err = normalize(&mut prog, &mut table, ann).unwrap_err();
        assert!(matches!(err, TransformError::Unclassified));
    }

    #[test]
    fn bounded_annotation_must_cover_all_variables() {
        let (mut prog, mut table, ann) = parse(
            "/*@ Bounded, [x, 0, 3] @*/
             int x = 1; int y = 1;
             while (x > 0 and y > 0) { x := x - 1; y := y - 1 }",
        )
        .unwrap();
        let err = normalize(&mut prog, &mut table, ann).unwrap_err();
        assert!(matches!(err, TransformError::Annotation(_)));
    }

    #[test]
    fn dropped_unbounded_variable_is_tolerated() {
        // M is named in the annotation but appears in no guard, so the
        // parser filters it out; the packing must proceed without it.
        let prog = normalized(
            "/*@ Bounded, M, [x, 0, 2], [y, 0, 2] @*/
             int x = 1; int y = 1; int M = 7;
             while (x > 0 and y > 0) { x := x - 1; y := y - 1; M := M + 1 }",
        );
        assert_eq!(prog.variables[0].0, Z_BD);
        // kappa_x = 1, kappa_y = 3: z = 1 + 3 = 4.
        assert_eq!(prog.variables[0].1, 4);
    }
}
