//! Regular Markov chain: the periodic tail in QBD form
//!
//! Beyond the global threshold the induced Markov chain is periodic, so one
//! *level* (`period · |states|` consecutive chain states) describes the
//! whole tail. Three square rational matrices capture it:
//!
//! - `A`: level `ℓ+1 → ℓ` (toward the irregular kernel),
//! - `B`: level `ℓ → ℓ` (within a level),
//! - `C`: level `ℓ → ℓ+1` (away from the kernel).
//!
//! On top of the matrices this module computes:
//!
//! - the **boolean return matrix** `R`, the least fixpoint of
//!   `R = A ∨ B·R ∨ C·R·R`: `R[i][j]` says a downward excursion entered at
//!   level-1 column `i` can first re-enter level 0 at column `j`;
//! - a floating-point iterate of the same recurrence (diagnostic only, the
//!   boolean version is authoritative);
//! - the **SCC categorization** of the wrapped three-level abstract chain,
//!   with exact stationary distributions deciding whether a bottom
//!   component drifts toward the kernel (0), away from it (2), or neither
//!   (1, the null-recurrent case);
//! - the **runway**: a finite corridor of `3W` levels used to find level-1
//!   states that are trapped away from both barriers or can never escape to
//!   the right.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use num_traits::{One, ToPrimitive, Zero};
use tracing::{info, warn};

use crate::pts::Pts;
use crate::{Rat, StateId};

/// Tolerance of the diagnostic numeric iteration.
const NUMERIC_TOL: f64 = 1e-8;
/// Iteration cap of the diagnostic numeric iteration.
const NUMERIC_MAX_ITER: usize = 50_000;

/// Failures of the regular-chain analysis.
#[derive(Debug, thiserror::Error)]
pub enum RmcError {
    #[error("stationary distribution of a bottom component is not unique")]
    IndeterminateBscc,
    #[error("a bottom component admits no stationary distribution")]
    NoStationary,
}

/// Which tail of the counter axis the chain describes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
        }
    }
}

// ============================================================================
// Matrices
// ============================================================================

/// Dense square matrix of exact rationals.
#[derive(Clone, Debug, PartialEq)]
pub struct RatMatrix {
    width: usize,
    data: Vec<Rat>,
}

impl RatMatrix {
    fn zeros(width: usize) -> Self {
        Self {
            width,
            data: vec![Rat::zero(); width * width],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn get(&self, i: usize, j: usize) -> &Rat {
        &self.data[i * self.width + j]
    }

    fn set(&mut self, i: usize, j: usize, v: Rat) {
        self.data[i * self.width + j] = v;
    }
}

/// Dense square boolean matrix over the boolean semiring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoolMatrix {
    width: usize,
    data: Vec<bool>,
}

impl BoolMatrix {
    pub fn zeros(width: usize) -> Self {
        Self {
            width,
            data: vec![false; width * width],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn get(&self, i: usize, j: usize) -> bool {
        self.data[i * self.width + j]
    }

    pub fn set(&mut self, i: usize, j: usize, v: bool) {
        self.data[i * self.width + j] = v;
    }

    pub fn or(&self, other: &BoolMatrix) -> BoolMatrix {
        debug_assert_eq!(self.width, other.width);
        BoolMatrix {
            width: self.width,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| *a || *b)
                .collect(),
        }
    }

    /// Boolean semiring product.
    pub fn matmul(&self, other: &BoolMatrix) -> BoolMatrix {
        debug_assert_eq!(self.width, other.width);
        let w = self.width;
        let mut out = BoolMatrix::zeros(w);
        for i in 0..w {
            for k in 0..w {
                if !self.get(i, k) {
                    continue;
                }
                for j in 0..w {
                    if other.get(k, j) {
                        out.set(i, j, true);
                    }
                }
            }
        }
        out
    }
}

// ============================================================================
// Construction
// ============================================================================

/// Level-1 classification produced by the full analysis.
#[derive(Debug)]
pub struct Level1Info {
    /// Level-1 columns whose mass escapes (trapped or drifting outward).
    pub transient: BTreeSet<usize>,
    /// Level-1 columns sitting in a null-recurrent component.
    pub null_recurrent: BTreeSet<usize>,
    /// The boolean return matrix `R`.
    pub reachability: BoolMatrix,
}

/// The periodic tail of the chain in one direction.
#[derive(Debug)]
pub struct Rmc {
    direction: Direction,
    threshold: i64,
    period: i64,
    states_num: usize,
    width: usize,
    a: RatMatrix,
    b: RatMatrix,
    c: RatMatrix,
    a_nz: BTreeSet<(usize, usize)>,
    b_nz: BTreeSet<(usize, usize)>,
    c_nz: BTreeSet<(usize, usize)>,
}

impl Rmc {
    /// Materialize the `A`, `B`, `C` matrices for one direction.
    pub fn new(pts: &Pts, direction: Direction, threshold: i64, period: i64) -> Rmc {
        info!(%direction, threshold, period, "starting creation of regular markov chain");
        let states_num = pts.states_num();
        let width = (period as usize) * states_num;
        let mut rmc = Rmc {
            direction,
            threshold,
            period,
            states_num,
            width,
            a: RatMatrix::zeros(width),
            b: RatMatrix::zeros(width),
            c: RatMatrix::zeros(width),
            a_nz: BTreeSet::new(),
            b_nz: BTreeSet::new(),
            c_nz: BTreeSet::new(),
        };

        let level0: Vec<_> = (0..width).map(|i| rmc.global_state(0, i)).collect();
        let level1: Vec<_> = (0..width).map(|i| rmc.global_state(1, i)).collect();
        let (a, a_nz) = rmc.prob_matrix(pts, &level1, &level0);
        let (b, b_nz) = rmc.prob_matrix(pts, &level1, &level1);
        let (c, c_nz) = rmc.prob_matrix(pts, &level0, &level1);
        rmc.a = a;
        rmc.a_nz = a_nz;
        rmc.b = b;
        rmc.b_nz = b_nz;
        rmc.c = c;
        rmc.c_nz = c_nz;

        info!(%direction, width, "regular markov chain created");
        rmc
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn states_num(&self) -> usize {
        self.states_num
    }

    pub fn matrix_a(&self) -> &RatMatrix {
        &self.a
    }

    pub fn matrix_b(&self) -> &RatMatrix {
        &self.b
    }

    pub fn matrix_c(&self) -> &RatMatrix {
        &self.c
    }

    pub fn nonzeros_b(&self) -> &BTreeSet<(usize, usize)> {
        &self.b_nz
    }

    pub fn nonzeros_c(&self) -> &BTreeSet<(usize, usize)> {
        &self.c_nz
    }

    /// The Markov chain state behind `(level, column)`: the PTS state is the
    /// column modulo `|states|` and the counter value grows outward from
    /// `±(T+1)` as the flattened index crosses whole PTS-state blocks.
    pub fn global_state(&self, level: usize, column: usize) -> (StateId, i64) {
        let num = level * self.width + column;
        let multiple = (num / self.states_num) as i64;
        let remainder = num % self.states_num;
        let value = self.direction.sign() * (self.threshold + 1 + multiple);
        (StateId(remainder), value)
    }

    fn prob_matrix(
        &self,
        pts: &Pts,
        from: &[(StateId, i64)],
        to: &[(StateId, i64)],
    ) -> (RatMatrix, BTreeSet<(usize, usize)>) {
        let mut matrix = RatMatrix::zeros(self.width);
        let mut nonzeros = BTreeSet::new();
        for i in 0..self.width {
            for j in 0..self.width {
                if let Some(p) = pts.mc_transition_prob(from[i], to[j]) {
                    if !p.is_zero() {
                        nonzeros.insert((i, j));
                        matrix.set(i, j, p);
                    }
                }
            }
        }
        (matrix, nonzeros)
    }

    // ------------------------- Reachability -------------------------

    /// Least fixpoint of `R = A ∨ B·R ∨ C·R·R` in the boolean semiring.
    pub fn boolean_reachability(&self) -> BoolMatrix {
        let mut a = BoolMatrix::zeros(self.width);
        for &(i, j) in &self.a_nz {
            a.set(i, j, true);
        }
        let mut b = BoolMatrix::zeros(self.width);
        for &(i, j) in &self.b_nz {
            b.set(i, j, true);
        }
        let mut c = BoolMatrix::zeros(self.width);
        for &(i, j) in &self.c_nz {
            c.set(i, j, true);
        }

        let mut r = BoolMatrix::zeros(self.width);
        loop {
            let rr = r.matmul(&r);
            let next = a.or(&b.matmul(&r)).or(&c.matmul(&rr));
            if next == r {
                return r;
            }
            r = next;
        }
    }

    /// Floating-point iterate of the return-probability recurrence.
    ///
    /// Diagnostic only: the decision procedure never consults it. Returns
    /// the row-major matrix and whether the iteration converged within the
    /// cap; non-convergence is reported as a warning.
    pub fn approximate_reachability(&self) -> (Vec<f64>, bool) {
        let w = self.width;
        let to_float = |m: &RatMatrix| -> Vec<f64> {
            (0..w * w)
                .map(|k| m.data[k].to_f64().unwrap_or(0.0))
                .collect()
        };
        let a = to_float(&self.a);
        let b = to_float(&self.b);
        let c = to_float(&self.c);
        let matmul = |x: &[f64], y: &[f64]| -> Vec<f64> {
            let mut out = vec![0.0; w * w];
            for i in 0..w {
                for k in 0..w {
                    let xik = x[i * w + k];
                    if xik == 0.0 {
                        continue;
                    }
                    for j in 0..w {
                        out[i * w + j] += xik * y[k * w + j];
                    }
                }
            }
            out
        };

        let mut r = vec![0.0; w * w];
        for iteration in 0..NUMERIC_MAX_ITER {
            let rr = matmul(&r, &r);
            let br = matmul(&b, &r);
            let crr = matmul(&c, &rr);
            let mut next = vec![0.0; w * w];
            let mut dist = 0.0f64;
            for k in 0..w * w {
                next[k] = a[k] + br[k] + crr[k];
                let d = next[k] - r[k];
                dist += d * d;
            }
            if dist.sqrt() < NUMERIC_TOL {
                info!(iterations = iteration + 1, "numeric reachability converged");
                return (next, true);
            }
            r = next;
        }
        warn!(
            cap = NUMERIC_MAX_ITER,
            "numeric reachability iteration did not converge"
        );
        (r, false)
    }

    // ------------------------- Abstract chain -------------------------

    /// Entry of the wrapped three-level abstract chain `[[A,B,C]; ×3]`.
    /// Rows collapse modulo the width; the column block selects the matrix.
    fn ac_entry(&self, row: usize, col: usize) -> &Rat {
        let i = row % self.width;
        match col / self.width {
            0 => self.a.get(i, col % self.width),
            1 => self.b.get(i, col % self.width),
            _ => self.c.get(i, col % self.width),
        }
    }

    fn abstract_chain_adjacency(&self) -> Vec<Vec<usize>> {
        let w = self.width;
        let mut adj = vec![Vec::new(); 3 * w];
        for r in 0..3 {
            for &(i, j) in &self.a_nz {
                adj[r * w + i].push(j);
            }
            for &(i, j) in &self.b_nz {
                adj[r * w + i].push(w + j);
            }
            for &(i, j) in &self.c_nz {
                adj[r * w + i].push(2 * w + j);
            }
        }
        adj
    }

    /// Category of one bottom SCC: the level its stationary mass leans
    /// toward (0 kernel-ward, 2 outward, 1 balanced).
    fn bscc_category(&self, component: &[usize]) -> Result<u8, RmcError> {
        if component.len() == 1 {
            return Ok((component[0] / self.width) as u8);
        }
        let n = component.len();
        let mut sub = vec![vec![Rat::zero(); n]; n];
        for (r, &u) in component.iter().enumerate() {
            for (c, &v) in component.iter().enumerate() {
                sub[r][c] = self.ac_entry(u, v).clone();
            }
        }
        let pi = solve_stationary(&sub)?;
        let mut kernel_trend = Rat::zero();
        let mut outward_trend = Rat::zero();
        for (k, &node) in component.iter().enumerate() {
            match node / self.width {
                0 => kernel_trend += &pi[k],
                2 => outward_trend += &pi[k],
                _ => {}
            }
        }
        Ok(match kernel_trend.cmp(&outward_trend) {
            std::cmp::Ordering::Greater => 0,
            std::cmp::Ordering::Less => 2,
            std::cmp::Ordering::Equal => 1,
        })
    }

    /// Per abstract-axis state (the first `W` nodes), the max category of
    /// any bottom SCC reachable from it.
    fn axis_categories(&self) -> Result<Vec<u8>, RmcError> {
        let adj = self.abstract_chain_adjacency();
        let comps = kosaraju_sccs(&adj);
        let ncomps = comps.len();
        let mut comp_of = vec![0usize; adj.len()];
        for (cid, comp) in comps.iter().enumerate() {
            for &node in comp {
                comp_of[node] = cid;
            }
        }
        let mut comp_adj: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); ncomps];
        for (u, outs) in adj.iter().enumerate() {
            for &v in outs {
                if comp_of[u] != comp_of[v] {
                    comp_adj[comp_of[u]].insert(comp_of[v]);
                }
            }
        }

        let mut bottom_cat: BTreeMap<usize, u8> = BTreeMap::new();
        for (cid, comp) in comps.iter().enumerate() {
            if comp_adj[cid].is_empty() {
                bottom_cat.insert(cid, self.bscc_category(comp)?);
            }
        }

        // Propagate along the condensation: each component takes the max
        // category over every bottom it can reach (post-order DP).
        let mut cat = vec![0u8; ncomps];
        let mut state = vec![0u8; ncomps]; // 0 fresh, 1 open, 2 done
        for root in 0..ncomps {
            if state[root] != 0 {
                continue;
            }
            let mut stack = vec![(root, false)];
            while let Some((node, children_done)) = stack.pop() {
                if children_done {
                    let mut best = bottom_cat.get(&node).copied().unwrap_or(0);
                    for &succ in &comp_adj[node] {
                        best = best.max(cat[succ]);
                    }
                    cat[node] = best;
                    state[node] = 2;
                } else {
                    if state[node] != 0 {
                        continue;
                    }
                    state[node] = 1;
                    stack.push((node, true));
                    for &succ in &comp_adj[node] {
                        if state[succ] == 0 {
                            stack.push((succ, false));
                        }
                    }
                }
            }
        }

        Ok((0..self.width).map(|s| cat[comp_of[s]]).collect())
    }

    // ------------------------- Runway -------------------------

    /// Corridor of `3W` levels between the kernel barrier (level 0) and the
    /// escape barrier (level `3W`), closed on the right through the return
    /// matrix. Classifies level-1 columns as trapped (can reach a node from
    /// which neither barrier is reachable) or exits (can never reach the
    /// right barrier).
    fn analyze_runway(&self, reach: &BoolMatrix) -> (BTreeSet<usize>, BTreeSet<usize>) {
        let w = self.width;
        let max_level = 3 * w;
        let nodes = (max_level + 1) * w;
        let node = |level: usize, i: usize| level * w + i;

        let mut radj: Vec<Vec<usize>> = vec![Vec::new(); nodes];
        for &(i, j) in &self.a_nz {
            for k in 0..max_level {
                radj[node(k, j)].push(node(k + 1, i));
            }
        }
        for &(i, j) in &self.b_nz {
            for k in 0..=max_level {
                radj[node(k, j)].push(node(k, i));
            }
        }
        for &(i, j) in &self.c_nz {
            for k in 1..max_level {
                radj[node(k + 1, j)].push(node(k, i));
            }
        }
        for i in 0..w {
            for j in 0..w {
                if reach.get(i, j) {
                    radj[node(max_level - 1, j)].push(node(max_level, i));
                }
            }
        }

        let bfs = |seeds: Vec<usize>| -> Vec<bool> {
            let mut seen = vec![false; nodes];
            let mut queue = std::collections::VecDeque::new();
            for s in seeds {
                if !seen[s] {
                    seen[s] = true;
                    queue.push_back(s);
                }
            }
            while let Some(u) = queue.pop_front() {
                for &v in &radj[u] {
                    if !seen[v] {
                        seen[v] = true;
                        queue.push_back(v);
                    }
                }
            }
            seen
        };

        let reaches_kernel = bfs((0..w).map(|i| node(0, i)).collect());
        let reaches_escape = bfs((0..w).map(|i| node(max_level, i)).collect());
        let trap_seeds: Vec<usize> = (0..nodes)
            .filter(|&v| !reaches_kernel[v] && !reaches_escape[v])
            .collect();
        let reaches_trap = bfs(trap_seeds);

        let mut trapped = BTreeSet::new();
        let mut exits = BTreeSet::new();
        for i in 0..w {
            if reaches_trap[node(1, i)] {
                trapped.insert(i);
            } else if !reaches_escape[node(1, i)] {
                exits.insert(i);
            }
        }
        (trapped, exits)
    }

    // ------------------------- Level-1 classification -------------------------

    /// Full level-1 analysis: SCC categories plus runway classification.
    pub fn level1_info(&self) -> Result<Level1Info, RmcError> {
        info!(direction = %self.direction, "starting analysis of the regular markov chain");
        let axis = self.axis_categories()?;
        let reach = self.boolean_reachability();
        let (trapped, exits) = self.analyze_runway(&reach);
        info!(
            direction = %self.direction,
            trapped = trapped.len(),
            exits = exits.len(),
            "runway analysis completed"
        );

        let mut transient = trapped.clone();
        let mut null_recurrent = BTreeSet::new();
        for (s, category) in axis.iter().enumerate() {
            if trapped.contains(&s) || exits.contains(&s) {
                continue;
            }
            match category {
                2 => {
                    transient.insert(s);
                }
                1 => {
                    null_recurrent.insert(s);
                }
                _ => {}
            }
        }
        info!(direction = %self.direction, "regular markov chain analysis completed");
        Ok(Level1Info {
            transient,
            null_recurrent,
            reachability: reach,
        })
    }
}

// ============================================================================
// Kosaraju SCCs
// ============================================================================

/// Strongly connected components, iteratively (two DFS passes).
fn kosaraju_sccs(adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adj.len();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    for start in 0..n {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(frame) = stack.last_mut() {
            let (node, idx) = *frame;
            if idx < adj[node].len() {
                frame.1 += 1;
                let next = adj[node][idx];
                if !visited[next] {
                    visited[next] = true;
                    stack.push((next, 0));
                }
            } else {
                order.push(node);
                stack.pop();
            }
        }
    }

    let mut radj: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (u, outs) in adj.iter().enumerate() {
        for &v in outs {
            radj[v].push(u);
        }
    }

    let mut assigned = vec![false; n];
    let mut comps = Vec::new();
    for &start in order.iter().rev() {
        if assigned[start] {
            continue;
        }
        let mut comp = Vec::new();
        let mut stack = vec![start];
        assigned[start] = true;
        while let Some(u) = stack.pop() {
            comp.push(u);
            for &v in &radj[u] {
                if !assigned[v] {
                    assigned[v] = true;
                    stack.push(v);
                }
            }
        }
        comps.push(comp);
    }
    comps
}

// ============================================================================
// Stationary distributions
// ============================================================================

/// Solve `π M = π`, `Σ π = 1` exactly by Gauss–Jordan elimination.
///
/// Errors: [`RmcError::IndeterminateBscc`] when the solution space has
/// dimension above zero, [`RmcError::NoStationary`] when the system is
/// inconsistent.
pub(crate) fn solve_stationary(m: &[Vec<Rat>]) -> Result<Vec<Rat>, RmcError> {
    let n = m.len();
    let mut rows: Vec<Vec<Rat>> = Vec::with_capacity(n + 1);
    for i in 0..n {
        let mut row = vec![Rat::zero(); n + 1];
        for (j, m_j) in m.iter().enumerate() {
            row[j] = m_j[i].clone();
        }
        row[i] -= Rat::one();
        rows.push(row);
    }
    rows.push(vec![Rat::one(); n + 1]);

    let mut pivot_of_col: Vec<Option<usize>> = vec![None; n];
    let mut pivot_row = 0usize;
    for col in 0..n {
        let Some(r) = (pivot_row..rows.len()).find(|&r| !rows[r][col].is_zero()) else {
            continue;
        };
        rows.swap(pivot_row, r);
        let p = rows[pivot_row][col].clone();
        for c in col..=n {
            let v = rows[pivot_row][c].clone() / p.clone();
            rows[pivot_row][c] = v;
        }
        for r2 in 0..rows.len() {
            if r2 == pivot_row || rows[r2][col].is_zero() {
                continue;
            }
            let factor = rows[r2][col].clone();
            for c in col..=n {
                let v = rows[r2][c].clone() - factor.clone() * rows[pivot_row][c].clone();
                rows[r2][c] = v;
            }
        }
        pivot_of_col[col] = Some(pivot_row);
        pivot_row += 1;
    }

    // A zero row with non-zero right-hand side means no solution at all.
    for row in rows.iter().skip(pivot_row) {
        if row[..n].iter().all(Rat::is_zero) && !row[n].is_zero() {
            return Err(RmcError::NoStationary);
        }
    }
    let mut pi = vec![Rat::zero(); n];
    for (col, pivot) in pivot_of_col.iter().enumerate() {
        match pivot {
            Some(r) => pi[col] = rows[*r][n].clone(),
            None => return Err(RmcError::IndeterminateBscc),
        }
    }
    Ok(pi)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::pts::Pts;
    use crate::transform::normalize;

    fn compile(src: &str) -> Pts {
        let (mut prog, mut table, ann) = parse(src).unwrap();
        normalize(&mut prog, &mut table, ann).unwrap();
        Pts::build(&prog).unwrap()
    }

    fn rmc_pair(pts: &Pts) -> (Rmc, Rmc) {
        let (t, pp, pn) = pts.threshold_and_periods().unwrap();
        (
            Rmc::new(pts, Direction::Forward, t, pp),
            Rmc::new(pts, Direction::Backward, t, pn),
        )
    }

    const SYMMETRIC: &str = "int x = 1;\nwhile (x > 0) { { x := x + 1 } [1/2] { x := x - 1 } }";
    const DOWNWARD: &str = "int x = 1;\nwhile (x > 0) { { x := x - 1 } [2/3] { x := x + 1 } }";

    fn rat(n: i64, d: i64) -> Rat {
        Rat::new(n.into(), d.into())
    }

    #[test]
    fn row_masses_are_bounded_by_one() {
        let pts = compile(SYMMETRIC);
        for rmc in [rmc_pair(&pts).0, rmc_pair(&pts).1] {
            for i in 0..rmc.width() {
                let mut sum = Rat::zero();
                for j in 0..rmc.width() {
                    sum += rmc.matrix_a().get(i, j);
                    sum += rmc.matrix_b().get(i, j);
                    sum += rmc.matrix_c().get(i, j);
                }
                assert!(sum <= Rat::one(), "row {i} exceeds one: {sum}");
                assert!(sum.is_one(), "regular rows carry full mass, got {sum}");
            }
        }
    }

    #[test]
    fn boolean_reachability_is_a_fixpoint() {
        let pts = compile(SYMMETRIC);
        let (fwd, bwd) = rmc_pair(&pts);
        for rmc in [fwd, bwd] {
            let r = rmc.boolean_reachability();
            let mut a = BoolMatrix::zeros(rmc.width());
            for &(i, j) in &rmc.a_nz {
                a.set(i, j, true);
            }
            let mut b = BoolMatrix::zeros(rmc.width());
            for &(i, j) in &rmc.b_nz {
                b.set(i, j, true);
            }
            let mut c = BoolMatrix::zeros(rmc.width());
            for &(i, j) in &rmc.c_nz {
                c.set(i, j, true);
            }
            let rhs = a.or(&b.matmul(&r)).or(&c.matmul(&r.matmul(&r)));
            assert_eq!(r, rhs);
        }
    }

    #[test]
    fn symmetric_walk_has_null_recurrent_levels() {
        let pts = compile(SYMMETRIC);
        let (fwd, _) = rmc_pair(&pts);
        let info = fwd.level1_info().unwrap();
        assert!(!info.null_recurrent.is_empty());
        assert!(info.transient.is_empty());
    }

    #[test]
    fn downward_walk_is_positive_recurrent() {
        let pts = compile(DOWNWARD);
        let (fwd, _) = rmc_pair(&pts);
        let info = fwd.level1_info().unwrap();
        assert!(info.null_recurrent.is_empty());
        assert!(info.transient.is_empty());
    }

    #[test]
    fn upward_walk_is_transient() {
        let pts = compile("int x = 1;\nwhile (x > 0) { { x := x + 1 } [2/3] { x := x - 1 } }");
        let (fwd, _) = rmc_pair(&pts);
        let info = fwd.level1_info().unwrap();
        assert!(!info.transient.is_empty());
        assert!(info.null_recurrent.is_empty());
    }

    #[test]
    fn numeric_iterate_stays_in_range() {
        let pts = compile(DOWNWARD);
        let (fwd, _) = rmc_pair(&pts);
        let (approx, converged) = fwd.approximate_reachability();
        assert!(converged);
        for v in approx {
            assert!((0.0..=1.0 + 1e-6).contains(&v));
        }
    }

    #[test]
    fn stationary_of_a_two_cycle() {
        let m = vec![
            vec![Rat::zero(), Rat::one()],
            vec![Rat::one(), Rat::zero()],
        ];
        let pi = solve_stationary(&m).unwrap();
        assert_eq!(pi, vec![rat(1, 2), rat(1, 2)]);
    }

    #[test]
    fn stationary_of_a_biased_three_state_chain() {
        // 0 -> 1, 1 -> 0 w.p. 2/3 and 1 -> 2 w.p. 1/3, 2 -> 1.
        let m = vec![
            vec![Rat::zero(), Rat::one(), Rat::zero()],
            vec![rat(2, 3), Rat::zero(), rat(1, 3)],
            vec![Rat::zero(), Rat::one(), Rat::zero()],
        ];
        let pi = solve_stationary(&m).unwrap();
        assert_eq!(pi, vec![rat(1, 3), rat(1, 2), rat(1, 6)]);
    }

    #[test]
    fn identity_chain_is_indeterminate() {
        let m = vec![
            vec![Rat::one(), Rat::zero()],
            vec![Rat::zero(), Rat::one()],
        ];
        assert!(matches!(
            solve_stationary(&m),
            Err(RmcError::IndeterminateBscc)
        ));
    }

    #[test]
    fn kosaraju_on_a_small_graph() {
        // 0 <-> 1, 2 alone, 1 -> 2.
        let adj = vec![vec![1], vec![0, 2], vec![]];
        let mut comps = kosaraju_sccs(&adj);
        for c in comps.iter_mut() {
            c.sort_unstable();
        }
        comps.sort();
        assert_eq!(comps, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn global_states_walk_outward() {
        let pts = compile(SYMMETRIC);
        let (fwd, bwd) = rmc_pair(&pts);
        let s = pts.states_num();
        // Level 0 starts right beyond the threshold.
        assert_eq!(fwd.global_state(0, 0), (StateId(0), 2));
        assert_eq!(fwd.global_state(0, s - 1), (StateId(s - 1), 2));
        assert_eq!(fwd.global_state(1, 0), (StateId(0), 3));
        assert_eq!(bwd.global_state(0, 0), (StateId(0), -2));
        assert_eq!(bwd.global_state(1, 1), (StateId(1), -3));
    }
}
