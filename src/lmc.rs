//! Labeled Markov chain: the composite reachability graph
//!
//! Stitches three pieces into one finite graph whose reachability structure
//! decides both termination properties:
//!
//! - the **irregular kernel**: Markov chain states `(pts_state, x)` with
//!   `|x| ≤ T`, connected by evaluating every PTS arc pointwise;
//! - two **regular tails**, one per direction, abstracted to their level-0
//!   and level-1 columns; excursions deeper into a tail are collapsed
//!   through the boolean return matrix `R`;
//! - **boundary stitching** between the kernel frontier at `x = ±T` and the
//!   first regular level at `x = ±(T+1)`.
//!
//! The decision is pure reachability: AST holds iff every state reachable
//! from the initial state can still reach the terminal and none of them is
//! transient; PAST additionally forbids reaching a null-recurrent level-1
//! state.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::info;

use crate::pts::Pts;
use crate::rmc::{Direction, Rmc, RmcError};
use crate::{StateId, Verdict};

/// A vertex of the composite graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Node {
    /// Irregular Markov chain state `(control state, counter value)`.
    Counter(StateId, i64),
    /// Abstract regular state `(direction, level ∈ {0, 1}, column)`.
    Level(Direction, u8, usize),
}

/// The composite graph, built once and then only queried.
#[derive(Debug)]
pub struct Lmc {
    initial: Node,
    terminal: Node,
    nodes: BTreeSet<Node>,
    edges: BTreeMap<Node, BTreeSet<Node>>,
    redges: BTreeMap<Node, BTreeSet<Node>>,
    transient: BTreeSet<Node>,
    null_recurrent: BTreeSet<Node>,
    post: BTreeSet<Node>,
}

impl Lmc {
    pub fn new(
        pts: &Pts,
        threshold: i64,
        forward: &Rmc,
        backward: &Rmc,
    ) -> Result<Lmc, RmcError> {
        info!("starting creation of labeled markov chain");
        let initial = Node::Counter(pts.initial(), pts.init_val());
        let terminal = Node::Counter(pts.terminal(), 0);
        let mut lmc = Lmc {
            initial,
            terminal,
            nodes: BTreeSet::new(),
            edges: BTreeMap::new(),
            redges: BTreeMap::new(),
            transient: BTreeSet::new(),
            null_recurrent: BTreeSet::new(),
            post: BTreeSet::new(),
        };
        lmc.nodes.insert(initial);
        lmc.nodes.insert(terminal);

        lmc.add_irregular_part(pts, threshold);
        lmc.add_regular_part(pts, threshold, forward)?;
        lmc.add_regular_part(pts, threshold, backward)?;

        lmc.post = lmc.descendants_of(lmc.initial);
        lmc.post.insert(lmc.initial);
        info!(nodes = lmc.nodes.len(), "labeled markov chain created");
        Ok(lmc)
    }

    fn add_edge(&mut self, from: Node, to: Node) {
        self.nodes.insert(from);
        self.nodes.insert(to);
        self.edges.entry(from).or_default().insert(to);
        self.redges.entry(to).or_default().insert(from);
    }

    /// Evaluate every PTS arc at every kernel counter value.
    fn add_irregular_part(&mut self, pts: &Pts, threshold: i64) {
        let t = threshold;
        for ((from, to), list) in pts.transitions() {
            for tr in list {
                match tr.delta {
                    0 => {
                        for x in -t..=t {
                            if tr.guard.evaluate(x) {
                                self.add_edge(Node::Counter(*from, x), Node::Counter(*to, x));
                            }
                        }
                    }
                    1 => {
                        for x in -t..t {
                            if tr.guard.evaluate(x) {
                                self.add_edge(Node::Counter(*from, x), Node::Counter(*to, x + 1));
                            }
                        }
                    }
                    -1 => {
                        for x in ((-t + 1)..=t).rev() {
                            if tr.guard.evaluate(x) {
                                self.add_edge(Node::Counter(*from, x), Node::Counter(*to, x - 1));
                            }
                        }
                    }
                    other => unreachable!("non-unit counter update {other}"),
                }
            }
        }
    }

    /// Stitch one regular tail onto the kernel and collapse its excursions.
    fn add_regular_part(
        &mut self,
        pts: &Pts,
        threshold: i64,
        rmc: &Rmc,
    ) -> Result<(), RmcError> {
        let direction = rmc.direction();
        let boundary = direction.sign() * threshold;
        let states = pts.states_num();

        // Kernel frontier <-> first regular level.
        for i in 0..states {
            let level0 = Node::Level(direction, 0, i);
            let regular = rmc.global_state(0, i);
            for j in 0..states {
                let frontier = (StateId(j), boundary);
                if pts.mc_transition_prob(frontier, regular).is_some() {
                    self.add_edge(Node::Counter(StateId(j), boundary), level0);
                }
                if pts.mc_transition_prob(regular, frontier).is_some() {
                    self.add_edge(level0, Node::Counter(StateId(j), boundary));
                }
            }
        }

        // Within the tail: B keeps the level, C enters level 1, and the
        // return matrix collapses whole excursions back to level 0.
        for &(i, j) in rmc.nonzeros_b() {
            self.add_edge(Node::Level(direction, 0, i), Node::Level(direction, 0, j));
        }
        for &(i, j) in rmc.nonzeros_c() {
            self.add_edge(Node::Level(direction, 0, i), Node::Level(direction, 1, j));
        }

        let info = rmc.level1_info()?;
        for i in 0..rmc.width() {
            for j in 0..rmc.width() {
                if info.reachability.get(i, j) {
                    self.add_edge(Node::Level(direction, 1, i), Node::Level(direction, 0, j));
                }
            }
        }
        for i in info.transient {
            self.transient.insert(Node::Level(direction, 1, i));
        }
        for i in info.null_recurrent {
            self.null_recurrent.insert(Node::Level(direction, 1, i));
        }
        Ok(())
    }

    fn descendants_of(&self, from: Node) -> BTreeSet<Node> {
        self.walk(from, &self.edges)
    }

    fn ancestors_of(&self, to: Node) -> BTreeSet<Node> {
        self.walk(to, &self.redges)
    }

    fn walk(&self, start: Node, adjacency: &BTreeMap<Node, BTreeSet<Node>>) -> BTreeSet<Node> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        while let Some(u) = queue.pop_front() {
            if let Some(nexts) = adjacency.get(&u) {
                for &v in nexts {
                    if seen.insert(v) {
                        queue.push_back(v);
                    }
                }
            }
        }
        seen
    }

    /// States reachable from the initial state (including it).
    pub fn reachable(&self) -> &BTreeSet<Node> {
        &self.post
    }

    pub fn initial(&self) -> Node {
        self.initial
    }

    pub fn terminal(&self) -> Node {
        self.terminal
    }

    /// The AST/PAST decision by pure reachability.
    pub fn decide(&self) -> Verdict {
        let mut ancestors = self.ancestors_of(self.terminal);
        ancestors.insert(self.terminal);

        let always_reaches_terminal = self.post.iter().all(|n| ancestors.contains(n));
        let hits_transient = self.post.iter().any(|n| self.transient.contains(n));
        if !always_reaches_terminal || hits_transient {
            return Verdict {
                ast: false,
                past: false,
            };
        }
        let hits_null_recurrent = self.post.iter().any(|n| self.null_recurrent.contains(n));
        Verdict {
            ast: true,
            past: !hits_null_recurrent,
        }
    }
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

    fn build(src: &str) -> (Pts, Lmc) {
        let (mut prog, mut table, ann) = parse(src).unwrap();
        normalize(&mut prog, &mut table, ann).unwrap();
        let pts = Pts::build(&prog).unwrap();
        let (t, pp, pn) = pts.threshold_and_periods().unwrap();
        let fwd = Rmc::new(&pts, Direction::Forward, t, pp);
        let bwd = Rmc::new(&pts, Direction::Backward, t, pn);
        let lmc = Lmc::new(&pts, t, &fwd, &bwd).unwrap();
        (pts, lmc)
    }

    #[test]
    fn countdown_reaches_the_terminal() {
        let (pts, lmc) = build("int x = 3;\nwhile (x > 0) { x := x - 1 }");
        assert_eq!(lmc.initial(), Node::Counter(pts.initial(), 3));
        assert_eq!(lmc.terminal(), Node::Counter(pts.terminal(), 0));
        assert!(lmc.reachable().contains(&lmc.terminal()));
        assert_eq!(
            lmc.decide(),
            Verdict {
                ast: true,
                past: true
            }
        );
    }

    #[test]
    fn kernel_edges_follow_guards() {
        let (pts, lmc) = build("int x = 2;\nwhile (x > 0) { x := x - 1 }");
        // At x = 1 the loop body runs; at x = 0 it exits to the terminal.
        let while_state = pts.initial();
        let assign = StateId(1);
        assert!(lmc.edges[&Node::Counter(while_state, 1)].contains(&Node::Counter(assign, 1)));
        assert!(
            lmc.edges[&Node::Counter(while_state, 0)].contains(&Node::Counter(pts.terminal(), 0))
        );
    }

    #[test]
    fn symmetric_walk_touches_the_forward_tail() {
        let (_, lmc) = build("int x = 1;\nwhile (x > 0) { { x := x + 1 } [1/2] { x := x - 1 } }");
        // The walk can exceed the threshold, so some forward level-0 state
        // must be reachable.
        assert!(lmc
            .reachable()
            .iter()
            .any(|n| matches!(n, Node::Level(Direction::Forward, 0, _))));
        // It never dips below -T with the guard active, so the backward tail
        // stays untouched.
        assert!(!lmc
            .reachable()
            .iter()
            .any(|n| matches!(n, Node::Level(Direction::Backward, _, _))));
    }
}
