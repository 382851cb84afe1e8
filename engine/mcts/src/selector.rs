//! Leaf selection: PUCT descent under virtual loss.
//!
//! A selector repeatedly walks root → leaf, choosing children by
//! `Q + c_puct · P · sqrt(ΣN) / (1 + N)` with in-flight visits counted
//! into `N`, claims the leaf for its slot, and records it for the batch.
//! Two selector slots exist so one batch can be collected while the
//! other's network results are still in flight; the slot id picks which
//! in-flight counter a claim goes to.

use game_core::{Position, TablebaseOracle};

use crate::error::SearchError;
use crate::leaf_eval::{self, LeafResolution};
use crate::node::NodeIndex;
use crate::params::SearchParams;
use crate::selected::SelectedLeaf;
use crate::store::NodeStore;
use crate::tree::Tree;

/// Abandon a pass after this many consecutive collisions; the tree has
/// no more reachable novelty for this batch.
const MAX_CONSECUTIVE_COLLISIONS: u32 = 8;

#[derive(Debug, Default, Clone, Copy)]
pub struct SelectStats {
    /// Descents started.
    pub attempted: u32,
    /// Visits carried by recorded leaves.
    pub collected: u32,
    /// Descents abandoned on a claimed unvisited leaf.
    pub collisions: u32,
}

pub struct LeafSelector {
    pub id: usize,
}

enum Descent {
    Leaf(SelectedLeaf),
    Collision,
}

impl LeafSelector {
    pub fn new(id: usize) -> Self {
        debug_assert!(id < 2);
        Self { id }
    }

    /// Collect up to `target` visits of new leaves into `out`.
    ///
    /// `vl_boost` scales how strongly in-flight visits repel subsequent
    /// descents; the flow raises it when collisions climb.
    pub(crate) fn select_batch<P: Position, T: TablebaseOracle<P>>(
        &self,
        tree: &mut Tree<P>,
        tablebase: &T,
        target: u32,
        vl_boost: f32,
        params: &SearchParams,
        out: &mut Vec<SelectedLeaf>,
    ) -> Result<SelectStats, SearchError> {
        let mut stats = SelectStats::default();
        let max_attempts = target.saturating_mul(4).saturating_add(16);
        let mut consecutive_collisions = 0u32;
        let mut remaining = target;

        while remaining > 0
            && stats.attempted < max_attempts
            && consecutive_collisions < MAX_CONSECUTIVE_COLLISIONS
        {
            stats.attempted += 1;
            let want = remaining.min(params.max_visits_per_descent).max(1);
            match self.descend(tree, tablebase, want, vl_boost, params)? {
                Descent::Leaf(leaf) => {
                    consecutive_collisions = 0;
                    stats.collected += leaf.visit_count;
                    remaining = remaining.saturating_sub(leaf.visit_count);
                    out.push(leaf);
                }
                Descent::Collision => {
                    stats.collisions += 1;
                    consecutive_collisions += 1;
                }
            }
        }

        tree.visits_attempted += u64::from(stats.attempted);
        Ok(stats)
    }

    fn descend<P: Position, T: TablebaseOracle<P>>(
        &self,
        tree: &mut Tree<P>,
        tablebase: &T,
        want: u32,
        vl_boost: f32,
        params: &SearchParams,
    ) -> Result<Descent, SearchError> {
        let mut pos = tree.root_position.clone();
        let mut idx = tree.root;
        let mut visits = want;

        loop {
            let node = &tree.store[idx];

            if node.terminal().is_terminal() {
                return Ok(Descent::Leaf(self.claim(tree, idx, visits, None)));
            }

            if !node.is_evaluated() {
                if node.is_linked() {
                    return Ok(Descent::Leaf(self.claim(tree, idx, visits, None)));
                }
                if node.n() == 0 && node.in_flight_total() > 0 {
                    // Another descent already owns this unvisited leaf.
                    return Ok(Descent::Collision);
                }
                let encoded = match leaf_eval::run_pre_evaluators(tree, idx, params, self.id) {
                    // A network-bound leaf is evaluated once, so it takes
                    // a single visit no matter the descent budget.
                    LeafResolution::Unresolved => {
                        visits = 1;
                        Some(pos.encode())
                    }
                    LeafResolution::Resolved => None,
                };
                return Ok(Descent::Leaf(self.claim(tree, idx, visits, encoded)));
            }

            if !node.is_expanded() || node.num_policy_moves() == 0 {
                // Evaluated but childless (policy came back empty):
                // nothing below to search, revisit it as a leaf.
                return Ok(Descent::Leaf(self.claim(tree, idx, visits, None)));
            }

            let (child_i, allowed) = select_child(&tree.store, idx, vl_boost, params);
            visits = visits.min(allowed).max(1);

            let child_idx = tree.store[idx].child_index(child_i);
            let mv = tree.store[idx].policy()[child_i as usize].mv;
            pos.play(mv)?;
            if !tree.store[child_idx].materialized {
                leaf_eval::materialize_child(tree, child_idx, &pos, tablebase);
            }
            idx = child_idx;
        }
    }

    /// Record the claim: in-flight visits on the leaf and every ancestor
    /// up to the root, in this selector's slot.
    fn claim<P: Position>(
        &self,
        tree: &Tree<P>,
        leaf: NodeIndex,
        visits: u32,
        encoded: Option<game_core::EncodedPosition>,
    ) -> SelectedLeaf {
        let mut idx = leaf;
        loop {
            let node = &tree.store[idx];
            node.add_in_flight(self.id, visits);
            if idx == tree.root || node.parent().is_none() {
                break;
            }
            idx = node.parent();
        }
        SelectedLeaf {
            index: leaf,
            visit_count: visits,
            encoded,
        }
    }
}

/// PUCT child choice for an expanded node.
///
/// Returns the chosen policy index and how many visits the choice stays
/// best for (assuming the runner-up's score is static), so a descent can
/// carry several visits without re-walking the prefix.
fn select_child(
    store: &NodeStore,
    parent: NodeIndex,
    vl_boost: f32,
    params: &SearchParams,
) -> (u16, u32) {
    let node = &store[parent];
    let k = node.num_policy_moves();
    debug_assert!(k > 0);

    let parent_q = if node.n() > 0 { node.q() } else { 0.0 };

    // First-play urgency: unvisited children default to the parent's
    // value reduced by the mass of priors already being explored.
    let mut visited_mass = 0.0f32;
    for i in 0..k {
        let child = &store[node.child_index(i)];
        if child.n() > 0 || child.in_flight_total() > 0 {
            visited_mass += node.policy()[i as usize].p;
        }
    }
    let fpu = parent_q - params.fpu_reduction * visited_mass.sqrt();

    let sum_n = node.n() + node.in_flight_total();
    let sqrt_sum = (sum_n.max(1) as f32).sqrt();

    let mut best_i = 0u16;
    let mut best_score = f32::NEG_INFINITY;
    let mut best_prior = f32::NEG_INFINITY;
    let mut best_q = 0.0f32;
    let mut best_n_eff = 0.0f32;
    let mut second_score = f32::NEG_INFINITY;

    for i in 0..k {
        let child = &store[node.child_index(i)];
        let p = node.policy()[i as usize].p;
        let n_eff = child.n() as f32 + child.in_flight_total() as f32 * vl_boost;
        // Children store their own side's value; the parent sees it
        // negated. NaN (unvisited) falls back to first-play urgency.
        let q = if child.n() > 0 { -child.q() } else { fpu };
        let u = params.c_puct * p * sqrt_sum / (1.0 + n_eff);
        let score = q + u;

        if score > best_score || (score == best_score && p > best_prior) {
            if best_score > second_score {
                second_score = best_score;
            }
            best_i = i;
            best_score = score;
            best_prior = p;
            best_q = q;
            best_n_eff = n_eff;
        } else if score > second_score {
            second_score = score;
        }
    }

    let allowed = if second_score == f32::NEG_INFINITY || second_score <= best_q {
        // Sole candidate, or its plain Q already beats the runner-up's
        // full score: every requested visit can follow this child.
        u32::MAX
    } else {
        let max_n_eff = params.c_puct * best_prior * sqrt_sum / (second_score - best_q) - 1.0;
        let slack = max_n_eff - best_n_eff;
        if slack.is_finite() && slack > 1.0 {
            slack as u32
        } else {
            1
        }
    };

    (best_i, allowed.max(1))
}
