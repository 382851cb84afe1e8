//! The search tree: node store, root, transposition index, eval cache,
//! and the search-wide counters.

use game_core::{MoveCode, Position};

use crate::cache::EvalCache;
use crate::error::SearchError;
use crate::node::{NodeIndex, Terminal};
use crate::params::SearchParams;
use crate::store::NodeStore;
use crate::transposition::TranspositionIndex;

pub struct Tree<P: Position> {
    pub(crate) store: NodeStore,
    pub(crate) root: NodeIndex,
    pub(crate) root_position: P,
    pub(crate) transpositions: TranspositionIndex,
    pub(crate) cache: EvalCache,

    /// Descents started, including collisions and ignored duplicates.
    pub(crate) visits_attempted: u64,
    /// Visits actually applied to the tree.
    pub(crate) visits_applied: u64,
    /// Non-duplicate fraction of the most recent collection pass.
    pub(crate) last_batch_yield: f32,
    /// Positions sent to the network evaluator.
    pub(crate) nn_evaluations: u64,
}

impl<P: Position> Tree<P> {
    pub fn new(root_position: P, params: &SearchParams) -> Result<Self, SearchError> {
        let mut store = NodeStore::new(params.arena_capacity, params.use_large_pages);
        let root = store.allocate_root().map_err(SearchError::Store)?;

        let record = store.get_mut(root);
        record.zobrist = root_position.zobrist();
        record.materialized = true;
        record.terminal = match root_position.outcome() {
            Some(game_core::GameOutcome::Checkmate) => Terminal::CheckmateLoss,
            Some(game_core::GameOutcome::Stalemate) => Terminal::Stalemate,
            None if root_position.is_rule_draw() => Terminal::Stalemate,
            None => Terminal::None,
        };
        if record.terminal.is_terminal() {
            record.v = record.terminal.value();
            let (w, l) = record.terminal.wdl();
            record.win_p = w;
            record.loss_p = l;
            record.evaluated = true;
        }

        Ok(Self {
            store,
            root,
            root_position,
            transpositions: TranspositionIndex::new(params.tt_staging_capacity),
            cache: EvalCache::new(params.eval_cache_capacity),
            visits_attempted: 0,
            visits_applied: 0,
            last_batch_yield: 0.0,
            nn_evaluations: 0,
        })
    }

    #[inline]
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    #[inline]
    pub fn root_position(&self) -> &P {
        &self.root_position
    }

    #[inline]
    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    #[inline]
    pub fn root_n(&self) -> u32 {
        self.store[self.root].n
    }

    pub fn nn_evaluations(&self) -> u64 {
        self.nn_evaluations
    }

    pub fn visits_attempted(&self) -> u64 {
        self.visits_attempted
    }

    pub fn visits_applied(&self) -> u64 {
        self.visits_applied
    }

    pub fn last_batch_yield(&self) -> f32 {
        self.last_batch_yield
    }

    /// Per-move visit counts at the root, in policy order.
    pub fn visit_counts(&self) -> Vec<(MoveCode, u32)> {
        let root = &self.store[self.root];
        if !root.is_expanded() {
            return Vec::new();
        }
        (0..root.num_policy_moves)
            .map(|i| {
                let child = &self.store[root.child_index(i)];
                (root.policy[i as usize].mv, child.n)
            })
            .collect()
    }

    /// Most-visited root move; ties break toward the higher prior, then
    /// the lower policy index.
    pub fn best_move(&self) -> Option<MoveCode> {
        let root = &self.store[self.root];
        if !root.is_expanded() {
            return None;
        }
        let mut best: Option<(u32, f32, MoveCode)> = None;
        for i in 0..root.num_policy_moves {
            let child = &self.store[root.child_index(i)];
            let entry = root.policy[i as usize];
            let better = match best {
                None => true,
                Some((bn, bp, _)) => child.n > bn || (child.n == bn && entry.p > bp),
            };
            if better {
                best = Some((child.n, entry.p, entry.mv));
            }
        }
        best.map(|(_, _, mv)| mv)
    }

    /// Most-visited chain from the root, at most `max_len` moves.
    pub fn principal_variation(&self, max_len: usize) -> Vec<MoveCode> {
        let mut pv = Vec::new();
        let mut idx = self.root;
        while pv.len() < max_len {
            let node = &self.store[idx];
            if !node.is_expanded() {
                break;
            }
            let mut best: Option<(u32, f32, u16)> = None;
            for i in 0..node.num_policy_moves {
                let child = &self.store[node.child_index(i)];
                let entry = node.policy[i as usize];
                let better = match best {
                    None => true,
                    Some((bn, bp, _)) => child.n > bn || (child.n == bn && entry.p > bp),
                };
                if better {
                    best = Some((child.n, entry.p, i));
                }
            }
            let Some((n, _, i)) = best else { break };
            if n == 0 {
                break;
            }
            pv.push(node.policy[i as usize].mv);
            idx = node.child_index(i);
        }
        pv
    }

    /// Root value statistics: `(q, (win, draw, loss), moves_left)`.
    pub fn root_stats(&self) -> (f32, (f32, f32, f32), f32) {
        let root = &self.store[self.root];
        if root.n == 0 {
            return (0.0, (0.0, 0.0, 0.0), 0.0);
        }
        let q = root.q();
        let d = root.d_avg();
        let w = ((1.0 + q - d) / 2.0).clamp(0.0, 1.0);
        let l = (1.0 - w - d).clamp(0.0, 1.0);
        (q, (w, d, l), root.m_avg())
    }

    /// Consistency audit used by tests and debug assertions. Checks the
    /// structural relations that must hold at any apply barrier.
    #[doc(hidden)]
    pub fn audit(&self) -> Result<(), String> {
        for idx in self.store.indices() {
            let node = &self.store[idx];
            // Counters cannot be negative by type; what can go wrong is a
            // leak, visible as nonzero in-flight at a quiet barrier.
            if node.is_expanded() {
                let mut child_sum: u64 = 0;
                for i in 0..node.num_policy_moves {
                    let child = &self.store[node.child_index(i)];
                    if child.parent() != idx {
                        return Err(format!(
                            "child {} of node {} has parent {}",
                            child.parent().raw(),
                            idx.raw(),
                            node.child_index(i).raw()
                        ));
                    }
                    child_sum += u64::from(child.n);
                }
                if u64::from(node.n) < child_sum {
                    return Err(format!(
                        "node {}: n={} < children sum {}",
                        idx.raw(),
                        node.n,
                        child_sum
                    ));
                }
            }
            if node.is_linked() {
                let target = &self.store[node.transposition_root()];
                if target.terminal().is_terminal() {
                    return Err(format!("node {} linked to terminal node", idx.raw()));
                }
                if target.zobrist() != node.zobrist() {
                    return Err(format!("node {} linked across hashes", idx.raw()));
                }
            }
        }
        Ok(())
    }

    /// True when no node carries in-flight visits. Holds between batch
    /// cycles and at search termination.
    #[doc(hidden)]
    pub fn in_flight_drained(&self) -> bool {
        self.store
            .indices()
            .all(|idx| self.store[idx].in_flight_total() == 0)
    }
}
