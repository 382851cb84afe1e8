//! Per-batch bookkeeping of selected leaves.
//!
//! Each selector owns one `SelectedNodesSet`, reset at the start of its
//! batch. Leaves stream in from collection passes and are partitioned:
//! network-bound, immediately resolvable, cache-only overshoot, or
//! ignored duplicates of the peer selector's in-flight batch. Immediates
//! are applied synchronously as they arrive; everything else waits for
//! the apply barrier.

use game_core::{EncodedPosition, Position};
use rustc_hash::FxHashSet;

use crate::backup;
use crate::error::SearchError;
use crate::node::NodeIndex;
use crate::params::SearchParams;
use crate::tree::Tree;

/// One selected leaf: where it is, how many visits it carries, and the
/// network input captured while the position was in hand.
#[derive(Debug, Clone)]
pub struct SelectedLeaf {
    pub index: NodeIndex,
    pub visit_count: u32,
    pub encoded: Option<EncodedPosition>,
}

pub struct SelectedNodesSet {
    selector_id: usize,
    nodes_nn: Vec<SelectedLeaf>,
    nodes_immediate: Vec<SelectedLeaf>,
    cache_only: Vec<SelectedLeaf>,
    membership: FxHashSet<u32>,
    max_nodes_nn: usize,
    num_ignored: u32,
    num_attempted: u32,
    num_new_nondup: u32,
}

impl SelectedNodesSet {
    pub fn new(selector_id: usize) -> Self {
        Self {
            selector_id,
            nodes_nn: Vec::new(),
            nodes_immediate: Vec::new(),
            cache_only: Vec::new(),
            membership: FxHashSet::default(),
            max_nodes_nn: 0,
            num_ignored: 0,
            num_attempted: 0,
            num_new_nondup: 0,
        }
    }

    #[inline]
    pub fn selector_id(&self) -> usize {
        self.selector_id
    }

    /// Start a new batch with the given network budget.
    pub fn reset(&mut self, max_nodes_nn: usize) {
        self.nodes_nn.clear();
        self.nodes_immediate.clear();
        self.cache_only.clear();
        self.membership.clear();
        self.max_nodes_nn = max_nodes_nn;
        self.num_ignored = 0;
        self.num_attempted = 0;
        self.num_new_nondup = 0;
    }

    /// Whether `index` is in this set's network partition. The peer
    /// selector consults this for deduplication.
    #[inline]
    pub fn contains(&self, index: NodeIndex) -> bool {
        self.membership.contains(&index.raw())
    }

    pub(crate) fn note_attempts(&mut self, attempts: u32) {
        self.num_attempted += attempts;
    }

    /// Classify freshly collected leaves and apply the immediately
    /// resolvable ones in place.
    pub(crate) fn add_selected<P: Position>(
        &mut self,
        tree: &mut Tree<P>,
        leaves: Vec<SelectedLeaf>,
        peer: Option<&SelectedNodesSet>,
        params: &SearchParams,
    ) -> Result<(), SearchError> {
        for leaf in leaves {
            let (evaluated, terminal, linked) = {
                let node = &tree.store[leaf.index];
                (node.is_evaluated(), node.terminal().is_terminal(), node.is_linked())
            };

            // Duplicate of a leaf the peer batch is already evaluating.
            if !evaluated
                && !terminal
                && !linked
                && peer.is_some_and(|p| p.contains(leaf.index))
            {
                backup::abandon_visit(tree, leaf.index, self.selector_id, leaf.visit_count);
                self.num_ignored += 1;
                continue;
            }

            self.num_new_nondup += 1;

            if terminal || evaluated || linked {
                backup::apply_visit(tree, &leaf, self.selector_id, params)?;
                self.nodes_immediate.push(leaf);
            } else if self.nodes_nn.len() < self.max_nodes_nn {
                self.membership.insert(leaf.index.raw());
                self.nodes_nn.push(leaf);
            } else {
                self.cache_only.push(leaf);
            }
        }
        Ok(())
    }

    /// Append a padding entry straight to the cache-only partition.
    /// Padding never descends, so it carries no visits to revert.
    pub(crate) fn add_cache_only_padding(&mut self, leaf: SelectedLeaf) {
        debug_assert_eq!(leaf.visit_count, 0);
        self.cache_only.push(leaf);
    }

    #[inline]
    pub fn nodes_nn(&self) -> &[SelectedLeaf] {
        &self.nodes_nn
    }

    #[inline]
    pub fn nodes_immediate(&self) -> &[SelectedLeaf] {
        &self.nodes_immediate
    }

    #[inline]
    pub fn cache_only(&self) -> &[SelectedLeaf] {
        &self.cache_only
    }

    pub(crate) fn take_for_apply(&mut self) -> (Vec<SelectedLeaf>, Vec<SelectedLeaf>) {
        self.membership.clear();
        (
            std::mem::take(&mut self.nodes_nn),
            std::mem::take(&mut self.cache_only),
        )
    }

    /// Encoded inputs for the evaluator: network partition first, then
    /// the cache-only overshoot, preserving order.
    pub(crate) fn collect_encodings(&self) -> Vec<EncodedPosition> {
        self.nodes_nn
            .iter()
            .chain(self.cache_only.iter())
            .map(|leaf| {
                leaf.encoded
                    .clone()
                    .expect("network-bound leaf collected without encoding")
            })
            .collect()
    }

    /// Visits recorded in this set but not yet applied.
    pub fn pending_visits(&self) -> u64 {
        self.nodes_nn
            .iter()
            .chain(self.cache_only.iter())
            .map(|l| u64::from(l.visit_count))
            .sum()
    }

    #[inline]
    pub fn num_ignored(&self) -> u32 {
        self.num_ignored
    }

    #[inline]
    pub fn num_cache_only(&self) -> u32 {
        self.cache_only.len() as u32
    }

    #[inline]
    pub fn num_new_leafs_added_non_duplicates(&self) -> u32 {
        self.num_new_nondup
    }

    #[inline]
    pub fn num_attempted(&self) -> u32 {
        self.num_attempted
    }

    /// Non-duplicate fraction of attempted descents, in `[0, 1]`.
    pub fn yield_fraction(&self) -> f32 {
        if self.num_attempted == 0 {
            return 0.0;
        }
        self.num_new_nondup as f32 / self.num_attempted as f32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes_nn.is_empty() && self.nodes_immediate.is_empty() && self.cache_only.is_empty()
    }
}
