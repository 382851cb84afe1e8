//! Pre-network leaf evaluation.
//!
//! Every newly reached leaf runs through an ordered pipeline before it is
//! allowed to cost a network call: terminal detection, transposition
//! linkage, then the evaluation cache. The first stage that resolves the
//! leaf wins; unresolved leaves go to the network partition.

use game_core::{GameOutcome, Position, TablebaseOracle, TbOutcome};
use tracing::trace;

use crate::error::StoreError;
use crate::evaluator::NetworkOutput;
use crate::node::{NodeIndex, Terminal};
use crate::params::{SearchParams, TranspositionMode};
use crate::store::NodeStore;
use crate::tree::Tree;

/// Result of the pre-network pipeline for one leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafResolution {
    /// Needs a network evaluation.
    Unresolved,
    /// Resolved without the network: terminal, linked, copied, or cached.
    Resolved,
}

/// Fill in a freshly reached child: hash, terminal state, bookkeeping on
/// the parent. `pos` is the child's position.
pub(crate) fn materialize_child<P: Position, T: TablebaseOracle<P>>(
    tree: &mut Tree<P>,
    idx: NodeIndex,
    pos: &P,
    tablebase: &T,
) {
    let terminal = classify_terminal(pos, tablebase);
    let parent = {
        let node = tree.store.get_mut(idx);
        debug_assert!(!node.materialized);
        node.zobrist = pos.zobrist();
        node.materialized = true;
        node.terminal = terminal;
        if terminal.is_terminal() {
            // Deterministic outputs; no network involvement ever.
            node.v = terminal.value();
            let (w, l) = terminal.wdl();
            node.win_p = w;
            node.loss_p = l;
            node.m_position = 0.0;
            node.evaluated = true;
        }
        node.parent
    };
    if parent.is_some() {
        tree.store.get_mut(parent).num_children_expanded += 1;
    }
}

fn classify_terminal<P: Position, T: TablebaseOracle<P>>(pos: &P, tablebase: &T) -> Terminal {
    match pos.outcome() {
        Some(GameOutcome::Checkmate) => return Terminal::CheckmateLoss,
        Some(GameOutcome::Stalemate) => return Terminal::Stalemate,
        None => {}
    }
    if pos.is_rule_draw() {
        return Terminal::Stalemate;
    }
    match tablebase.probe(pos) {
        Some(TbOutcome::Win) => Terminal::TablebaseWin,
        Some(TbOutcome::Draw) => Terminal::TablebaseDraw,
        Some(TbOutcome::Loss) => Terminal::TablebaseLoss,
        None => Terminal::None,
    }
}

/// Run the evaluator pipeline on a materialized, claimed leaf.
///
/// `slot` is the collecting selector's virtual-loss slot, used for the
/// in-flight linkage gates and for staging the leaf's own hash.
pub(crate) fn run_pre_evaluators<P: Position>(
    tree: &mut Tree<P>,
    idx: NodeIndex,
    params: &SearchParams,
    slot: usize,
) -> LeafResolution {
    // Terminal: decided at materialization.
    if tree.store[idx].terminal.is_terminal() {
        return LeafResolution::Resolved;
    }
    // Revisited leaves can already be linked or evaluated (a linked node
    // stays a leaf until its allowance runs out).
    if tree.store[idx].is_linked() || tree.store[idx].is_evaluated() {
        return LeafResolution::Resolved;
    }

    if let Some(resolution) = try_transposition(tree, idx, params, slot) {
        return resolution;
    }

    let hash = tree.store[idx].zobrist;
    if let Some(output) = tree.cache.lookup(hash) {
        match expand_with_output(&mut tree.store, idx, &output) {
            Ok(()) => {
                tree.transpositions.stage(slot, hash, idx);
                return LeafResolution::Resolved;
            }
            // No room to expand: leave the leaf for the network path,
            // which knows how to abandon visits on exhaustion.
            Err(StoreError::ArenaExhausted { .. }) => {}
        }
    }

    tree.transpositions.stage(slot, hash, idx);
    LeafResolution::Unresolved
}

fn try_transposition<P: Position>(
    tree: &mut Tree<P>,
    idx: NodeIndex,
    params: &SearchParams,
    slot: usize,
) -> Option<LeafResolution> {
    let hash = tree.store[idx].zobrist;
    let target = tree.transpositions.try_get(hash)?;
    if target == idx {
        return None;
    }

    {
        let t = &tree.store[target];
        if t.terminal().is_terminal() || !t.is_evaluated() || t.n() < 1 || t.is_linked() {
            return None;
        }
        if t.zobrist() != hash {
            // First-wins index should never disagree with the node.
            trace!(node = idx.raw(), link = target.raw(), "transposition hash mismatch, skipping");
            return None;
        }
        let other = 1 - slot;
        if t.in_flight(slot) > 0 && !params.in_flight_this_batch_linkage_enabled {
            return None;
        }
        if t.in_flight(other) > 0 && !params.in_flight_other_batch_linkage_enabled {
            return None;
        }
    }

    match params.transposition_mode {
        TranspositionMode::SingleNodeCopy => {
            match copy_from_transposition_root(&mut tree.store, idx, target) {
                Ok(()) => Some(LeafResolution::Resolved),
                Err(StoreError::ArenaExhausted { .. }) => None,
            }
        }
        TranspositionMode::SingleNodeDeferredCopy | TranspositionMode::SharedSubtree => {
            let (usable, _) = probe_chain(&tree.store, target);
            let mut allowance = params
                .max_transposition_root_applications_fixed
                .min(usable)
                .min(tree.store[target].n().min(u32::from(u8::MAX)) as u8);
            if params.max_transposition_root_applications_fraction > 0.0 {
                let frac_cap = (params.max_transposition_root_applications_fraction
                    * tree.store[target].n() as f32)
                    .floor()
                    .max(1.0) as u8;
                allowance = allowance.min(frac_cap);
            }
            if allowance == 0 {
                return None;
            }
            let node = tree.store.get_mut(idx);
            node.transposition_root = target;
            node.pending_transposition_visits = allowance;
            Some(LeafResolution::Resolved)
        }
    }
}

/// Populate a node from a network (or cached) output and allocate its
/// child block.
pub(crate) fn expand_with_output(
    store: &mut NodeStore,
    idx: NodeIndex,
    output: &NetworkOutput,
) -> Result<(), StoreError> {
    let k = output.policy.len() as u16;
    if k > 0 && !store[idx].is_expanded() {
        store.allocate_children(idx, k)?;
    }

    let mut total: f32 = output.policy.iter().map(|&(_, p)| p).sum();
    if !(total > 0.0) {
        total = 1.0;
    }

    let node = store.get_mut(idx);
    node.policy = output
        .policy
        .iter()
        .map(|&(mv, p)| crate::node::PolicyEntry { mv, p: p / total })
        .collect();
    node.num_policy_moves = k;
    node.v = output.value;
    node.win_p = output.win_p;
    node.loss_p = output.loss_p;
    node.m_position = output.moves_left;
    node.evaluated = true;
    Ok(())
}

/// Immediate-copy transposition: duplicate the target's policy and raw
/// outputs into the leaf. No link is recorded.
pub(crate) fn copy_from_transposition_root(
    store: &mut NodeStore,
    idx: NodeIndex,
    target: NodeIndex,
) -> Result<(), StoreError> {
    let k = store[target].num_policy_moves;
    if k > 0 && !store[idx].is_expanded() {
        store.allocate_children(idx, k)?;
    }
    let (policy, v, win_p, loss_p, m_position) = {
        let t = &store[target];
        (t.policy.clone(), t.v, t.win_p, t.loss_p, t.m_position)
    };
    let node = store.get_mut(idx);
    node.policy = policy;
    node.num_policy_moves = k;
    node.v = v;
    node.win_p = win_p;
    node.loss_p = loss_p;
    node.m_position = m_position;
    node.evaluated = true;
    node.transposition_root = NodeIndex::NONE;
    node.pending_transposition_visits = 0;
    Ok(())
}

/// A value sample drawn from a transposition target's subtree.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SubtreeSample {
    pub v: f32,
    pub d: f32,
    pub m: f32,
}

/// Walk the probe chain under `target`: the target itself, its first
/// child, then a grandchild under the first child or the second child.
/// Returns how many samples are drawable and the `(node, sign)` pairs,
/// where sign +1 means the sample is already in the target's perspective.
pub(crate) fn probe_chain(store: &NodeStore, target: NodeIndex) -> (u8, [(NodeIndex, i8); 3]) {
    let mut chain = [(NodeIndex::NONE, 1i8); 3];
    let usable = |idx: NodeIndex| -> bool {
        let node = &store[idx];
        node.is_evaluated() && !node.is_linked() && !node.terminal().is_terminal()
    };

    chain[0] = (target, 1);
    let mut count = 1u8;

    let t = &store[target];
    if !t.is_expanded() || t.num_policy_moves == 0 {
        return (count, chain);
    }
    let c0 = t.child_index(0);
    if !store[c0].materialized || !usable(c0) {
        return (count, chain);
    }
    chain[1] = (c0, -1);
    count = 2;

    let c0_node = &store[c0];
    if c0_node.is_expanded() && c0_node.num_policy_moves > 0 {
        let g = c0_node.child_index(0);
        if store[g].materialized && usable(g) {
            chain[2] = (g, 1);
            return (3, chain);
        }
    }
    if t.num_policy_moves > 1 {
        let c1 = t.child_index(1);
        if store[c1].materialized && usable(c1) {
            chain[2] = (c1, -1);
            return (3, chain);
        }
    }
    (count, chain)
}

/// Draw the `k`-th sample (0-based) for a node linked to `target`.
/// `None` when the chain no longer reaches that deep.
pub(crate) fn subtree_sample(
    store: &NodeStore,
    target: NodeIndex,
    k: u8,
) -> Option<SubtreeSample> {
    let (usable, chain) = probe_chain(store, target);
    if k >= usable {
        return None;
    }
    let (idx, sign) = chain[k as usize];
    let node = &store[idx];
    let d = (1.0 - node.win_p - node.loss_p).clamp(0.0, 1.0);
    Some(SubtreeSample {
        v: f32::from(sign) * node.v,
        d,
        m: node.m_position + f32::from(k),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_core::MoveCode;

    fn output(k: usize, value: f32) -> NetworkOutput {
        NetworkOutput {
            value,
            win_p: value.max(0.0),
            loss_p: (-value).max(0.0),
            moves_left: 12.0,
            policy: (0..k).map(|i| (MoveCode(i as u16), 1.0)).collect(),
        }
    }

    fn store_with_root() -> (NodeStore, NodeIndex) {
        let mut store = NodeStore::new(64, false);
        let root = store.allocate_root().unwrap();
        store.get_mut(root).materialized = true;
        (store, root)
    }

    #[test]
    fn expand_normalizes_priors() {
        let (mut store, root) = store_with_root();
        expand_with_output(&mut store, root, &output(4, 0.5)).unwrap();
        let node = &store[root];
        assert!(node.is_evaluated());
        assert_eq!(node.num_policy_moves(), 4);
        assert!(node.is_expanded());
        let total: f32 = node.policy().iter().map(|e| e.p).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!((node.v - 0.5).abs() < 1e-6);
    }

    #[test]
    fn expand_fails_when_arena_full() {
        let mut store = NodeStore::new(3, false);
        let root = store.allocate_root().unwrap();
        let err = expand_with_output(&mut store, root, &output(5, 0.0)).unwrap_err();
        assert!(matches!(err, StoreError::ArenaExhausted { .. }));
        assert!(!store[root].is_evaluated());
    }

    #[test]
    fn copy_duplicates_policy_and_outputs() {
        let (mut store, root) = store_with_root();
        expand_with_output(&mut store, root, &output(3, -0.25)).unwrap();
        let leaf = store[root].child_index(1);
        store.get_mut(leaf).materialized = true;
        copy_from_transposition_root(&mut store, leaf, root).unwrap();
        let node = &store[leaf];
        assert!(node.is_evaluated());
        assert_eq!(node.num_policy_moves(), 3);
        assert!((node.v + 0.25).abs() < 1e-6);
        assert!(!node.is_linked());
    }

    #[test]
    fn probe_chain_counts_grow_with_subtree() {
        let (mut store, root) = store_with_root();
        // Unevaluated target: only usable via itself once evaluated.
        expand_with_output(&mut store, root, &output(2, 0.3)).unwrap();
        store.get_mut(root).n = 2;
        let (count, _) = probe_chain(&store, root);
        assert_eq!(count, 1);

        // Materialize + evaluate first child: chain reaches 2.
        let c0 = store[root].child_index(0);
        store.get_mut(c0).materialized = true;
        expand_with_output(&mut store, c0, &output(2, -0.1)).unwrap();
        store.get_mut(c0).n = 1;
        let (count, chain) = probe_chain(&store, root);
        assert_eq!(count, 2);
        assert_eq!(chain[1], (c0, -1));

        // Second child usable: chain reaches 3 through it.
        let c1 = store[root].child_index(1);
        store.get_mut(c1).materialized = true;
        expand_with_output(&mut store, c1, &output(1, 0.7)).unwrap();
        let (count, chain) = probe_chain(&store, root);
        assert_eq!(count, 3);
        assert_eq!(chain[2], (c1, -1));

        // A grandchild under the first child takes precedence.
        let g = store[c0].child_index(0);
        store.get_mut(g).materialized = true;
        expand_with_output(&mut store, g, &output(1, 0.9)).unwrap();
        let (count, chain) = probe_chain(&store, root);
        assert_eq!(count, 3);
        assert_eq!(chain[2], (g, 1));
    }

    #[test]
    fn subtree_sample_signs() {
        let (mut store, root) = store_with_root();
        expand_with_output(&mut store, root, &output(2, 0.6)).unwrap();
        let c0 = store[root].child_index(0);
        store.get_mut(c0).materialized = true;
        expand_with_output(&mut store, c0, &output(1, -0.4)).unwrap();

        let s0 = subtree_sample(&store, root, 0).unwrap();
        assert!((s0.v - 0.6).abs() < 1e-6);
        let s1 = subtree_sample(&store, root, 1).unwrap();
        // First child's value is negated into the target's perspective.
        assert!((s1.v - 0.4).abs() < 1e-6);
        assert!(subtree_sample(&store, root, 2).is_none());
    }

    #[test]
    fn chain_skips_linked_subnodes() {
        let (mut store, root) = store_with_root();
        expand_with_output(&mut store, root, &output(2, 0.1)).unwrap();
        let c0 = store[root].child_index(0);
        store.get_mut(c0).materialized = true;
        expand_with_output(&mut store, c0, &output(1, 0.2)).unwrap();
        // Linking the first child makes it unusable as a sample source.
        store.get_mut(c0).transposition_root = root;
        let (count, _) = probe_chain(&store, root);
        assert_eq!(count, 1);
    }
}
