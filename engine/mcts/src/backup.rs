//! Backup: applying evaluated leaves to the tree.
//!
//! Every applied visit walks leaf → root once, adding the visit to `n`,
//! accumulating value/draw/moves-left with the per-ply sign flip, and
//! releasing the in-flight claim the descent took on the same path.
//! Abandoned visits (duplicates, cache-only overshoot, exhaustion) walk
//! the same path but only release the claim.

use game_core::Position;
use tracing::{error, trace};

use crate::error::{SearchError, StoreError};
use crate::evaluator::NetworkOutput;
use crate::leaf_eval;
use crate::node::{NodeIndex, Terminal};
use crate::params::SearchParams;
use crate::selected::{SelectedLeaf, SelectedNodesSet};
use crate::tree::Tree;

/// Release the in-flight claim along leaf → root without applying a
/// visit.
pub(crate) fn abandon_visit<P: Position>(
    tree: &mut Tree<P>,
    leaf: NodeIndex,
    slot: usize,
    visits: u32,
) {
    if visits == 0 {
        return;
    }
    let mut idx = leaf;
    loop {
        let node = &tree.store[idx];
        node.remove_in_flight(slot, visits);
        if idx == tree.root || node.parent().is_none() {
            break;
        }
        idx = node.parent();
    }
}

/// Propagate `visits` visits of `(v, d, m)` from `leaf` to the root.
/// `v` and `m` are in the leaf's side-to-move perspective; the draw
/// probability is perspective-free.
fn propagate<P: Position>(
    tree: &mut Tree<P>,
    leaf: NodeIndex,
    slot: usize,
    visits: u32,
    v: f32,
    d: f32,
    m: f32,
) {
    let leaf_is_mate = tree.store[leaf].terminal() == Terminal::CheckmateLoss;

    let mut idx = leaf;
    let mut v = v;
    let mut m = m;
    let mut steps = 0u32;
    loop {
        let at_root = idx == tree.root;
        let node = tree.store.get_mut(idx);
        node.n += visits;
        node.w_sum += f64::from(v) * f64::from(visits);
        node.d_sum += f64::from(d) * f64::from(visits);
        node.m_sum += f64::from(m) * f64::from(visits);
        node.remove_in_flight(slot, visits);

        // A mated leaf means its parent has mate in one; from here on the
        // parent's visits are deterministic wins.
        if steps == 1 && leaf_is_mate && !node.terminal.is_terminal() {
            node.terminal = Terminal::CheckmateWin;
            node.v = 1.0;
            node.win_p = 1.0;
            node.loss_p = 0.0;
            node.m_position = 1.0;
        }

        if at_root || node.parent.is_none() {
            break;
        }
        idx = node.parent;
        v = -v;
        m += 1.0;
        steps += 1;
    }
    tree.visits_applied += u64::from(visits);
}

/// Apply one resolved leaf (terminal, evaluated, or linked).
pub(crate) fn apply_visit<P: Position>(
    tree: &mut Tree<P>,
    leaf: &SelectedLeaf,
    slot: usize,
    params: &SearchParams,
) -> Result<(), SearchError> {
    if leaf.visit_count == 0 {
        return Ok(());
    }
    let (linked, evaluated, terminal) = {
        let node = &tree.store[leaf.index];
        (node.is_linked(), node.is_evaluated(), node.terminal())
    };

    if linked {
        for _ in 0..leaf.visit_count {
            apply_linked_single(tree, leaf.index, slot, params);
        }
        return Ok(());
    }

    if terminal.is_terminal() || evaluated {
        let (v, d, m) = {
            let node = &tree.store[leaf.index];
            let d = (1.0 - node.win_p - node.loss_p).clamp(0.0, 1.0);
            (node.v, d, node.m_position)
        };
        propagate(tree, leaf.index, slot, leaf.visit_count, v, d, m);
        return Ok(());
    }

    // An unresolved node in the apply path means classification went
    // wrong upstream. Settle the claim with draw-valued visits so the
    // in-flight accounting still balances and the search keeps its
    // results.
    error!(
        node = leaf.index.raw(),
        visits = leaf.visit_count,
        "apply on unresolved node, backing up draws"
    );
    propagate(tree, leaf.index, slot, leaf.visit_count, 0.0, 1.0, 0.0);
    Ok(())
}

/// Serve one visit of a transposition-linked leaf: draw a value from the
/// link target's subtree, or force a permanent copy once the allowance is
/// spent or a sample cannot be resolved.
fn apply_linked_single<P: Position>(
    tree: &mut Tree<P>,
    idx: NodeIndex,
    slot: usize,
    params: &SearchParams,
) {
    let (target, pending, served) = {
        let node = &tree.store[idx];
        (node.transposition_root(), node.pending_transposition_visits, node.n)
    };

    let target_gone = target.is_none()
        || tree.store[target].terminal().is_terminal()
        || tree.store[target].is_linked()
        || tree.store[target].zobrist() != tree.store[idx].zobrist();
    if target_gone {
        // The link target was supposed to stay valid for the life of the
        // link. Clear the linkage and fall back to a draw-valued visit so
        // the in-flight accounting still settles.
        error!(node = idx.raw(), link = target.raw(), "transposition root lost, clearing link");
        let node = tree.store.get_mut(idx);
        node.transposition_root = NodeIndex::NONE;
        node.pending_transposition_visits = 0;
        propagate(tree, idx, slot, 1, 0.0, 1.0, 0.0);
        return;
    }

    if pending > 0 {
        let k = served.min(2) as u8;
        if let Some(sample) = leaf_eval::subtree_sample(&tree.store, target, k) {
            let mut v = sample.v;
            if params.transposition_use_transposed_q && tree.store[target].n() > 0 {
                let f = params.transposition_root_q_fraction.clamp(0.0, 1.0);
                v = (1.0 - f) * v + f * tree.store[target].q();
            }
            tree.store.get_mut(idx).pending_transposition_visits = pending - 1;
            propagate(tree, idx, slot, 1, v, sample.d, sample.m);
            return;
        }
        trace!(node = idx.raw(), "transposition sample unresolvable, forcing copy");
    }

    // Allowance exhausted (or chain too shallow): permanent copy, then
    // the visit flows through the node's own outputs.
    match leaf_eval::copy_from_transposition_root(&mut tree.store, idx, target) {
        Ok(()) => {
            let (v, d, m) = {
                let node = &tree.store[idx];
                let d = (1.0 - node.win_p - node.loss_p).clamp(0.0, 1.0);
                (node.v, d, node.m_position)
            };
            propagate(tree, idx, slot, 1, v, d, m);
        }
        Err(StoreError::ArenaExhausted { .. }) => {
            // No room for the copy's children: serve the visit from the
            // target's raw value and keep the link for later visits.
            let v = tree.store[target].v;
            let node = &tree.store[target];
            let d = (1.0 - node.win_p - node.loss_p).clamp(0.0, 1.0);
            let m = node.m_position;
            propagate(tree, idx, slot, 1, v, d, m);
        }
    }
}

/// Apply a completed network batch to the tree: expand and back up the
/// network partition, cache the overshoot, release every claim.
///
/// Returns `true` when the arena filled up mid-apply; remaining visits
/// are abandoned (their outputs still reach the cache) so every in-flight
/// counter settles before the flow stops.
pub(crate) fn apply_network_results<P: Position>(
    tree: &mut Tree<P>,
    set: &mut SelectedNodesSet,
    outputs: Vec<NetworkOutput>,
    params: &SearchParams,
) -> Result<bool, SearchError> {
    let slot = set.selector_id();
    let (nn, cache_only) = set.take_for_apply();

    let want = nn.len() + cache_only.len();
    if outputs.len() != want {
        return Err(SearchError::Evaluator(
            crate::error::EvalError::OutputCountMismatch {
                got: outputs.len(),
                want,
            },
        ));
    }

    let mut outputs = outputs.into_iter();
    let mut exhausted = false;

    for leaf in nn {
        let output = outputs.next().expect("length checked above");
        let hash = tree.store[leaf.index].zobrist();
        tree.cache.insert(hash, output.clone());

        if exhausted {
            abandon_visit(tree, leaf.index, slot, leaf.visit_count);
            continue;
        }

        if tree.store[leaf.index].is_evaluated() {
            // Resolved since selection (same-hash sibling in this batch).
            apply_visit(tree, &leaf, slot, params)?;
            continue;
        }

        match leaf_eval::expand_with_output(&mut tree.store, leaf.index, &output) {
            Ok(()) => {
                let d = (1.0 - output.win_p - output.loss_p).clamp(0.0, 1.0);
                propagate(
                    tree,
                    leaf.index,
                    slot,
                    leaf.visit_count,
                    output.value,
                    d,
                    output.moves_left,
                );
            }
            Err(StoreError::ArenaExhausted { .. }) => {
                exhausted = true;
                abandon_visit(tree, leaf.index, slot, leaf.visit_count);
            }
        }
    }

    for leaf in cache_only {
        let output = outputs.next().expect("length checked above");
        let hash = tree.store[leaf.index].zobrist();
        tree.cache.insert(hash, output);
        // Evaluated, cached, never applied.
        abandon_visit(tree, leaf.index, slot, leaf.visit_count);
    }

    Ok(exhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::NetworkOutput;
    use crate::leaf_eval::expand_with_output;
    use game_core::MoveCode;

    fn output(k: usize, value: f32) -> NetworkOutput {
        NetworkOutput {
            value,
            win_p: value.max(0.0),
            loss_p: (-value).max(0.0),
            moves_left: 8.0,
            policy: (0..k).map(|i| (MoveCode(i as u16), 1.0 / k as f32)).collect(),
        }
    }

    fn test_tree() -> Tree<crate::test_util::SyntheticPosition> {
        let game = crate::test_util::SyntheticGame::uniform(3, 6);
        Tree::new(game.start(), &SearchParams::for_testing()).unwrap()
    }

    fn claim_path(tree: &Tree<crate::test_util::SyntheticPosition>, leaf: NodeIndex, slot: usize, visits: u32) {
        let mut idx = leaf;
        loop {
            tree.store[idx].add_in_flight(slot, visits);
            if idx == tree.root() {
                break;
            }
            idx = tree.store[idx].parent();
        }
    }

    #[test]
    fn propagate_flips_value_per_ply() {
        let mut tree = test_tree();
        let root = tree.root();
        expand_with_output(&mut tree.store, root, &output(2, 0.0)).unwrap();
        let child = tree.store[root].child_index(0);
        tree.store.get_mut(child).materialized = true;
        expand_with_output(&mut tree.store, child, &output(2, 0.0)).unwrap();
        let grand = tree.store[child].child_index(1);
        tree.store.get_mut(grand).materialized = true;

        claim_path(&tree, grand, 0, 1);
        propagate(&mut tree, grand, 0, 1, 0.8, 0.1, 4.0);

        assert_eq!(tree.store[grand].n(), 1);
        assert!((tree.store[grand].q() - 0.8).abs() < 1e-6);
        assert!((tree.store[child].q() + 0.8).abs() < 1e-6);
        assert!((tree.store[root].q() - 0.8).abs() < 1e-6);
        // Draw probability does not flip.
        assert!((tree.store[root].d_avg() - 0.1).abs() < 1e-6);
        // Moves-left grows by one per ply toward the root.
        assert!((tree.store[child].m_avg() - 5.0).abs() < 1e-6);
        assert!((tree.store[root].m_avg() - 6.0).abs() < 1e-6);
        assert!(tree.in_flight_drained());
    }

    #[test]
    fn mated_leaf_marks_parent_mate_in_one() {
        let mut tree = test_tree();
        let root = tree.root();
        expand_with_output(&mut tree.store, root, &output(2, 0.0)).unwrap();
        let child = tree.store[root].child_index(0);
        {
            let node = tree.store.get_mut(child);
            node.materialized = true;
            node.terminal = Terminal::CheckmateLoss;
            node.v = -1.0;
            node.loss_p = 1.0;
            node.evaluated = true;
        }
        claim_path(&tree, child, 0, 1);
        let leaf = SelectedLeaf {
            index: child,
            visit_count: 1,
            encoded: None,
        };
        apply_visit(&mut tree, &leaf, 0, &SearchParams::for_testing()).unwrap();

        assert_eq!(tree.store[root].terminal(), Terminal::CheckmateWin);
        assert!((tree.store[root].q() - 1.0).abs() < 1e-6);
        assert!(tree.in_flight_drained());
    }

    #[test]
    fn abandon_only_releases_claims() {
        let mut tree = test_tree();
        let root = tree.root();
        expand_with_output(&mut tree.store, root, &output(2, 0.0)).unwrap();
        let child = tree.store[root].child_index(0);
        tree.store.get_mut(child).materialized = true;

        claim_path(&tree, child, 1, 3);
        abandon_visit(&mut tree, child, 1, 3);
        assert!(tree.in_flight_drained());
        assert_eq!(tree.store[child].n(), 0);
        assert_eq!(tree.store[root].n(), 0);
    }

    #[test]
    fn linked_leaf_serves_allowance_then_copies() {
        let params = SearchParams::for_testing();
        let mut tree = test_tree();
        let root = tree.root();

        // Target subtree deep enough for all three samples: the target,
        // its first child, and a grandchild under that child.
        expand_with_output(&mut tree.store, root, &output(2, 0.0)).unwrap();
        let target = tree.store[root].child_index(0);
        tree.store.get_mut(target).materialized = true;
        expand_with_output(&mut tree.store, target, &output(2, 0.5)).unwrap();
        tree.store.get_mut(target).n = 4;
        let tc0 = tree.store[target].child_index(0);
        tree.store.get_mut(tc0).materialized = true;
        expand_with_output(&mut tree.store, tc0, &output(1, -0.3)).unwrap();
        tree.store.get_mut(tc0).n = 1;
        let grand = tree.store[tc0].child_index(0);
        tree.store.get_mut(grand).materialized = true;
        expand_with_output(&mut tree.store, grand, &output(1, 0.2)).unwrap();
        tree.store.get_mut(grand).n = 1;

        // Linked leaf: the sibling reaching the same position.
        let linked = tree.store[root].child_index(1);
        let target_zobrist = tree.store[target].zobrist();
        {
            let node = tree.store.get_mut(linked);
            node.materialized = true;
            node.zobrist = target_zobrist;
            node.transposition_root = target;
            node.pending_transposition_visits = 3;
        }

        let make_leaf = || SelectedLeaf {
            index: linked,
            visit_count: 1,
            encoded: None,
        };

        // Three visits served through the link, no copy yet.
        for expected_pending in [2u8, 1, 0] {
            claim_path(&tree, linked, 0, 1);
            apply_visit(&mut tree, &make_leaf(), 0, &params).unwrap();
            assert_eq!(
                tree.store[linked].pending_transposition_visits(),
                expected_pending
            );
            assert!(tree.store[linked].is_linked());
            assert!(!tree.store[linked].is_evaluated());
        }
        assert_eq!(tree.store[linked].n(), 3);
        // Samples: target 0.5, first child negated 0.3, grandchild 0.2.
        let expected = (0.5 + 0.3 + 0.2) / 3.0;
        assert!((tree.store[linked].q() - expected).abs() < 1e-6);

        // Fourth visit: allowance spent, permanent copy and de-link.
        claim_path(&tree, linked, 0, 1);
        apply_visit(&mut tree, &make_leaf(), 0, &params).unwrap();
        assert!(!tree.store[linked].is_linked());
        assert!(tree.store[linked].is_evaluated());
        assert_eq!(tree.store[linked].num_policy_moves(), 2);
        assert_eq!(tree.store[linked].n(), 4);
        assert!(tree.in_flight_drained());
    }

    #[test]
    fn unresolved_node_applies_as_draw_best_effort() {
        let params = SearchParams::for_testing();
        let mut tree = test_tree();
        let root = tree.root();
        expand_with_output(&mut tree.store, root, &output(2, 0.0)).unwrap();
        let child = tree.store[root].child_index(0);
        // Materialized but never resolved: no terminal, no value, no link.
        tree.store.get_mut(child).materialized = true;

        claim_path(&tree, child, 0, 2);
        let leaf = SelectedLeaf {
            index: child,
            visit_count: 2,
            encoded: None,
        };
        apply_visit(&mut tree, &leaf, 0, &params).unwrap();

        // The claim settles as draw-valued visits instead of failing the
        // search.
        assert_eq!(tree.store[child].n(), 2);
        assert_eq!(tree.store[child].q(), 0.0);
        assert!((tree.store[child].d_avg() - 1.0).abs() < 1e-6);
        assert!(tree.in_flight_drained());
    }

    #[test]
    fn empty_batch_apply_is_a_no_op() {
        let params = SearchParams::for_testing();
        let mut tree = test_tree();
        let root = tree.root();
        expand_with_output(&mut tree.store, root, &output(2, 0.25)).unwrap();
        tree.store.get_mut(root).n = 1;
        let before = (tree.store[root].n(), tree.store.len(), tree.visits_applied);

        let mut set = crate::selected::SelectedNodesSet::new(0);
        set.reset(8);
        let exhausted = apply_network_results(&mut tree, &mut set, Vec::new(), &params).unwrap();

        assert!(!exhausted);
        assert_eq!(
            before,
            (tree.store[root].n(), tree.store.len(), tree.visits_applied)
        );
        assert!(tree.in_flight_drained());
    }

    #[test]
    fn lost_transposition_root_clears_link() {
        let params = SearchParams::for_testing();
        let mut tree = test_tree();
        let root = tree.root();
        expand_with_output(&mut tree.store, root, &output(2, 0.0)).unwrap();
        let target = tree.store[root].child_index(0);
        tree.store.get_mut(target).materialized = true;
        expand_with_output(&mut tree.store, target, &output(1, 0.5)).unwrap();
        tree.store.get_mut(target).n = 1;

        let linked = tree.store[root].child_index(1);
        let target_zobrist = tree.store[target].zobrist();
        {
            let node = tree.store.get_mut(linked);
            node.materialized = true;
            node.zobrist = target_zobrist;
            node.transposition_root = target;
            node.pending_transposition_visits = 2;
        }
        // Corrupt the target: it becomes terminal, invalidating the link.
        tree.store.get_mut(target).terminal = Terminal::Stalemate;

        claim_path(&tree, linked, 0, 1);
        let leaf = SelectedLeaf {
            index: linked,
            visit_count: 1,
            encoded: None,
        };
        apply_visit(&mut tree, &leaf, 0, &params).unwrap();

        assert!(!tree.store[linked].is_linked());
        assert_eq!(tree.store[linked].pending_transposition_visits(), 0);
        assert_eq!(tree.store[linked].n(), 1);
        assert!(tree.in_flight_drained());
    }
}
