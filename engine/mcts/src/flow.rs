//! Search flow: the double-buffered collect/evaluate/apply loop.
//!
//! One coordinator thread owns the tree and both selectors; a background
//! worker owns the network evaluator. In overlapped mode the coordinator
//! launches the current batch's evaluation, then applies the *previous*
//! batch's results while the device is busy, alternating selector slots
//! so each slot's apply barrier holds. The coordinator blocks in exactly
//! two places: on the prior batch at the top of an overlapped iteration,
//! and on the final outstanding batch at termination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use game_core::{EncodedPosition, MoveCode, NullTablebase, Position, TablebaseOracle};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Gamma};
use tracing::{debug, warn};

use crate::backup;
use crate::batching::{plan_batch, SPLIT_SECOND_PASS_MIN_YIELD};
use crate::error::{EvalError, SearchError};
use crate::evaluator::{NetworkEvaluator, NetworkOutput};
use crate::leaf_eval;
use crate::params::SearchParams;
use crate::selected::{SelectedLeaf, SelectedNodesSet};
use crate::selector::LeafSelector;
use crate::tree::Tree;

/// Why a search returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Visit budget reached.
    NodeBudget,
    /// Deadline passed.
    TimeBudget,
    /// External stop flag raised (forced move, user cancel).
    Cancelled,
    /// Node arena filled; results are best-so-far.
    ArenaExhausted,
    /// Batches shrank to nothing relative to work already done.
    BatchCollapse,
}

/// External stop conditions, polled once per iteration.
#[derive(Debug, Clone, Default)]
pub struct SearchLimits {
    /// Visit budget. Zero is clamped to one visit.
    pub hard_limit_nodes: u64,
    /// Wall-clock deadline, enforced at batch boundaries.
    pub deadline: Option<Instant>,
    /// Cooperative cancel (forced move, user stop).
    pub stop_flag: Option<Arc<AtomicBool>>,
}

impl SearchLimits {
    pub fn nodes(hard_limit_nodes: u64) -> Self {
        Self {
            hard_limit_nodes,
            ..Self::default()
        }
    }
}

/// Observable results of a finished search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best_move: Option<MoveCode>,
    pub root_visits: u32,
    pub root_q: f32,
    /// `(win, draw, loss)` for the side to move at the root.
    pub root_wdl: (f32, f32, f32),
    pub root_moves_left: f32,
    /// Per-move visit counts at the root, in policy order.
    pub visit_counts: Vec<(MoveCode, u32)>,
    pub principal_variation: Vec<MoveCode>,
    /// Positions evaluated by the network (cache-only included).
    pub nn_evaluations: u64,
    pub stop: StopReason,
}

// ---------------------------------------------------------------------
// Evaluation worker
// ---------------------------------------------------------------------

struct EvalRequest {
    batch: Vec<EncodedPosition>,
    reply: mpsc::Sender<Result<Vec<NetworkOutput>, EvalError>>,
}

/// Background thread owning the network evaluator. One request may be in
/// flight at a time from the flow's perspective; the channel enforces
/// ordering either way.
struct EvalWorker {
    tx: Option<mpsc::Sender<EvalRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl EvalWorker {
    fn spawn(evaluator: Arc<dyn NetworkEvaluator>) -> Result<Self, SearchError> {
        let (tx, rx) = mpsc::channel::<EvalRequest>();
        let handle = thread::Builder::new()
            .name("nn-eval".into())
            .spawn(move || {
                while let Ok(req) = rx.recv() {
                    let max = evaluator.max_batch_size();
                    let result = if req.batch.len() > max {
                        Err(EvalError::BatchTooLarge {
                            got: req.batch.len(),
                            max,
                        })
                    } else {
                        evaluator.evaluate(&req.batch)
                    };
                    // Receiver gone means the search already bailed.
                    let _ = req.reply.send(result);
                }
            })
            .map_err(|e| {
                SearchError::Evaluator(EvalError::EvaluationFailed(format!(
                    "failed to spawn evaluation worker: {e}"
                )))
            })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    fn submit(&self, slot: usize, batch: Vec<EncodedPosition>) -> Result<PendingEval, SearchError> {
        let submitted = batch.len();
        let (reply_tx, reply_rx) = mpsc::channel();
        let req = EvalRequest {
            batch,
            reply: reply_tx,
        };
        self.tx
            .as_ref()
            .ok_or(SearchError::Evaluator(EvalError::WorkerDisconnected))?
            .send(req)
            .map_err(|_| SearchError::Evaluator(EvalError::WorkerDisconnected))?;
        Ok(PendingEval {
            rx: reply_rx,
            slot,
            submitted,
        })
    }
}

impl Drop for EvalWorker {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Handle to one in-flight evaluation.
struct PendingEval {
    rx: mpsc::Receiver<Result<Vec<NetworkOutput>, EvalError>>,
    slot: usize,
    #[allow(dead_code)]
    submitted: usize,
}

impl PendingEval {
    fn wait(self) -> Result<Vec<NetworkOutput>, EvalError> {
        self.rx.recv().map_err(|_| EvalError::WorkerDisconnected)?
    }
}

// ---------------------------------------------------------------------
// Flow helpers
// ---------------------------------------------------------------------

fn check_stop(limits: &SearchLimits, hard_limit: u64, root_n: u32) -> Option<StopReason> {
    if limits
        .stop_flag
        .as_ref()
        .is_some_and(|f| f.load(Ordering::Relaxed))
    {
        return Some(StopReason::Cancelled);
    }
    if limits.deadline.is_some_and(|d| Instant::now() >= d) {
        return Some(StopReason::TimeBudget);
    }
    if u64::from(root_n) >= hard_limit {
        return Some(StopReason::NodeBudget);
    }
    None
}

/// Wait on an in-flight evaluation and apply it; returns whether the
/// arena filled up during the apply.
fn drain_pending<P: Position>(
    tree: &mut Tree<P>,
    sets: &mut [SelectedNodesSet; 2],
    params: &SearchParams,
    pending: PendingEval,
) -> Result<bool, SearchError> {
    let slot = pending.slot;
    let outputs = pending.wait()?;
    let exhausted = backup::apply_network_results(tree, &mut sets[slot], outputs, params)?;
    tree.transpositions.flush_pending(slot);
    Ok(exhausted)
}

fn inject_root_noise<P: Position>(
    tree: &mut Tree<P>,
    params: &SearchParams,
    rng: &mut ChaCha20Rng,
) {
    let root = tree.root();
    let k = tree.store[root].num_policy_moves() as usize;
    if k == 0 {
        return;
    }
    let gamma = match Gamma::new(f64::from(params.dirichlet_alpha), 1.0) {
        Ok(g) => g,
        Err(e) => {
            warn!(alpha = params.dirichlet_alpha, "invalid Dirichlet alpha: {e}");
            return;
        }
    };
    let mut noise: Vec<f32> = (0..k).map(|_| gamma.sample(rng) as f32).collect();
    let sum: f32 = noise.iter().sum();
    if sum <= 0.0 {
        return;
    }
    for n in &mut noise {
        *n /= sum;
    }
    let eps = params.dirichlet_epsilon;
    let node = tree.store.get_mut(root);
    for (entry, n) in node.policy.iter_mut().zip(noise) {
        entry.p = (1.0 - eps) * entry.p + eps * n;
    }
}

/// Fill spare network budget with unvisited root children. The extra
/// evaluations land in the cache only; nothing descends, so the entries
/// carry zero visits.
fn collect_root_preload<P: Position, T: TablebaseOracle<P>>(
    tree: &mut Tree<P>,
    tablebase: &T,
    set: &mut SelectedNodesSet,
    budget: usize,
) {
    if budget == 0 || !tree.store[tree.root()].is_expanded() {
        return;
    }
    let root = tree.root();
    let k = tree.store[root].num_policy_moves();
    let mut added = 0usize;
    for i in 0..k {
        if added >= budget {
            break;
        }
        let child_idx = tree.store[root].child_index(i);
        let mv = tree.store[root].policy()[i as usize].mv;
        let mut pos = tree.root_position.clone();
        if pos.play(mv).is_err() {
            continue;
        }
        if !tree.store[child_idx].materialized {
            leaf_eval::materialize_child(tree, child_idx, &pos, tablebase);
        }
        let node = &tree.store[child_idx];
        if node.terminal().is_terminal()
            || node.is_evaluated()
            || node.is_linked()
            || node.n() > 0
            || node.in_flight_total() > 0
        {
            continue;
        }
        set.add_cache_only_padding(SelectedLeaf {
            index: child_idx,
            visit_count: 0,
            encoded: Some(pos.encode()),
        });
        added += 1;
    }
}

// ---------------------------------------------------------------------
// SearchFlow
// ---------------------------------------------------------------------

/// Owns the tree, both selector slots, and the evaluation worker for one
/// search position.
pub struct SearchFlow<P: Position, T: TablebaseOracle<P> = NullTablebase> {
    tree: Tree<P>,
    params: SearchParams,
    tablebase: T,
    evaluator_max: usize,
    breaks: Vec<usize>,
    worker: EvalWorker,
    selectors: [LeafSelector; 2],
    sets: [SelectedNodesSet; 2],
    rng: ChaCha20Rng,
    noise_applied: bool,
}

impl<P: Position, T: TablebaseOracle<P>> SearchFlow<P, T> {
    pub fn with_tablebase(
        root: P,
        params: SearchParams,
        evaluator: Arc<dyn NetworkEvaluator>,
        tablebase: T,
    ) -> Result<Self, SearchError> {
        let tree = Tree::new(root, &params)?;
        let evaluator_max = evaluator.max_batch_size().max(1);
        let breaks = evaluator.optimal_batch_breaks().to_vec();
        let worker = EvalWorker::spawn(evaluator)?;
        let rng = ChaCha20Rng::seed_from_u64(params.seed);
        Ok(Self {
            tree,
            params,
            tablebase,
            evaluator_max,
            breaks,
            worker,
            selectors: [LeafSelector::new(0), LeafSelector::new(1)],
            sets: [SelectedNodesSet::new(0), SelectedNodesSet::new(1)],
            rng,
            noise_applied: false,
        })
    }

    pub fn tree(&self) -> &Tree<P> {
        &self.tree
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Run the search until a stop condition fires.
    ///
    /// `starting_batch_seq` seeds the maintenance cadence so repeated
    /// calls on the same flow don't all prune and log on the same
    /// iterations; `forced_batch_size` overrides the sizer but is still
    /// clipped to the remaining budget.
    pub fn process_direct_overlapped(
        &mut self,
        limits: &SearchLimits,
        starting_batch_seq: u64,
        forced_batch_size: Option<usize>,
    ) -> Result<SearchOutcome, SearchError> {
        let hard_limit = limits.hard_limit_nodes.max(1);
        let mut batch_seq = starting_batch_seq;
        let mut prior: Option<PendingEval> = None;
        let mut slot = 0usize;
        let mut exhausted = false;
        let mut vl_boost = 1.0f32;
        let mut nps_anchor = (Instant::now(), self.tree.visits_applied);

        let stop = loop {
            if exhausted {
                break StopReason::ArenaExhausted;
            }
            if let Some(reason) = check_stop(limits, hard_limit, self.tree.root_n()) {
                break reason;
            }

            if self.params.dirichlet_alpha > 0.0
                && !self.noise_applied
                && self.tree.store[self.tree.root].is_evaluated()
            {
                inject_root_noise(&mut self.tree, &self.params, &mut self.rng);
                self.noise_applied = true;
            }

            let root_n = self.tree.root_n();
            let pending_visits = prior
                .as_ref()
                .map_or(0, |p| self.sets[p.slot].pending_visits());
            let budget = hard_limit.saturating_sub(u64::from(root_n) + pending_visits);
            if budget == 0 {
                break StopReason::NodeBudget;
            }

            let plan = plan_batch(
                budget as usize,
                root_n,
                &self.params,
                &self.breaks,
                self.evaluator_max,
                forced_batch_size,
            );
            if plan.target == 0
                || (root_n > 4096 && (plan.target as u64) * 1024 <= u64::from(root_n))
            {
                break StopReason::BatchCollapse;
            }

            // The slot we are about to refill must have no results in
            // flight (apply barrier per slot).
            if prior.as_ref().is_some_and(|p| p.slot == slot) {
                let p = prior.take().expect("checked above");
                exhausted |= drain_pending(&mut self.tree, &mut self.sets, &self.params, p)?;
                if exhausted {
                    continue;
                }
            }

            self.sets[slot].reset(plan.max_nodes_nn);

            // Collection: one pass, or a 60/40 split with the second
            // pass gated on first-pass yield.
            let mut first_yield = 1.0f32;
            for (pass, pass_target) in [(0usize, plan.first_pass), (1, plan.second_pass)] {
                if pass_target == 0 || (pass == 1 && first_yield < SPLIT_SECOND_PASS_MIN_YIELD) {
                    continue;
                }
                let mut leaves = Vec::new();
                let stats = self.selectors[slot].select_batch(
                    &mut self.tree,
                    &self.tablebase,
                    pass_target as u32,
                    vl_boost,
                    &self.params,
                    &mut leaves,
                )?;
                {
                    let (left, right) = self.sets.split_at_mut(1);
                    let (set, peer) = if slot == 0 {
                        (&mut left[0], &right[0])
                    } else {
                        (&mut right[0], &left[0])
                    };
                    set.note_attempts(stats.attempted);
                    let peer_ref =
                        prior.as_ref().and_then(|p| (p.slot != slot).then_some(peer));
                    set.add_selected(&mut self.tree, leaves, peer_ref, &self.params)?;
                    if pass == 0 {
                        first_yield = set.yield_fraction();
                    }
                }
                if stats.attempted > 0 {
                    let rate = stats.collisions as f32 / stats.attempted as f32;
                    vl_boost = (1.0 + 2.0 * rate).clamp(1.0, 3.0);
                }
            }
            self.tree.last_batch_yield = self.sets[slot].yield_fraction();

            if self.params.padded_batch_sizing {
                let used = self.sets[slot].nodes_nn().len() + self.sets[slot].cache_only().len();
                let spare = plan.max_nodes_nn.saturating_sub(used);
                let (left, right) = self.sets.split_at_mut(1);
                let set = if slot == 0 { &mut left[0] } else { &mut right[0] };
                collect_root_preload(&mut self.tree, &self.tablebase, set, spare);
            }

            batch_seq += 1;
            if batch_seq % 3 == 0 {
                let now = Instant::now();
                let dv = self.tree.visits_applied - nps_anchor.1;
                let secs = now.duration_since(nps_anchor.0).as_secs_f64();
                if secs > 0.0 {
                    debug!(
                        batch = batch_seq,
                        nps = (dv as f64 / secs) as u64,
                        yield_fraction = self.tree.last_batch_yield,
                        "search progress"
                    );
                }
                nps_anchor = (now, self.tree.visits_applied);
            }
            if batch_seq % 256 == 0 {
                self.tree.cache.prune(0.875);
            }

            let encodings = self.sets[slot].collect_encodings();
            if encodings.is_empty() && self.sets[slot].is_empty() && prior.is_none() {
                // No new work and nothing in flight: the tree has nothing
                // left to offer this configuration.
                break StopReason::BatchCollapse;
            }

            if encodings.is_empty() {
                if let Some(p) = prior.take() {
                    exhausted |= drain_pending(&mut self.tree, &mut self.sets, &self.params, p)?;
                }
                self.tree.transpositions.flush_pending(slot);
            } else if plan.overlap {
                // Launch, then apply the prior batch while the device
                // works on this one.
                self.tree.nn_evaluations += encodings.len() as u64;
                let pending = self.worker.submit(slot, encodings)?;
                if let Some(p) = prior.take() {
                    exhausted |= drain_pending(&mut self.tree, &mut self.sets, &self.params, p)?;
                }
                prior = Some(pending);
            } else {
                if let Some(p) = prior.take() {
                    exhausted |= drain_pending(&mut self.tree, &mut self.sets, &self.params, p)?;
                }
                self.tree.nn_evaluations += encodings.len() as u64;
                let pending = self.worker.submit(slot, encodings)?;
                exhausted |=
                    drain_pending(&mut self.tree, &mut self.sets, &self.params, pending)?;
            }

            slot = if plan.overlap && self.params.flow_dual_selectors {
                1 - slot
            } else {
                0
            };
        };

        // Terminal wait: apply whatever is still in flight so every
        // claim settles before we report.
        if let Some(p) = prior.take() {
            drain_pending(&mut self.tree, &mut self.sets, &self.params, p)?;
        }

        debug!(
            ?stop,
            root_n = self.tree.root_n(),
            arena_nodes = self.tree.store.len(),
            nn_evals = self.tree.nn_evaluations,
            "search finished"
        );
        Ok(self.outcome(stop))
    }

    fn outcome(&self, stop: StopReason) -> SearchOutcome {
        let (q, wdl, m) = self.tree.root_stats();
        SearchOutcome {
            best_move: self.tree.best_move(),
            root_visits: self.tree.root_n(),
            root_q: q,
            root_wdl: wdl,
            root_moves_left: m,
            visit_counts: self.tree.visit_counts(),
            principal_variation: self.tree.principal_variation(12),
            nn_evaluations: self.tree.nn_evaluations(),
            stop,
        }
    }
}

impl<P: Position> SearchFlow<P, NullTablebase> {
    /// Flow without tablebases.
    pub fn new(
        root: P,
        params: SearchParams,
        evaluator: Arc<dyn NetworkEvaluator>,
    ) -> Result<Self, SearchError> {
        Self::with_tablebase(root, params, evaluator, NullTablebase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::UniformEvaluator;
    use crate::test_util::SyntheticGame;

    fn flow(
        game: &SyntheticGame,
        params: SearchParams,
    ) -> SearchFlow<crate::test_util::SyntheticPosition> {
        SearchFlow::new(game.start(), params, Arc::new(UniformEvaluator::new())).unwrap()
    }

    #[test]
    fn worker_round_trip() {
        let worker = EvalWorker::spawn(Arc::new(UniformEvaluator::new())).unwrap();
        let game = SyntheticGame::uniform(3, 4);
        let pending = worker.submit(0, vec![game.start().encode()]).unwrap();
        let outputs = pending.wait().unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].policy.len(), 3);
    }

    #[test]
    fn worker_rejects_oversized_batches() {
        struct Tiny;
        impl NetworkEvaluator for Tiny {
            fn max_batch_size(&self) -> usize {
                1
            }
            fn evaluate(
                &self,
                batch: &[EncodedPosition],
            ) -> Result<Vec<NetworkOutput>, EvalError> {
                UniformEvaluator::new().evaluate(batch)
            }
        }
        let worker = EvalWorker::spawn(Arc::new(Tiny)).unwrap();
        let game = SyntheticGame::uniform(2, 4);
        let pending = worker
            .submit(0, vec![game.start().encode(), game.start().encode()])
            .unwrap();
        assert!(matches!(
            pending.wait(),
            Err(EvalError::BatchTooLarge { got: 2, max: 1 })
        ));
    }

    #[test]
    fn small_search_visits_root_budget() {
        let game = SyntheticGame::uniform(3, 6);
        let mut flow = flow(&game, SearchParams::for_testing());
        let outcome = flow
            .process_direct_overlapped(&SearchLimits::nodes(20), 0, None)
            .unwrap();
        assert_eq!(outcome.stop, StopReason::NodeBudget);
        assert_eq!(outcome.root_visits, 20);
        assert!(flow.tree().in_flight_drained());
        flow.tree().audit().unwrap();
    }

    #[test]
    fn cancel_flag_stops_immediately() {
        let game = SyntheticGame::uniform(3, 6);
        let mut flow = flow(&game, SearchParams::for_testing());
        let stop_flag = Arc::new(AtomicBool::new(true));
        let limits = SearchLimits {
            hard_limit_nodes: 1000,
            deadline: None,
            stop_flag: Some(stop_flag),
        };
        let outcome = flow.process_direct_overlapped(&limits, 0, None).unwrap();
        assert_eq!(outcome.stop, StopReason::Cancelled);
        assert_eq!(outcome.root_visits, 0);
    }

    #[test]
    fn root_noise_mixes_priors_once() {
        let game = SyntheticGame::uniform(4, 6);
        let params = SearchParams {
            dirichlet_alpha: 0.3,
            dirichlet_epsilon: 0.5,
            seed: 9,
            ..SearchParams::for_testing()
        };
        let mut flow = flow(&game, params);
        flow.process_direct_overlapped(&SearchLimits::nodes(10), 0, None)
            .unwrap();
        let root = flow.tree().root();
        let priors: Vec<f32> = flow.tree().store()[root]
            .policy()
            .iter()
            .map(|e| e.p)
            .collect();
        // Uniform prior was 0.25; noise must have moved at least one.
        assert!(priors.iter().any(|&p| (p - 0.25).abs() > 1e-3));
        let sum: f32 = priors.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn terminal_root_consumes_budget_without_network() {
        // Depth 0: the start position is already stalemate.
        let game = SyntheticGame::uniform(2, 0);
        let mut flow = flow(&game, SearchParams::for_testing());
        let outcome = flow
            .process_direct_overlapped(&SearchLimits::nodes(5), 0, None)
            .unwrap();
        assert_eq!(outcome.root_visits, 5);
        assert_eq!(outcome.nn_evaluations, 0);
        assert!(outcome.best_move.is_none());
    }
}
