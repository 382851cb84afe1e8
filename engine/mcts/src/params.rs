//! Search parameters.

/// How a leaf that transposes into an existing subtree is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranspositionMode {
    /// Copy the existing node's policy and value into the leaf
    /// immediately; no link is kept.
    SingleNodeCopy,
    /// Link the leaf to the existing node and serve a bounded number of
    /// backups by sampling its subtree; copy permanently once the
    /// allowance is used up.
    SingleNodeDeferredCopy,
    /// Like deferred copy, but the link is kept as long as samples can be
    /// drawn from the probe chain. Degrades to a permanent copy whenever
    /// a sample cannot be resolved.
    SharedSubtree,
}

/// Configuration for the search core.
///
/// Defaults are tuned for a GPU-backed evaluator; `for_testing()` shrinks
/// everything so unit tests run in milliseconds.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Exploration constant in the PUCT formula.
    pub c_puct: f32,

    /// First-play-urgency reduction: unvisited children score the parent
    /// Q minus this times sqrt of the visited prior mass.
    pub fpu_reduction: f32,

    /// Overlap the next batch's selection with the prior batch's network
    /// evaluation.
    pub flow_direct_overlapped: bool,

    /// Use both selector slots. Overlap requires this.
    pub flow_dual_selectors: bool,

    /// Collect each batch in a 60/40 pair of passes, with the second pass
    /// gated on first-pass yield.
    pub flow_split_selects: bool,

    /// Let the batch sizer scale targets with search progress instead of
    /// always requesting `max_batch_size`.
    pub smart_size_batches: bool,

    /// Hard cap on any single collection target.
    pub max_batch_size: usize,

    /// Multiplier applied to the sizer's sublinear growth curve.
    pub batch_size_multiplier: f32,

    /// Root visit count below which batches stay small and overlap is
    /// disabled.
    pub small_batch_root_n: u32,

    /// Allow the NN budget to exceed the visit target; the surplus is
    /// evaluated and cached but never applied.
    pub padded_batch_sizing: bool,

    /// Flat number of padding slots added when padding is on.
    pub padded_extra_nodes_base: usize,

    /// Fraction of the target added as padding slots.
    pub padded_extra_nodes_multiplier: f32,

    pub transposition_mode: TranspositionMode,

    /// Fixed cap on backups served through a transposition link before a
    /// permanent copy is forced.
    pub max_transposition_root_applications_fixed: u8,

    /// Fraction of the link target's visit count that also caps the
    /// allowance. Zero disables the fractional cap.
    pub max_transposition_root_applications_fraction: f32,

    /// Blend the link target's Q into sampled backup values.
    pub transposition_use_transposed_q: bool,

    /// Blend fraction for `transposition_use_transposed_q`.
    pub transposition_root_q_fraction: f32,

    /// Permit linking to a node that has in-flight visits from the
    /// collecting selector's own batch.
    pub in_flight_this_batch_linkage_enabled: bool,

    /// Permit linking to a node that has in-flight visits from the peer
    /// selector's batch.
    pub in_flight_other_batch_linkage_enabled: bool,

    /// Request large pages for the node arena. Falls back to ordinary
    /// pages when the platform mapping is unavailable.
    pub use_large_pages: bool,

    /// Node arena capacity, including the reserved null slot.
    pub arena_capacity: usize,

    /// Evaluation cache capacity in entries. Zero disables the cache.
    pub eval_cache_capacity: usize,

    /// Per-selector bound on transposition-index inserts staged between
    /// flush barriers. Staging past the bound drops the insert.
    pub tt_staging_capacity: usize,

    /// Dirichlet noise concentration mixed into root priors after the
    /// root expands. Zero disables noise.
    pub dirichlet_alpha: f32,

    /// Noise fraction: priors become `(1 - eps) * p + eps * noise`.
    pub dirichlet_epsilon: f32,

    /// Seed for all stochastic pieces (noise only, at present).
    pub seed: u64,

    /// Cap on visits a single descent may carry down the tree.
    pub max_visits_per_descent: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            c_puct: 1.745,
            fpu_reduction: 0.33,
            flow_direct_overlapped: true,
            flow_dual_selectors: true,
            flow_split_selects: true,
            smart_size_batches: true,
            max_batch_size: 1024,
            batch_size_multiplier: 3.0,
            small_batch_root_n: 3000,
            padded_batch_sizing: false,
            padded_extra_nodes_base: 0,
            padded_extra_nodes_multiplier: 0.0,
            transposition_mode: TranspositionMode::SingleNodeDeferredCopy,
            max_transposition_root_applications_fixed: 3,
            max_transposition_root_applications_fraction: 0.0,
            transposition_use_transposed_q: false,
            transposition_root_q_fraction: 0.25,
            in_flight_this_batch_linkage_enabled: true,
            in_flight_other_batch_linkage_enabled: true,
            use_large_pages: false,
            arena_capacity: 4_000_000,
            eval_cache_capacity: 200_000,
            tt_staging_capacity: 4096,
            dirichlet_alpha: 0.0,
            dirichlet_epsilon: 0.25,
            seed: 0,
            max_visits_per_descent: 8,
        }
    }
}

impl SearchParams {
    /// Small, serial, deterministic configuration for tests.
    pub fn for_testing() -> Self {
        Self {
            flow_direct_overlapped: false,
            flow_dual_selectors: false,
            flow_split_selects: false,
            max_batch_size: 16,
            small_batch_root_n: 64,
            arena_capacity: 20_000,
            eval_cache_capacity: 1024,
            tt_staging_capacity: 256,
            max_visits_per_descent: 1,
            ..Self::default()
        }
    }

    pub fn with_overlap(mut self, on: bool) -> Self {
        self.flow_direct_overlapped = on;
        self.flow_dual_selectors = on || self.flow_dual_selectors;
        self
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    pub fn with_arena_capacity(mut self, capacity: usize) -> Self {
        self.arena_capacity = capacity;
        self
    }

    pub fn with_transposition_mode(mut self, mode: TranspositionMode) -> Self {
        self.transposition_mode = mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}
