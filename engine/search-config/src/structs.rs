//! Configuration struct definitions.
//!
//! All sections deserialize with serde; every field falls back to the
//! `defaults` module so a partial file configures only what it names.

use serde::Deserialize;
use tracing::warn;

use crate::defaults;

fn d_c_puct() -> f32 {
    defaults::C_PUCT
}
fn d_fpu_reduction() -> f32 {
    defaults::FPU_REDUCTION
}
fn d_dirichlet_alpha() -> f32 {
    defaults::DIRICHLET_ALPHA
}
fn d_dirichlet_epsilon() -> f32 {
    defaults::DIRICHLET_EPSILON
}
fn d_seed() -> u64 {
    defaults::SEED
}
fn d_max_visits_per_descent() -> u32 {
    defaults::MAX_VISITS_PER_DESCENT
}
fn d_flow_direct_overlapped() -> bool {
    defaults::FLOW_DIRECT_OVERLAPPED
}
fn d_flow_dual_selectors() -> bool {
    defaults::FLOW_DUAL_SELECTORS
}
fn d_flow_split_selects() -> bool {
    defaults::FLOW_SPLIT_SELECTS
}
fn d_smart_size_batches() -> bool {
    defaults::SMART_SIZE_BATCHES
}
fn d_max_batch_size() -> usize {
    defaults::MAX_BATCH_SIZE
}
fn d_batch_size_multiplier() -> f32 {
    defaults::BATCH_SIZE_MULTIPLIER
}
fn d_small_batch_root_n() -> u32 {
    defaults::SMALL_BATCH_ROOT_N
}
fn d_padded_batch_sizing() -> bool {
    defaults::PADDED_BATCH_SIZING
}
fn d_padded_extra_nodes_base() -> usize {
    defaults::PADDED_EXTRA_NODES_BASE
}
fn d_padded_extra_nodes_multiplier() -> f32 {
    defaults::PADDED_EXTRA_NODES_MULTIPLIER
}
fn d_transposition_mode() -> String {
    defaults::TRANSPOSITION_MODE.into()
}
fn d_max_tr_fixed() -> u8 {
    defaults::MAX_TRANSPOSITION_ROOT_APPLICATIONS_FIXED
}
fn d_max_tr_fraction() -> f32 {
    defaults::MAX_TRANSPOSITION_ROOT_APPLICATIONS_FRACTION
}
fn d_use_transposed_q() -> bool {
    defaults::TRANSPOSITION_USE_TRANSPOSED_Q
}
fn d_root_q_fraction() -> f32 {
    defaults::TRANSPOSITION_ROOT_Q_FRACTION
}
fn d_in_flight_this_batch() -> bool {
    defaults::IN_FLIGHT_THIS_BATCH_LINKAGE_ENABLED
}
fn d_in_flight_other_batch() -> bool {
    defaults::IN_FLIGHT_OTHER_BATCH_LINKAGE_ENABLED
}
fn d_use_large_pages() -> bool {
    defaults::USE_LARGE_PAGES
}
fn d_arena_capacity() -> usize {
    defaults::ARENA_CAPACITY
}
fn d_eval_cache_capacity() -> usize {
    defaults::EVAL_CACHE_CAPACITY
}
fn d_tt_staging_capacity() -> usize {
    defaults::TT_STAGING_CAPACITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "d_c_puct")]
    pub c_puct: f32,
    #[serde(default = "d_fpu_reduction")]
    pub fpu_reduction: f32,
    #[serde(default = "d_dirichlet_alpha")]
    pub dirichlet_alpha: f32,
    #[serde(default = "d_dirichlet_epsilon")]
    pub dirichlet_epsilon: f32,
    #[serde(default = "d_seed")]
    pub seed: u64,
    #[serde(default = "d_max_visits_per_descent")]
    pub max_visits_per_descent: u32,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            c_puct: d_c_puct(),
            fpu_reduction: d_fpu_reduction(),
            dirichlet_alpha: d_dirichlet_alpha(),
            dirichlet_epsilon: d_dirichlet_epsilon(),
            seed: d_seed(),
            max_visits_per_descent: d_max_visits_per_descent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchingSection {
    #[serde(default = "d_flow_direct_overlapped")]
    pub flow_direct_overlapped: bool,
    #[serde(default = "d_flow_dual_selectors")]
    pub flow_dual_selectors: bool,
    #[serde(default = "d_flow_split_selects")]
    pub flow_split_selects: bool,
    #[serde(default = "d_smart_size_batches")]
    pub smart_size_batches: bool,
    #[serde(default = "d_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "d_batch_size_multiplier")]
    pub batch_size_multiplier: f32,
    #[serde(default = "d_small_batch_root_n")]
    pub small_batch_root_n: u32,
    #[serde(default = "d_padded_batch_sizing")]
    pub padded_batch_sizing: bool,
    #[serde(default = "d_padded_extra_nodes_base")]
    pub padded_extra_nodes_base: usize,
    #[serde(default = "d_padded_extra_nodes_multiplier")]
    pub padded_extra_nodes_multiplier: f32,
}

impl Default for BatchingSection {
    fn default() -> Self {
        Self {
            flow_direct_overlapped: d_flow_direct_overlapped(),
            flow_dual_selectors: d_flow_dual_selectors(),
            flow_split_selects: d_flow_split_selects(),
            smart_size_batches: d_smart_size_batches(),
            max_batch_size: d_max_batch_size(),
            batch_size_multiplier: d_batch_size_multiplier(),
            small_batch_root_n: d_small_batch_root_n(),
            padded_batch_sizing: d_padded_batch_sizing(),
            padded_extra_nodes_base: d_padded_extra_nodes_base(),
            padded_extra_nodes_multiplier: d_padded_extra_nodes_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranspositionSection {
    /// One of `single_node_copy`, `single_node_deferred_copy`,
    /// `shared_subtree`.
    #[serde(default = "d_transposition_mode")]
    pub transposition_mode: String,
    #[serde(default = "d_max_tr_fixed")]
    pub max_transposition_root_applications_fixed: u8,
    #[serde(default = "d_max_tr_fraction")]
    pub max_transposition_root_applications_fraction: f32,
    #[serde(default = "d_use_transposed_q")]
    pub transposition_use_transposed_q: bool,
    #[serde(default = "d_root_q_fraction")]
    pub transposition_root_q_fraction: f32,
    #[serde(default = "d_in_flight_this_batch")]
    pub in_flight_this_batch_linkage_enabled: bool,
    #[serde(default = "d_in_flight_other_batch")]
    pub in_flight_other_batch_linkage_enabled: bool,
}

impl Default for TranspositionSection {
    fn default() -> Self {
        Self {
            transposition_mode: d_transposition_mode(),
            max_transposition_root_applications_fixed: d_max_tr_fixed(),
            max_transposition_root_applications_fraction: d_max_tr_fraction(),
            transposition_use_transposed_q: d_use_transposed_q(),
            transposition_root_q_fraction: d_root_q_fraction(),
            in_flight_this_batch_linkage_enabled: d_in_flight_this_batch(),
            in_flight_other_batch_linkage_enabled: d_in_flight_other_batch(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "d_use_large_pages")]
    pub use_large_pages: bool,
    #[serde(default = "d_arena_capacity")]
    pub arena_capacity: usize,
    #[serde(default = "d_eval_cache_capacity")]
    pub eval_cache_capacity: usize,
    #[serde(default = "d_tt_staging_capacity")]
    pub tt_staging_capacity: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            use_large_pages: d_use_large_pages(),
            arena_capacity: d_arena_capacity(),
            eval_cache_capacity: d_eval_cache_capacity(),
            tt_staging_capacity: d_tt_staging_capacity(),
        }
    }
}

/// The whole `search.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFileConfig {
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub batching: BatchingSection,
    #[serde(default)]
    pub transpositions: TranspositionSection,
    #[serde(default)]
    pub memory: MemorySection,
}

impl SearchFileConfig {
    /// Convert into runtime search parameters. Unknown transposition
    /// mode strings warn and keep the default.
    pub fn to_params(&self) -> mcts::SearchParams {
        let transposition_mode = match self.transpositions.transposition_mode.as_str() {
            "single_node_copy" => mcts::TranspositionMode::SingleNodeCopy,
            "single_node_deferred_copy" => mcts::TranspositionMode::SingleNodeDeferredCopy,
            "shared_subtree" => mcts::TranspositionMode::SharedSubtree,
            other => {
                warn!(mode = other, "unknown transposition_mode, using deferred copy");
                mcts::TranspositionMode::SingleNodeDeferredCopy
            }
        };

        mcts::SearchParams {
            c_puct: self.search.c_puct,
            fpu_reduction: self.search.fpu_reduction,
            dirichlet_alpha: self.search.dirichlet_alpha,
            dirichlet_epsilon: self.search.dirichlet_epsilon,
            seed: self.search.seed,
            max_visits_per_descent: self.search.max_visits_per_descent,
            flow_direct_overlapped: self.batching.flow_direct_overlapped,
            flow_dual_selectors: self.batching.flow_dual_selectors,
            flow_split_selects: self.batching.flow_split_selects,
            smart_size_batches: self.batching.smart_size_batches,
            max_batch_size: self.batching.max_batch_size,
            batch_size_multiplier: self.batching.batch_size_multiplier,
            small_batch_root_n: self.batching.small_batch_root_n,
            padded_batch_sizing: self.batching.padded_batch_sizing,
            padded_extra_nodes_base: self.batching.padded_extra_nodes_base,
            padded_extra_nodes_multiplier: self.batching.padded_extra_nodes_multiplier,
            transposition_mode,
            max_transposition_root_applications_fixed: self
                .transpositions
                .max_transposition_root_applications_fixed,
            max_transposition_root_applications_fraction: self
                .transpositions
                .max_transposition_root_applications_fraction,
            transposition_use_transposed_q: self.transpositions.transposition_use_transposed_q,
            transposition_root_q_fraction: self.transpositions.transposition_root_q_fraction,
            in_flight_this_batch_linkage_enabled: self
                .transpositions
                .in_flight_this_batch_linkage_enabled,
            in_flight_other_batch_linkage_enabled: self
                .transpositions
                .in_flight_other_batch_linkage_enabled,
            use_large_pages: self.memory.use_large_pages,
            arena_capacity: self.memory.arena_capacity,
            eval_cache_capacity: self.memory.eval_cache_capacity,
            tt_staging_capacity: self.memory.tt_staging_capacity,
        }
    }
}
