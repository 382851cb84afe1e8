//! Default configuration values.
//!
//! Single source of truth: the serde defaults in `structs` and the
//! fallback paths in `loader` all read from here.

// Selection
pub const C_PUCT: f32 = 1.745;
pub const FPU_REDUCTION: f32 = 0.33;
pub const DIRICHLET_ALPHA: f32 = 0.0;
pub const DIRICHLET_EPSILON: f32 = 0.25;
pub const SEED: u64 = 0;
pub const MAX_VISITS_PER_DESCENT: u32 = 8;

// Batching / flow
pub const FLOW_DIRECT_OVERLAPPED: bool = true;
pub const FLOW_DUAL_SELECTORS: bool = true;
pub const FLOW_SPLIT_SELECTS: bool = true;
pub const SMART_SIZE_BATCHES: bool = true;
pub const MAX_BATCH_SIZE: usize = 1024;
pub const BATCH_SIZE_MULTIPLIER: f32 = 3.0;
pub const SMALL_BATCH_ROOT_N: u32 = 3000;
pub const PADDED_BATCH_SIZING: bool = false;
pub const PADDED_EXTRA_NODES_BASE: usize = 0;
pub const PADDED_EXTRA_NODES_MULTIPLIER: f32 = 0.0;

// Transpositions
pub const TRANSPOSITION_MODE: &str = "single_node_deferred_copy";
pub const MAX_TRANSPOSITION_ROOT_APPLICATIONS_FIXED: u8 = 3;
pub const MAX_TRANSPOSITION_ROOT_APPLICATIONS_FRACTION: f32 = 0.0;
pub const TRANSPOSITION_USE_TRANSPOSED_Q: bool = false;
pub const TRANSPOSITION_ROOT_Q_FRACTION: f32 = 0.25;
pub const IN_FLIGHT_THIS_BATCH_LINKAGE_ENABLED: bool = true;
pub const IN_FLIGHT_OTHER_BATCH_LINKAGE_ENABLED: bool = true;

// Memory
pub const USE_LARGE_PAGES: bool = false;
pub const ARENA_CAPACITY: usize = 4_000_000;
pub const EVAL_CACHE_CAPACITY: usize = 200_000;
pub const TT_STAGING_CAPACITY: usize = 4096;
