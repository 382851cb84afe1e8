//! Configuration loading.
//!
//! Loads `search.toml` from the standard locations and applies
//! environment-variable overrides. Parse and read failures warn and fall
//! back to defaults; a missing file is not an error.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::structs::SearchFileConfig;

/// Standard locations to search for `search.toml`.
pub const CONFIG_SEARCH_PATHS: &[&str] = &[
    "search.toml",
    "../search.toml",
    "/etc/engine/search.toml",
];

/// Load the search configuration.
///
/// Order: the path in `SEARCH_CONFIG` if set, then the standard
/// locations, then built-in defaults. Environment overrides apply last
/// in every case.
pub fn load_config() -> SearchFileConfig {
    if let Ok(path) = std::env::var("SEARCH_CONFIG") {
        let path = PathBuf::from(&path);
        if path.exists() {
            info!("loading config from SEARCH_CONFIG: {}", path.display());
            return load_from_path(&path);
        }
        warn!(
            "SEARCH_CONFIG={} not found, searching defaults",
            path.display()
        );
    }

    for path_str in CONFIG_SEARCH_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("loading config from {}", path.display());
            return load_from_path(&path);
        }
    }

    debug!("no search.toml found, using built-in defaults");
    apply_env_overrides(SearchFileConfig::default())
}

/// Load configuration from a specific path.
pub fn load_from_path(path: &PathBuf) -> SearchFileConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => apply_env_overrides(config),
            Err(e) => {
                warn!("failed to parse {}: {}, using defaults", path.display(), e);
                apply_env_overrides(SearchFileConfig::default())
            }
        },
        Err(e) => {
            warn!("failed to read {}: {}, using defaults", path.display(), e);
            apply_env_overrides(SearchFileConfig::default())
        }
    }
}

/// Reduce env-override boilerplate: parseable fields only.
macro_rules! env_override {
    ($config:expr, $section:ident . $field:ident, $key:expr) => {
        if let Ok(v) =
            std::env::var($key).and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent))
        {
            $config.$section.$field = v;
        }
    };
}

/// Apply environment variable overrides to a loaded config.
pub fn apply_env_overrides(mut config: SearchFileConfig) -> SearchFileConfig {
    env_override!(config, search.c_puct, "SEARCH_C_PUCT");
    env_override!(config, search.fpu_reduction, "SEARCH_FPU_REDUCTION");
    env_override!(config, search.dirichlet_alpha, "SEARCH_DIRICHLET_ALPHA");
    env_override!(config, search.seed, "SEARCH_SEED");
    env_override!(config, batching.flow_direct_overlapped, "SEARCH_FLOW_DIRECT_OVERLAPPED");
    env_override!(config, batching.flow_dual_selectors, "SEARCH_FLOW_DUAL_SELECTORS");
    env_override!(config, batching.flow_split_selects, "SEARCH_FLOW_SPLIT_SELECTS");
    env_override!(config, batching.smart_size_batches, "SEARCH_SMART_SIZE_BATCHES");
    env_override!(config, batching.max_batch_size, "SEARCH_MAX_BATCH_SIZE");
    env_override!(config, batching.batch_size_multiplier, "SEARCH_BATCH_SIZE_MULTIPLIER");
    env_override!(config, transpositions.transposition_mode, "SEARCH_TRANSPOSITION_MODE");
    env_override!(
        config,
        transpositions.max_transposition_root_applications_fixed,
        "SEARCH_MAX_TRANSPOSITION_ROOT_APPLICATIONS"
    );
    env_override!(config, memory.use_large_pages, "SEARCH_USE_LARGE_PAGES");
    env_override!(config, memory.arena_capacity, "SEARCH_ARENA_CAPACITY");
    env_override!(config, memory.eval_cache_capacity, "SEARCH_EVAL_CACHE_CAPACITY");
    config
}
