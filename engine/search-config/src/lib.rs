//! File and environment configuration for the search core.
//!
//! Reads `search.toml` (all sections optional, all fields defaulted),
//! applies `SEARCH_*` environment overrides, and converts into
//! [`mcts::SearchParams`]:
//!
//! ```rust,ignore
//! let params = search_config::load_config().to_params();
//! ```

pub mod defaults;
pub mod loader;
pub mod structs;

pub use loader::{apply_env_overrides, load_config, load_from_path, CONFIG_SEARCH_PATHS};
pub use structs::{
    BatchingSection, MemorySection, SearchFileConfig, SearchSection, TranspositionSection,
};

#[cfg(test)]
mod tests;
