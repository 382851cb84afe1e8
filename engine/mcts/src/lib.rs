//! Batched Monte Carlo Tree Search with overlapped network evaluation.
//!
//! The crate implements the concurrent search core of a network-guided
//! MCTS engine for two-player zero-sum games. A search grows one shared
//! in-memory tree through repeated cycles of leaf selection, batched
//! network evaluation, and backup, and hides evaluator latency by
//! collecting the next batch while the previous one is on the device.
//!
//! # Pieces
//!
//! - [`store::NodeStore`] — fixed-capacity arena of [`node::NodeRecord`]s
//!   addressed by 32-bit indices; owns all tree memory.
//! - [`transposition::TranspositionIndex`] — hash → node index, staged
//!   writes folded in at batch barriers.
//! - [`leaf_eval`] — pre-network short-circuits: terminal detection,
//!   transposition linkage, cache lookup.
//! - [`selector::LeafSelector`] — PUCT descent under virtual loss,
//!   producing a batch of leaves per selector slot.
//! - [`selected::SelectedNodesSet`] — per-batch partitioning into
//!   network-bound / immediate / cache-only / ignored.
//! - [`batching`] — batch sizing, split collection, breakpoint snapping.
//! - [`flow::SearchFlow`] — the double-buffered orchestrator.
//! - [`backup`] — leaf→root statistics propagation.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mcts::{SearchFlow, SearchLimits, SearchParams, UniformEvaluator};
//!
//! let params = SearchParams::default();
//! let mut flow = SearchFlow::new(position, params, Arc::new(UniformEvaluator::new()))?;
//! let outcome = flow.process_direct_overlapped(&SearchLimits::nodes(100_000), 0, None)?;
//! println!("best {:?} after {} visits", outcome.best_move, outcome.root_visits);
//! ```
//!
//! The game layer is abstract: anything implementing
//! [`game_core::Position`] can be searched, and the network sits behind
//! [`evaluator::NetworkEvaluator`].

pub mod backup;
pub mod batching;
pub mod cache;
pub mod error;
pub mod evaluator;
pub mod flow;
pub mod leaf_eval;
pub mod node;
pub mod params;
pub mod selected;
pub mod selector;
pub mod store;
pub mod test_util;
pub mod transposition;
pub mod tree;

pub use error::{EvalError, SearchError, StoreError};
pub use evaluator::{NetworkEvaluator, NetworkOutput, UniformEvaluator};
pub use flow::{SearchFlow, SearchLimits, SearchOutcome, StopReason};
pub use node::{NodeIndex, NodeRecord, PolicyEntry, Terminal};
pub use params::{SearchParams, TranspositionMode};
pub use selected::{SelectedLeaf, SelectedNodesSet};
pub use selector::LeafSelector;
pub use store::NodeStore;
pub use transposition::TranspositionIndex;
pub use tree::Tree;
