//! Search error taxonomy.

use thiserror::Error;

/// Errors that terminate a search.
///
/// Arena exhaustion is deliberately *not* here: running out of node
/// storage ends the search gracefully with best-so-far results, so the
/// flow reports it through [`crate::flow::StopReason::ArenaExhausted`].
/// [`StoreError::ArenaExhausted`] is the internal signal that bubbles up
/// to the flow.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("evaluator failure: {0}")]
    Evaluator(#[from] EvalError),

    #[error(transparent)]
    Position(#[from] game_core::PositionError),

    /// Unreachable-state report. Violations detected during backup are
    /// logged and absorbed in place (best-effort draw visits, cleared
    /// linkage); this variant surfaces only where no recovery exists.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

/// Node-store allocation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("node arena exhausted (capacity {capacity} nodes)")]
    ArenaExhausted { capacity: usize },
}

/// Failures from the network evaluator or its worker task.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("batch of {got} positions exceeds evaluator maximum {max}")]
    BatchTooLarge { got: usize, max: usize },

    #[error("evaluation returned {got} outputs for {want} positions")]
    OutputCountMismatch { got: usize, want: usize },

    #[error("evaluator worker disconnected")]
    WorkerDisconnected,
}

impl SearchError {
    /// True when the error is arena exhaustion, which the flow converts
    /// into a graceful stop instead of a hard failure.
    pub fn is_arena_exhausted(&self) -> bool {
        matches!(self, SearchError::Store(StoreError::ArenaExhausted { .. }))
    }
}
