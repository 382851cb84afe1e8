//! Network evaluator interface.
//!
//! The search consumes evaluators through this trait and never sees
//! weights, devices, or tensors. Real backends batch positions onto an
//! accelerator and expose the batch sizes the device prefers; the search
//! snaps its batch budget to those.

use game_core::EncodedPosition;

pub use crate::error::EvalError;

/// Output of one position evaluation.
#[derive(Debug, Clone)]
pub struct NetworkOutput {
    /// Expected value for the side to move, in `[-1, 1]`.
    pub value: f32,
    /// Win probability for the side to move.
    pub win_p: f32,
    /// Loss probability for the side to move.
    pub loss_p: f32,
    /// Expected remaining plies.
    pub moves_left: f32,
    /// Prior per legal move, matched to `EncodedPosition::moves`.
    pub policy: Vec<(game_core::MoveCode, f32)>,
}

/// A batching position evaluator.
pub trait NetworkEvaluator: Send + Sync {
    /// Largest batch a single `evaluate` call accepts.
    fn max_batch_size(&self) -> usize {
        1024
    }

    /// Batch sizes at which the device's throughput is locally maximal,
    /// ascending. Empty when the evaluator has no preference.
    fn optimal_batch_breaks(&self) -> &[usize] {
        &[]
    }

    /// Evaluate a batch. Must return exactly one output per input, in
    /// order, with each policy matched to that input's move list.
    fn evaluate(&self, batch: &[EncodedPosition]) -> Result<Vec<NetworkOutput>, EvalError>;
}

/// No-network mode: uniform priors over the legal moves and a constant
/// value. Also the workhorse evaluator for tests and benches.
#[derive(Debug, Clone, Default)]
pub struct UniformEvaluator {
    pub value: f32,
}

impl UniformEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: f32) -> Self {
        Self { value }
    }
}

impl NetworkEvaluator for UniformEvaluator {
    fn evaluate(&self, batch: &[EncodedPosition]) -> Result<Vec<NetworkOutput>, EvalError> {
        Ok(batch
            .iter()
            .map(|pos| {
                let k = pos.moves.len().max(1);
                let p = 1.0 / k as f32;
                NetworkOutput {
                    value: self.value,
                    win_p: (self.value.max(0.0)).min(1.0),
                    loss_p: ((-self.value).max(0.0)).min(1.0),
                    moves_left: 40.0,
                    policy: pos.moves.iter().map(|&mv| (mv, p)).collect(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_core::MoveCode;

    fn encoded(moves: &[u16]) -> EncodedPosition {
        EncodedPosition {
            planes: vec![0u8; 4],
            moves: moves.iter().map(|&m| MoveCode(m)).collect(),
        }
    }

    #[test]
    fn uniform_policy_sums_to_one() {
        let eval = UniformEvaluator::new();
        let out = eval.evaluate(&[encoded(&[0, 1, 2, 3])]).unwrap();
        assert_eq!(out.len(), 1);
        let total: f32 = out[0].policy.iter().map(|&(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert_eq!(out[0].value, 0.0);
    }

    #[test]
    fn uniform_respects_batch_order() {
        let eval = UniformEvaluator::with_value(0.5);
        let out = eval
            .evaluate(&[encoded(&[0]), encoded(&[0, 1]), encoded(&[0, 1, 2])])
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].policy.len(), 1);
        assert_eq!(out[2].policy.len(), 3);
        assert!((out[1].policy[0].1 - 0.5).abs() < 1e-6);
        assert!((out[0].value - 0.5).abs() < 1e-6);
        assert!((out[0].win_p - 0.5).abs() < 1e-6);
        assert_eq!(out[0].loss_p, 0.0);
    }
}
