//! The position seam: what the search needs from a game implementation.

use thiserror::Error;

/// Errors surfaced by a game implementation.
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("illegal move {0:#06x} in this position")]
    IllegalMove(u16),

    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

/// An encoded move, opaque to the search. The game layer defines the
/// encoding; the search only stores, compares, and replays these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MoveCode(pub u16);

impl MoveCode {
    #[inline]
    pub fn raw(self) -> u16 {
        self.0
    }
}

/// Verdict at a position where the side to move has no legal moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    /// Side to move is mated.
    Checkmate,
    /// Side to move has no moves but is not in check.
    Stalemate,
}

/// Network input for one position, plus the legal-move list the returned
/// policy is matched against.
#[derive(Debug, Clone)]
pub struct EncodedPosition {
    /// Raw input planes in the evaluator's expected byte layout.
    pub planes: Vec<u8>,
    /// Legal moves at this position, in generation order.
    pub moves: Vec<MoveCode>,
}

/// A game position the search can descend through.
///
/// Implementations carry whatever history they need for repetition and
/// 50-move detection; `Clone` must preserve it. The search clones a
/// position once per descent and replays moves along the chosen path.
pub trait Position: Clone + Send + 'static {
    /// Position hash. Equal hashes are treated as equal positions by the
    /// transposition machinery, so the game layer's hashing must fold in
    /// side to move, castling rights, and en passant.
    fn zobrist(&self) -> u64;

    /// Legal moves for the side to move. Empty iff `outcome()` is `Some`.
    fn legal_moves(&self) -> Vec<MoveCode>;

    /// Play a move in place.
    fn play(&mut self, mv: MoveCode) -> Result<(), PositionError>;

    /// Game-over verdict, `None` while the game is still running.
    fn outcome(&self) -> Option<GameOutcome>;

    /// True when the played line has hit a threefold repetition or the
    /// 50-move limit. Checked by the search at every new node so that
    /// repetition loops cannot trap a descent.
    fn is_rule_draw(&self) -> bool;

    /// Encode this position for the network evaluator.
    fn encode(&self) -> EncodedPosition;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_code_ordering_is_raw_ordering() {
        assert!(MoveCode(3) < MoveCode(7));
        assert_eq!(MoveCode(42).raw(), 42);
    }

    #[test]
    fn illegal_move_error_formats_code() {
        let err = PositionError::IllegalMove(0x1a2b);
        assert!(err.to_string().contains("0x1a2b"));
    }
}
