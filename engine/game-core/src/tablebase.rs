//! Endgame tablebase oracle.
//!
//! The search only ever asks one question: "is this position a known
//! win/draw/loss for the side to move?" Probing strategy, file formats,
//! and caching are the oracle's business.

use crate::position::Position;

/// Tablebase verdict for the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbOutcome {
    Win,
    Draw,
    Loss,
}

/// An oracle that may resolve positions from endgame tables.
pub trait TablebaseOracle<P: Position>: Send + Sync {
    /// `None` when the position is not covered by the tables.
    fn probe(&self, position: &P) -> Option<TbOutcome>;
}

/// Oracle used when no tablebases are configured; never resolves.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTablebase;

impl<P: Position> TablebaseOracle<P> for NullTablebase {
    fn probe(&self, _position: &P) -> Option<TbOutcome> {
        None
    }
}
