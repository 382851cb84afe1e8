//! Interfaces between the search core and the game layer.
//!
//! The search tree never looks inside a position: it clones positions,
//! plays encoded moves on them, asks for hashes, legal moves, and
//! game-over verdicts, and hands encoded inputs to a network evaluator.
//! Everything chess-specific (move generation, Zobrist keys, input
//! planes) lives behind the [`Position`] trait; endgame tables live
//! behind [`TablebaseOracle`].

pub mod position;
pub mod tablebase;

pub use position::{EncodedPosition, GameOutcome, MoveCode, Position, PositionError};
pub use tablebase::{NullTablebase, TablebaseOracle, TbOutcome};
