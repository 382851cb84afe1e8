//! Deterministic synthetic game for tests and benches.
//!
//! A position is just the move path from the start. The game rules control
//! branching, depth, forced-mate paths, rule-draw paths, and whether
//! hashing is order-independent (so that different move orders produce
//! transpositions, the way real move-order swaps do).

use std::sync::Arc;

use game_core::{EncodedPosition, GameOutcome, MoveCode, Position, PositionError};

#[derive(Debug, Clone)]
pub struct SyntheticGame {
    branching: u8,
    max_depth: u8,
    mate_paths: Vec<Vec<u16>>,
    rule_draw_paths: Vec<Vec<u16>>,
    commutative_hash: bool,
}

impl SyntheticGame {
    /// `branching` moves everywhere, stalemate at `max_depth`.
    pub fn uniform(branching: u8, max_depth: u8) -> Self {
        assert!(branching > 0);
        Self {
            branching,
            max_depth,
            mate_paths: Vec::new(),
            rule_draw_paths: Vec::new(),
            commutative_hash: false,
        }
    }

    /// The position reached by exactly `path` is checkmate (side to move
    /// mated).
    pub fn with_mate_path(mut self, path: &[u16]) -> Self {
        self.mate_paths.push(path.to_vec());
        self
    }

    /// The position reached by exactly `path` is a rule draw.
    pub fn with_rule_draw_path(mut self, path: &[u16]) -> Self {
        self.rule_draw_paths.push(path.to_vec());
        self
    }

    /// Hash positions by their move multiset instead of the move order,
    /// so any permutation of the same moves transposes.
    pub fn with_transpositions(mut self) -> Self {
        self.commutative_hash = true;
        self
    }

    pub fn start(&self) -> SyntheticPosition {
        SyntheticPosition {
            rules: Arc::new(self.clone()),
            path: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct SyntheticPosition {
    rules: Arc<SyntheticGame>,
    path: Vec<u16>,
}

impl SyntheticPosition {
    pub fn path(&self) -> &[u16] {
        &self.path
    }
}

fn mix(mut x: u64) -> u64 {
    // splitmix64 finalizer.
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

impl Position for SyntheticPosition {
    fn zobrist(&self) -> u64 {
        let base = mix(0x5eed ^ (self.path.len() as u64) << 32);
        if self.rules.commutative_hash {
            // Wrapping sum is order-independent; the length term keeps
            // different plies distinct.
            self.path
                .iter()
                .fold(base, |acc, &m| acc.wrapping_add(mix(u64::from(m) + 1)))
        } else {
            self.path
                .iter()
                .fold(base, |acc, &m| mix(acc ^ mix(u64::from(m) + 1)))
        }
    }

    fn legal_moves(&self) -> Vec<MoveCode> {
        if self.outcome().is_some() {
            return Vec::new();
        }
        (0..self.rules.branching).map(|m| MoveCode(u16::from(m))).collect()
    }

    fn play(&mut self, mv: MoveCode) -> Result<(), PositionError> {
        if self.outcome().is_some() || mv.raw() >= u16::from(self.rules.branching) {
            return Err(PositionError::IllegalMove(mv.raw()));
        }
        self.path.push(mv.raw());
        Ok(())
    }

    fn outcome(&self) -> Option<GameOutcome> {
        if self.rules.mate_paths.iter().any(|p| p[..] == self.path[..]) {
            return Some(GameOutcome::Checkmate);
        }
        if self.path.len() >= usize::from(self.rules.max_depth) {
            return Some(GameOutcome::Stalemate);
        }
        None
    }

    fn is_rule_draw(&self) -> bool {
        self.rules.rule_draw_paths.iter().any(|p| p[..] == self.path[..])
    }

    fn encode(&self) -> EncodedPosition {
        let mut planes = Vec::with_capacity(self.path.len() * 2);
        for &m in &self.path {
            planes.extend_from_slice(&m.to_le_bytes());
        }
        EncodedPosition {
            planes,
            moves: self.legal_moves(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_extends_path() {
        let game = SyntheticGame::uniform(3, 4);
        let mut pos = game.start();
        pos.play(MoveCode(1)).unwrap();
        pos.play(MoveCode(2)).unwrap();
        assert_eq!(pos.path(), &[1, 2]);
        assert!(pos.play(MoveCode(3)).is_err());
    }

    #[test]
    fn depth_limit_is_stalemate() {
        let game = SyntheticGame::uniform(2, 2);
        let mut pos = game.start();
        pos.play(MoveCode(0)).unwrap();
        assert_eq!(pos.outcome(), None);
        pos.play(MoveCode(1)).unwrap();
        assert_eq!(pos.outcome(), Some(GameOutcome::Stalemate));
        assert!(pos.legal_moves().is_empty());
        assert!(pos.play(MoveCode(0)).is_err());
    }

    #[test]
    fn mate_path_is_checkmate() {
        let game = SyntheticGame::uniform(2, 6).with_mate_path(&[0, 1]);
        let mut pos = game.start();
        pos.play(MoveCode(0)).unwrap();
        pos.play(MoveCode(1)).unwrap();
        assert_eq!(pos.outcome(), Some(GameOutcome::Checkmate));
    }

    #[test]
    fn ordered_hash_distinguishes_orders() {
        let game = SyntheticGame::uniform(3, 8);
        let mut a = game.start();
        a.play(MoveCode(0)).unwrap();
        a.play(MoveCode(1)).unwrap();
        let mut b = game.start();
        b.play(MoveCode(1)).unwrap();
        b.play(MoveCode(0)).unwrap();
        assert_ne!(a.zobrist(), b.zobrist());
    }

    #[test]
    fn commutative_hash_transposes() {
        let game = SyntheticGame::uniform(3, 8).with_transpositions();
        let mut a = game.start();
        a.play(MoveCode(0)).unwrap();
        a.play(MoveCode(1)).unwrap();
        let mut b = game.start();
        b.play(MoveCode(1)).unwrap();
        b.play(MoveCode(0)).unwrap();
        assert_eq!(a.zobrist(), b.zobrist());
        // Different plies of the same moves stay distinct.
        let mut c = game.start();
        c.play(MoveCode(0)).unwrap();
        assert_ne!(a.zobrist(), c.zobrist());
    }

    #[test]
    fn rule_draw_path_detected() {
        let game = SyntheticGame::uniform(2, 8).with_rule_draw_path(&[1, 1]);
        let mut pos = game.start();
        pos.play(MoveCode(1)).unwrap();
        assert!(!pos.is_rule_draw());
        pos.play(MoveCode(1)).unwrap();
        assert!(pos.is_rule_draw());
    }
}
