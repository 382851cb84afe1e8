//! Tree node records.
//!
//! Nodes live in a fixed-capacity arena ([`crate::store::NodeStore`]) and
//! reference each other by 32-bit index: parents store the base index of
//! their contiguous child block, children store their parent's index, and
//! nothing owns anything. Index 0 is the reserved null index, so "no
//! parent", "not expanded", and "no transposition link" are all plain
//! zeros in the record.

use std::sync::atomic::{AtomicU32, Ordering};

use game_core::MoveCode;

/// Index of a node in the arena. 0 is the null index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex(u32);

impl NodeIndex {
    pub const NONE: NodeIndex = NodeIndex(0);

    #[inline]
    pub(crate) fn new(raw: u32) -> Self {
        NodeIndex(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_some(self) -> bool {
        self.0 != 0
    }
}

/// Terminal classification of a node's position.
///
/// Win/loss are from the perspective of the side to move at the node, the
/// same perspective as the node's value. A detected mate is therefore
/// `CheckmateLoss` at the mated node; backup marks its parent
/// `CheckmateWin` (mate in one, no further descent needed). Rule draws
/// (threefold, 50-move) are folded into `Stalemate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    None,
    CheckmateWin,
    CheckmateLoss,
    Stalemate,
    TablebaseWin,
    TablebaseDraw,
    TablebaseLoss,
}

impl Terminal {
    #[inline]
    pub fn is_terminal(self) -> bool {
        self != Terminal::None
    }

    /// Deterministic value for the side to move.
    pub fn value(self) -> f32 {
        match self {
            Terminal::CheckmateWin | Terminal::TablebaseWin => 1.0,
            Terminal::CheckmateLoss | Terminal::TablebaseLoss => -1.0,
            Terminal::Stalemate | Terminal::TablebaseDraw | Terminal::None => 0.0,
        }
    }

    /// `(win_p, loss_p)` for the side to move; draw is the remainder.
    pub fn wdl(self) -> (f32, f32) {
        match self {
            Terminal::CheckmateWin | Terminal::TablebaseWin => (1.0, 0.0),
            Terminal::CheckmateLoss | Terminal::TablebaseLoss => (0.0, 1.0),
            Terminal::Stalemate | Terminal::TablebaseDraw | Terminal::None => (0.0, 0.0),
        }
    }
}

/// One entry of a node's policy table: a legal move and its prior.
#[derive(Debug, Clone, Copy)]
pub struct PolicyEntry {
    pub mv: MoveCode,
    pub p: f32,
}

/// A node record in the arena.
///
/// The in-flight counters are atomic because they are the one piece of
/// state touched during descent; everything else is written only under
/// the apply barrier through the coordinator's exclusive borrow.
#[derive(Debug)]
pub struct NodeRecord {
    pub(crate) parent: NodeIndex,
    pub(crate) first_child: NodeIndex,
    pub(crate) num_policy_moves: u16,
    pub(crate) num_children_expanded: u16,

    /// Completed (applied) visits.
    pub(crate) n: u32,
    in_flight: [AtomicU32; 2],

    /// Value/draw/moves-left accumulators, side-to-move perspective.
    pub(crate) w_sum: f64,
    pub(crate) d_sum: f64,
    pub(crate) m_sum: f64,

    /// Raw network (or terminal) outputs for this position.
    pub(crate) v: f32,
    pub(crate) win_p: f32,
    pub(crate) loss_p: f32,
    pub(crate) m_position: f32,

    /// Position has been reached and its hash/terminal state filled in.
    pub(crate) materialized: bool,
    /// Value and policy are populated (network, cache, or copy).
    pub(crate) evaluated: bool,

    pub(crate) terminal: Terminal,
    pub(crate) zobrist: u64,

    pub(crate) transposition_root: NodeIndex,
    pub(crate) pending_transposition_visits: u8,

    /// Policy table; empty until the node is evaluated.
    pub(crate) policy: Box<[PolicyEntry]>,
}

impl NodeRecord {
    pub(crate) fn blank(parent: NodeIndex) -> Self {
        Self {
            parent,
            first_child: NodeIndex::NONE,
            num_policy_moves: 0,
            num_children_expanded: 0,
            n: 0,
            in_flight: [AtomicU32::new(0), AtomicU32::new(0)],
            w_sum: 0.0,
            d_sum: 0.0,
            m_sum: 0.0,
            v: 0.0,
            win_p: 0.0,
            loss_p: 0.0,
            m_position: 0.0,
            materialized: false,
            evaluated: false,
            terminal: Terminal::None,
            zobrist: 0,
            transposition_root: NodeIndex::NONE,
            pending_transposition_visits: 0,
            policy: Box::new([]),
        }
    }

    #[inline]
    pub fn parent(&self) -> NodeIndex {
        self.parent
    }

    #[inline]
    pub fn n(&self) -> u32 {
        self.n
    }

    #[inline]
    pub fn terminal(&self) -> Terminal {
        self.terminal
    }

    #[inline]
    pub fn zobrist(&self) -> u64 {
        self.zobrist
    }

    #[inline]
    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    /// Raw value output for this position (network, terminal, or copy).
    #[inline]
    pub fn v(&self) -> f32 {
        self.v
    }

    #[inline]
    pub fn win_p(&self) -> f32 {
        self.win_p
    }

    #[inline]
    pub fn loss_p(&self) -> f32 {
        self.loss_p
    }

    #[inline]
    pub fn m_position(&self) -> f32 {
        self.m_position
    }

    #[inline]
    pub fn is_expanded(&self) -> bool {
        self.first_child.is_some()
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        self.transposition_root.is_some()
    }

    #[inline]
    pub fn transposition_root(&self) -> NodeIndex {
        self.transposition_root
    }

    #[inline]
    pub fn num_policy_moves(&self) -> u16 {
        self.num_policy_moves
    }

    #[inline]
    pub fn num_children_expanded(&self) -> u16 {
        self.num_children_expanded
    }

    #[inline]
    pub fn policy(&self) -> &[PolicyEntry] {
        &self.policy
    }

    /// Index of the `i`-th child; only meaningful once expanded.
    #[inline]
    pub fn child_index(&self, i: u16) -> NodeIndex {
        debug_assert!(self.first_child.is_some() && i < self.num_policy_moves);
        NodeIndex::new(self.first_child.raw() + u32::from(i))
    }

    /// Mean value for the side to move; NaN while unvisited. Callers in
    /// the selection path substitute first-play urgency for the NaN.
    #[inline]
    pub fn q(&self) -> f32 {
        (self.w_sum / f64::from(self.n)) as f32
    }

    /// Mean draw probability; 0 while unvisited.
    #[inline]
    pub fn d_avg(&self) -> f32 {
        if self.n == 0 {
            0.0
        } else {
            (self.d_sum / f64::from(self.n)) as f32
        }
    }

    /// Mean moves-left estimate; 0 while unvisited.
    #[inline]
    pub fn m_avg(&self) -> f32 {
        if self.n == 0 {
            0.0
        } else {
            (self.m_sum / f64::from(self.n)) as f32
        }
    }

    #[inline]
    pub fn in_flight(&self, slot: usize) -> u32 {
        self.in_flight[slot].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn in_flight_total(&self) -> u32 {
        self.in_flight[0].load(Ordering::Relaxed) + self.in_flight[1].load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn add_in_flight(&self, slot: usize, visits: u32) {
        self.in_flight[slot].fetch_add(visits, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn remove_in_flight(&self, slot: usize, visits: u32) {
        let prev = self.in_flight[slot].fetch_sub(visits, Ordering::Relaxed);
        debug_assert!(prev >= visits, "in-flight counter underflow");
    }

    #[inline]
    pub fn pending_transposition_visits(&self) -> u8 {
        self.pending_transposition_visits
    }
}
