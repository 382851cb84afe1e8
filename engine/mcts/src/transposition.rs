//! Position-hash → node-index map.
//!
//! Reads happen throughout descent; writes are staged per selector slot
//! and folded in at the end-of-batch barrier, so from the descent's point
//! of view the index is append-only. Duplicate hashes keep the first
//! inserted index.

use rustc_hash::FxHashMap;

use crate::node::NodeIndex;

pub struct TranspositionIndex {
    map: FxHashMap<u64, NodeIndex>,
    staged: [Vec<(u64, NodeIndex)>; 2],
    staging_capacity: usize,
    dropped: u64,
}

impl TranspositionIndex {
    pub fn new(staging_capacity: usize) -> Self {
        Self {
            map: FxHashMap::default(),
            staged: [Vec::new(), Vec::new()],
            staging_capacity: staging_capacity.max(1),
            dropped: 0,
        }
    }

    /// First inserted index for `hash`, if any. Staged entries are not
    /// visible until flushed.
    #[inline]
    pub fn try_get(&self, hash: u64) -> Option<NodeIndex> {
        self.map.get(&hash).copied()
    }

    /// Insert directly, first-wins. Returns whether the entry was new.
    pub fn try_add(&mut self, hash: u64, index: NodeIndex) -> bool {
        use std::collections::hash_map::Entry;
        match self.map.entry(hash) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(index);
                true
            }
        }
    }

    /// Stage an insert from the given selector slot. Entries past the
    /// staging bound are dropped; a dropped entry only costs a future
    /// transposition hit.
    pub fn stage(&mut self, slot: usize, hash: u64, index: NodeIndex) {
        let buf = &mut self.staged[slot];
        if buf.len() >= self.staging_capacity {
            self.dropped += 1;
            return;
        }
        buf.push((hash, index));
    }

    /// Fold one slot's staged inserts into the map. Called at the batch
    /// barrier, after that slot's apply completed. Idempotent on
    /// duplicate hashes (first-wins).
    pub fn flush_pending(&mut self, slot: usize) {
        let staged = std::mem::take(&mut self.staged[slot]);
        for (hash, index) in staged {
            self.try_add(hash, index);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[inline]
    pub fn staged_len(&self, slot: usize) -> usize {
        self.staged[slot].len()
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(raw: u32) -> NodeIndex {
        // Test-only back door; real indices come from the store.
        NodeIndex::new(raw)
    }

    #[test]
    fn first_wins() {
        let mut tt = TranspositionIndex::new(16);
        assert!(tt.try_add(0xabc, idx(1)));
        assert!(!tt.try_add(0xabc, idx(2)));
        assert_eq!(tt.try_get(0xabc), Some(idx(1)));
    }

    #[test]
    fn staged_entries_invisible_until_flush() {
        let mut tt = TranspositionIndex::new(16);
        tt.stage(0, 0x11, idx(3));
        assert_eq!(tt.try_get(0x11), None);
        tt.flush_pending(0);
        assert_eq!(tt.try_get(0x11), Some(idx(3)));
        assert_eq!(tt.staged_len(0), 0);
    }

    #[test]
    fn flush_is_per_slot() {
        let mut tt = TranspositionIndex::new(16);
        tt.stage(0, 0x11, idx(3));
        tt.stage(1, 0x22, idx(4));
        tt.flush_pending(0);
        assert_eq!(tt.try_get(0x11), Some(idx(3)));
        assert_eq!(tt.try_get(0x22), None);
        tt.flush_pending(1);
        assert_eq!(tt.try_get(0x22), Some(idx(4)));
    }

    #[test]
    fn flush_keeps_first_insert_on_duplicates() {
        let mut tt = TranspositionIndex::new(16);
        tt.try_add(0x5, idx(9));
        tt.stage(0, 0x5, idx(10));
        tt.stage(0, 0x6, idx(11));
        tt.stage(1, 0x6, idx(12));
        tt.flush_pending(0);
        tt.flush_pending(1);
        assert_eq!(tt.try_get(0x5), Some(idx(9)));
        assert_eq!(tt.try_get(0x6), Some(idx(11)));
        assert_eq!(tt.len(), 2);
    }

    #[test]
    fn staging_is_bounded() {
        let mut tt = TranspositionIndex::new(2);
        tt.stage(0, 1, idx(1));
        tt.stage(0, 2, idx(2));
        tt.stage(0, 3, idx(3));
        assert_eq!(tt.staged_len(0), 2);
        assert_eq!(tt.dropped(), 1);
        tt.flush_pending(0);
        assert_eq!(tt.try_get(3), None);
    }
}
