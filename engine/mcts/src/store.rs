//! Fixed-capacity node arena.
//!
//! The backing buffer is reserved once at construction and never
//! reallocated, so node addresses and indices are stable for the life of
//! the search; the OS commits physical pages as the high-water mark
//! grows. Slot 0 holds an inert null record so that index 0 can mean
//! "none" everywhere.

use std::ops::{Index, IndexMut};

use tracing::debug;

use crate::error::StoreError;
use crate::node::{NodeIndex, NodeRecord};

pub struct NodeStore {
    nodes: Vec<NodeRecord>,
    capacity: usize,
}

impl NodeStore {
    /// Reserve an arena for at most `capacity` records (including the
    /// null slot). Large pages are requested through `use_large_pages`;
    /// when the platform has no mapping for them the store continues on
    /// ordinary pages.
    pub fn new(capacity: usize, use_large_pages: bool) -> Self {
        let capacity = capacity.max(2);
        if use_large_pages {
            debug!(capacity, "large pages unavailable for this build, using ordinary pages");
        }
        let mut nodes = Vec::with_capacity(capacity);
        nodes.push(NodeRecord::blank(NodeIndex::NONE));
        Self { nodes, capacity }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        // Slot 0 always exists; "empty" means no real nodes.
        self.nodes.len() <= 1
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.nodes.len()
    }

    #[inline]
    pub fn get(&self, idx: NodeIndex) -> &NodeRecord {
        debug_assert!(idx.is_some(), "null index dereferenced");
        &self.nodes[idx.raw() as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, idx: NodeIndex) -> &mut NodeRecord {
        debug_assert!(idx.is_some(), "null index dereferenced");
        &mut self.nodes[idx.raw() as usize]
    }

    /// Allocate the root record.
    pub fn allocate_root(&mut self) -> Result<NodeIndex, StoreError> {
        self.allocate_block(NodeIndex::NONE, 1)
    }

    /// Allocate `k` contiguous blank child slots and wire them under
    /// `parent`. Returns the index of the first slot.
    pub fn allocate_children(&mut self, parent: NodeIndex, k: u16) -> Result<NodeIndex, StoreError> {
        debug_assert!(k > 0);
        let first = self.allocate_block(parent, k)?;
        let record = self.get_mut(parent);
        record.first_child = first;
        Ok(first)
    }

    fn allocate_block(&mut self, parent: NodeIndex, k: u16) -> Result<NodeIndex, StoreError> {
        let k = k as usize;
        if self.nodes.len() + k > self.capacity {
            return Err(StoreError::ArenaExhausted {
                capacity: self.capacity,
            });
        }
        let first = NodeIndex::new(self.nodes.len() as u32);
        for _ in 0..k {
            self.nodes.push(NodeRecord::blank(parent));
        }
        Ok(first)
    }

    /// Iterate over all real node indices (skips the null slot).
    pub fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        (1..self.nodes.len() as u32).map(NodeIndex::new)
    }
}

impl Index<NodeIndex> for NodeStore {
    type Output = NodeRecord;

    fn index(&self, idx: NodeIndex) -> &NodeRecord {
        self.get(idx)
    }
}

impl IndexMut<NodeIndex> for NodeStore {
    fn index_mut(&mut self, idx: NodeIndex) -> &mut NodeRecord {
        self.get_mut(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_index_one() {
        let mut store = NodeStore::new(16, false);
        let root = store.allocate_root().unwrap();
        assert_eq!(root.raw(), 1);
        assert_eq!(store.len(), 2);
        assert!(!store.is_empty());
    }

    #[test]
    fn children_are_contiguous() {
        let mut store = NodeStore::new(16, false);
        let root = store.allocate_root().unwrap();
        let first = store.allocate_children(root, 3).unwrap();
        assert_eq!(first.raw(), 2);
        assert_eq!(store[root].first_child, first);
        for i in 0..3u32 {
            let child = NodeIndex::new(first.raw() + i);
            assert_eq!(store[child].parent(), root);
        }
    }

    #[test]
    fn exhaustion_is_reported_not_grown() {
        let mut store = NodeStore::new(4, false);
        let root = store.allocate_root().unwrap();
        // 2 slots used (null + root); a block of 3 cannot fit.
        let err = store.allocate_children(root, 3).unwrap_err();
        assert_eq!(err, StoreError::ArenaExhausted { capacity: 4 });
        // Failed allocation leaves the parent unexpanded.
        assert!(!store[root].is_expanded());
        assert_eq!(store.len(), 2);
        // A smaller block still fits.
        assert!(store.allocate_children(root, 2).is_ok());
        assert_eq!(store.remaining(), 0);
    }

    #[test]
    fn large_page_request_falls_back() {
        let store = NodeStore::new(8, true);
        assert_eq!(store.capacity(), 8);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn indices_skip_null_slot() {
        let mut store = NodeStore::new(8, false);
        let root = store.allocate_root().unwrap();
        store.allocate_children(root, 2).unwrap();
        let all: Vec<u32> = store.indices().map(NodeIndex::raw).collect();
        assert_eq!(all, vec![1, 2, 3]);
    }
}
