//! The change queue.
//!
//! Buffers pending `(entity, mask)` pairs between flushes. Repeated
//! notifications for one entity coalesce by mask union, so an entity is
//! present at most once in any drained batch.

use std::collections::HashMap;
use std::hash::Hash;

use roster_bridge_core::{ChangeMask, Facet};

/// Pending changes keyed by entity identity.
pub type PendingChange<K, F> = HashMap<K, ChangeMask<F>>;

/// A coalescing queue of pending changes.
#[derive(Debug)]
pub struct ChangeQueue<K, F: Facet> {
    pending: PendingChange<K, F>,
}

impl<K: Hash + Eq + Clone, F: Facet> ChangeQueue<K, F> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Add `mask` to the pending entry for `key`.
    ///
    /// Returns false for an empty mask, which is dropped.
    pub fn enqueue(&mut self, key: K, mask: ChangeMask<F>) -> bool {
        if mask.is_empty() {
            return false;
        }
        *self.pending.entry(key).or_default() |= mask;
        true
    }

    /// Empty the queue, returning its prior contents.
    pub fn drain(&mut self) -> PendingChange<K, F> {
        std::mem::take(&mut self.pending)
    }

    /// Drop a pending entry without flushing it.
    pub fn cancel(&mut self, key: &K) -> Option<ChangeMask<F>> {
        self.pending.remove(key)
    }

    /// Keep only the entries matching `keep`. Returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|k, _| keep(k));
        before - self.pending.len()
    }

    pub fn get(&self, key: &K) -> Option<ChangeMask<F>> {
        self.pending.get(key).copied()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.pending.keys()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<K: Hash + Eq + Clone, F: Facet> Default for ChangeQueue<K, F> {
    fn default() -> Self {
        Self::new()
    }
}
