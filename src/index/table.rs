//! Index implementation
//!
//! BTreeMap-based index. Locking is the engine's job: the engine wraps the
//! index in an `RwLock` so a multi-key read sees a single snapshot.

use std::collections::btree_map;

use super::{Key, Snapshot, ValueSlot};

/// Frame bytes a compacted `Put` record adds on top of its key and value:
/// header (20) + lsn (8) + variant tag (4) + two length prefixes (16) + timestamp (8)
pub const PUT_RECORD_OVERHEAD: u64 = 56;

/// In-memory index of the live key set
#[derive(Debug, Default)]
pub struct Index {
    entries: Snapshot,
    /// Sum of key + value lengths over live entries
    data_size: u64,
}

impl Index {
    /// Create a new empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a folded log
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut index = Self::new();
        index.rebuild(snapshot);
        index
    }

    /// Look up a key
    pub fn lookup(&self, key: &[u8]) -> Option<&ValueSlot> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace a key, returning the previous slot
    pub fn upsert(&mut self, key: Key, slot: ValueSlot) -> Option<ValueSlot> {
        let added = (key.len() + slot.value_len()) as u64;
        let key_len = key.len() as u64;

        let previous = self.entries.insert(key, slot);
        if let Some(old) = &previous {
            self.data_size -= key_len + old.value_len() as u64;
        }
        self.data_size += added;
        previous
    }

    /// Remove a key, returning its slot if it was present
    pub fn remove(&mut self, key: &[u8]) -> Option<ValueSlot> {
        let previous = self.entries.remove(key);
        if let Some(old) = &previous {
            self.data_size -= (key.len() + old.value_len()) as u64;
        }
        previous
    }

    /// Remove every key, returning the removed keys in order
    pub fn clear(&mut self) -> Vec<Key> {
        let removed = std::mem::take(&mut self.entries);
        self.data_size = 0;
        removed.into_keys().collect()
    }

    /// Replace the whole index
    pub fn rebuild(&mut self, snapshot: Snapshot) {
        self.data_size = snapshot
            .iter()
            .map(|(k, slot)| (k.len() + slot.value_len()) as u64)
            .sum();
        self.entries = snapshot;
    }

    /// All keys in order
    pub fn keys(&self) -> Vec<Key> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Key, ValueSlot> {
        self.entries.iter()
    }

    /// Get entry count
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of key + value lengths over live entries
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    /// Size the log would have right after a compaction
    pub fn compacted_log_size(&self) -> u64 {
        self.data_size + self.entries.len() as u64 * PUT_RECORD_OVERHEAD
    }
}
