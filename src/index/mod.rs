//! Index Module
//!
//! In-memory map from keys to the location of their current value.
//!
//! ## Responsibilities
//! - O(log n) lookups without touching the log for small values
//! - Track the live data size for quota checks and compaction
//! - Ordered iteration for key enumeration and compaction
//!
//! ## Data Structure Choice
//! A `BTreeMap` keyed by [`Key`]:
//! - Ordered keys give a stable, documented enumeration order
//! - The whole map is replaced on rebuild, never patched from outside
//!
//! The index never holds data the log does not; it is updated only after a
//! record is durable and can be rebuilt from the log at any time.

mod key;
mod table;

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::wal::RecordLocation;

pub use key::Key;
pub use table::Index;

/// Result of folding the log: every live key and where its value lives
pub type Snapshot = BTreeMap<Key, ValueSlot>;

/// Where a live value can be found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSlot {
    /// The value itself, cached in memory
    Inline(Bytes),

    /// The record that wrote the value; read back from the log on demand
    OnDisk {
        location: RecordLocation,
        value_len: usize,
    },
}

impl ValueSlot {
    /// Pick inline or out-of-line storage for a value just written at `location`
    pub fn for_value(value: &[u8], location: RecordLocation, inline_limit: usize) -> Self {
        if value.len() <= inline_limit {
            ValueSlot::Inline(Bytes::copy_from_slice(value))
        } else {
            ValueSlot::OnDisk {
                location,
                value_len: value.len(),
            }
        }
    }

    /// Length of the value in bytes
    pub fn value_len(&self) -> usize {
        match self {
            ValueSlot::Inline(bytes) => bytes.len(),
            ValueSlot::OnDisk { value_len, .. } => *value_len,
        }
    }
}
