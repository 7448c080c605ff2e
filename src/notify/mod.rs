//! Change Notification Module
//!
//! Lets observers react to committed mutations without polling.
//!
//! ## Delivery Guarantees
//! - Synchronous: observers run on the committing thread, after the record
//!   is durable and the index is updated
//! - Ordered: records arrive in commit order
//! - Isolated: a panicking observer is logged and skipped; the mutation
//!   that triggered it still succeeds
//!
//! Observers run while the store's writer region is held. They may read
//! from the store; a mutation from inside an observer fails with
//! `StoreError::ReentrantWrite` rather than blocking.

mod bus;

use bytes::Bytes;

pub use bus::{ChangeBus, SubscriptionId};

/// One committed change to one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub key: Bytes,
    /// Key had a value before the mutation
    pub old_value_present: bool,
    /// Key has a value after the mutation
    pub new_value_present: bool,
    /// LSN of the record that committed the change
    pub lsn: u64,
}

/// Receives change records
pub trait Observer: Send + Sync {
    fn on_change(&self, record: &ChangeRecord);
}

impl<F> Observer for F
where
    F: Fn(&ChangeRecord) + Send + Sync,
{
    fn on_change(&self, record: &ChangeRecord) {
        self(record)
    }
}
