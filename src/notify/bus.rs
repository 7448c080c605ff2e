//! Subscription registry and dispatch

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;

use super::{ChangeRecord, Observer};

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Registry of observers
///
/// Dispatch works on a copy of the observer list, so observers may
/// subscribe or unsubscribe from inside a callback.
pub struct ChangeBus {
    next_id: AtomicU64,
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn Observer>)>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer
    pub fn subscribe(&self, observer: impl Observer + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        tracing::debug!("Observer {:?} subscribed", id);
        id
    }

    /// Register an unbounded channel; records are sent, never awaited
    pub fn subscribe_channel(&self) -> (SubscriptionId, Receiver<ChangeRecord>) {
        let (tx, rx) = channel::unbounded();
        let id = self.subscribe(ChannelObserver(tx));
        (id, rx)
    }

    /// Remove an observer; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        let removed = observers.len() != before;
        if removed {
            tracing::debug!("Observer {:?} unsubscribed", id);
        }
        removed
    }

    /// Deliver records to every observer, in order
    pub fn publish(&self, records: &[ChangeRecord]) {
        if records.is_empty() {
            return;
        }

        let observers: Vec<_> = self.observers.read().clone();
        if observers.is_empty() {
            return;
        }

        for record in records {
            for (id, observer) in &observers {
                let delivered =
                    panic::catch_unwind(AssertUnwindSafe(|| observer.on_change(record)));
                if delivered.is_err() {
                    tracing::error!(
                        "Observer {:?} panicked handling change to {:?} (lsn {})",
                        id,
                        String::from_utf8_lossy(&record.key),
                        record.lsn
                    );
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers.read().len()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

struct ChannelObserver(Sender<ChangeRecord>);

impl Observer for ChannelObserver {
    fn on_change(&self, record: &ChangeRecord) {
        if self.0.send(record.clone()).is_err() {
            tracing::trace!("Change receiver dropped; record {} discarded", record.lsn);
        }
    }
}
