//! Engine Module
//!
//! The store facade that coordinates the log, the index and the change bus.
//!
//! ## Responsibilities
//! - Validate keys and sizes once, on entry
//! - Commit ordering: durable append → index update → notification
//! - Concurrent readers, serialized writers
//! - Recovery on open and compaction while running

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::config::{Config, ReadFailurePolicy};
use crate::error::{Result, StoreError};
use crate::index::{Index, Key, ValueSlot};
use crate::notify::{ChangeBus, ChangeRecord, Observer, SubscriptionId};
use crate::storage::{LogReader, LogStore, RecoveryAction, RecoveryReport};
use crate::wal::{Mutation, Operation, RecordLocation, MAX_PAYLOAD_SIZE, MUTATION_OVERHEAD};

use crossbeam::channel::Receiver;

/// Index plus the handle used to fetch out-of-line values
///
/// Both are swapped together under the write lock, so a reader never pairs
/// an index with the wrong file.
struct ReadState {
    index: Index,
    reader: Option<LogReader>,
    /// Log length and next LSN as of the last commit, so stats never wait
    /// on the writer
    log_size: u64,
    next_lsn: u64,
}

impl ReadState {
    fn track(&mut self, log: &LogStore) {
        self.log_size = log.log_len();
        self.next_lsn = log.next_lsn();
    }
}

/// The writer region, held from the append until observers have run
///
/// Remembers its owning thread so a mutation attempted from inside an
/// observer fails instead of waiting on itself.
struct WriterGuard<'a> {
    log: MutexGuard<'a, LogStore>,
    owner: &'a Mutex<Option<ThreadId>>,
}

impl Deref for WriterGuard<'_> {
    type Target = LogStore;

    fn deref(&self) -> &LogStore {
        &self.log
    }
}

impl DerefMut for WriterGuard<'_> {
    fn deref_mut(&mut self) -> &mut LogStore {
        &mut self.log
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}

/// Point-in-time figures about a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of live keys
    pub key_count: usize,
    /// Sum of key + value lengths over live keys
    pub data_size: u64,
    /// Size of the log on disk
    pub log_size: u64,
    /// LSN the next commit will receive
    pub next_lsn: u64,
}

/// Result of a compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    pub log_size_before: u64,
    pub log_size_after: u64,
    pub live_keys: usize,
}

/// A durable key-value store for one namespace
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (set/remove/clear/multi_set/multi_remove/compact):
///   serialized by the `log` mutex, held across
///   "append + fsync → index update → notify"
/// - **Reads** (get/get_all_keys/multi_get): take the `state` read lock
///   only, so they run concurrently with each other and observe a mutation
///   either entirely or not at all
///
/// Lock order is always `log` → `state`; readers never touch `log`.
///
/// Observers run inside the writer region. They may read the store; a
/// mutation (or `compact`/`flush`/`rebuild_index`) from inside an observer
/// fails with `StoreError::ReentrantWrite`.
pub struct Store {
    /// Store configuration
    config: Config,

    /// Durable log; its mutex is the writer region
    log: Mutex<LogStore>,

    /// Thread currently inside the writer region
    writer_thread: Mutex<Option<ThreadId>>,

    /// Index and log reader (many concurrent readers, exclusive commits)
    state: RwLock<ReadState>,

    /// Change notification registry
    bus: ChangeBus,

    /// What happened during recovery
    report: RecoveryReport,
}

impl Store {
    /// Open or create a store with the given config
    ///
    /// On startup:
    /// 1. Validate the config
    /// 2. Recover the log if it exists, applying the recovery policy
    /// 3. Rebuild the index from the recovered log
    ///
    /// No file is created until the first mutation.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let (log, snapshot, report) = LogStore::open(&config)?;

        let reader = if log.exists() && log.read_only_reason().is_none() {
            Some(LogReader::open(log.path())?)
        } else {
            None
        };

        let index = Index::from_snapshot(snapshot);
        let (log_size, next_lsn) = (log.log_len(), log.next_lsn());
        tracing::info!(
            "Opened store {:?}: {} keys, {} bytes",
            config.namespace,
            index.len(),
            index.data_size()
        );

        Ok(Self {
            config,
            log: Mutex::new(log),
            writer_thread: Mutex::new(None),
            state: RwLock::new(ReadState {
                index,
                reader,
                log_size,
                next_lsn,
            }),
            bus: ChangeBus::new(),
            report,
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value by key
    ///
    /// Returns `Ok(None)` if the key is absent; an empty value is `Some`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        check_key(key)?;
        let state = self.state.read();
        self.lookup(&state, key)
    }

    /// Get several values from one snapshot
    ///
    /// An empty key rejects the whole call with `PartialFailure`.
    pub fn multi_get<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Option<Bytes>>> {
        for key in keys {
            check_key(key.as_ref()).map_err(|e| e.at_key(key.as_ref()))?;
        }

        let state = self.state.read();
        keys.iter()
            .map(|key| self.lookup(&state, key.as_ref()))
            .collect()
    }

    /// All keys, in byte-lexicographic order, from one snapshot
    pub fn get_all_keys(&self) -> Vec<Bytes> {
        self.state
            .read()
            .index
            .keys()
            .into_iter()
            .map(Key::into_bytes)
            .collect()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.state.read().index.contains(key)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.state.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().index.is_empty()
    }

    fn lookup(&self, state: &ReadState, key: &[u8]) -> Result<Option<Bytes>> {
        match state.index.lookup(key) {
            None => Ok(None),
            Some(ValueSlot::Inline(value)) => Ok(Some(value.clone())),
            Some(ValueSlot::OnDisk { location, .. }) => self.fetch(state, *location, key),
        }
    }

    /// Read an out-of-line value, applying the read failure policy
    fn fetch(&self, state: &ReadState, location: RecordLocation, key: &[u8]) -> Result<Option<Bytes>> {
        let result = match &state.reader {
            Some(reader) => reader.read_value(location, key),
            None => Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "log reader is not open",
            ))),
        };

        match result {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::Io(e))
                if self.config.read_failure_policy == ReadFailurePolicy::TreatAsAbsent =>
            {
                tracing::warn!(
                    "Reading {:?} failed, reporting it absent: {}",
                    String::from_utf8_lossy(key),
                    e
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Set a key-value pair
    ///
    /// Steps:
    /// 1. Validate key, value size and quota
    /// 2. Append to the log (durable on return)
    /// 3. Update the index
    /// 4. Notify observers
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let key = Key::from_slice(key)?;
        check_value(&key, value, self.config.max_value_size, MAX_PAYLOAD_SIZE)?;

        let mut log = self.lock_writer()?;

        let old_value_present = {
            let state = self.state.read();
            let old_len = state.index.lookup(key.as_bytes()).map(|slot| slot_size(&key, slot));
            let new_len = (key.len() + value.len()) as u64;
            self.check_quota(state.index.data_size(), old_len.unwrap_or(0), new_len)?;
            old_len.is_some()
        };

        self.prepare(&mut log)?;
        let location = log.append(Operation::Put {
            key: key.as_bytes().to_vec(),
            value: value.to_vec(),
        })?;

        let slot = ValueSlot::for_value(value, location, self.config.inline_value_limit);
        {
            let mut state = self.state.write();
            state.index.upsert(key.clone(), slot);
            state.track(&log);
        }

        tracing::debug!("Committed set of {:?} at lsn {}", key, location.lsn);
        self.bus.publish(&[ChangeRecord {
            key: key.into_bytes(),
            old_value_present,
            new_value_present: true,
            lsn: location.lsn,
        }]);

        self.maybe_compact(&mut log);
        Ok(())
    }

    /// Remove a key
    ///
    /// Removing an absent key succeeds without writing anything.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        let key = Key::from_slice(key)?;
        let mut log = self.lock_writer()?;

        if !self.state.read().index.contains(key.as_bytes()) {
            return Ok(());
        }

        self.prepare(&mut log)?;
        let location = log.append(Operation::Delete {
            key: key.as_bytes().to_vec(),
        })?;

        {
            let mut state = self.state.write();
            state.index.remove(key.as_bytes());
            state.track(&log);
        }

        tracing::debug!("Committed remove of {:?} at lsn {}", key, location.lsn);
        self.bus.publish(&[ChangeRecord {
            key: key.into_bytes(),
            old_value_present: true,
            new_value_present: false,
            lsn: location.lsn,
        }]);

        self.maybe_compact(&mut log);
        Ok(())
    }

    /// Remove every key
    ///
    /// Emits one change record per removed key, in key order.
    pub fn clear(&self) -> Result<()> {
        let mut log = self.lock_writer()?;

        if self.state.read().index.is_empty() {
            return Ok(());
        }

        self.prepare(&mut log)?;
        let location = log.append(Operation::Clear)?;

        let removed = {
            let mut state = self.state.write();
            state.track(&log);
            state.index.clear()
        };

        tracing::debug!("Committed clear of {} keys at lsn {}", removed.len(), location.lsn);
        let records: Vec<_> = removed
            .into_iter()
            .map(|key| ChangeRecord {
                key: key.into_bytes(),
                old_value_present: true,
                new_value_present: false,
                lsn: location.lsn,
            })
            .collect();
        self.bus.publish(&records);

        self.maybe_compact(&mut log);
        Ok(())
    }

    /// Set several pairs atomically
    ///
    /// Every pair is checked before anything is written; the first invalid
    /// pair fails the call with `PartialFailure` naming its key. A valid
    /// batch is committed as a single log record. If a key repeats, the
    /// last pair wins.
    pub fn multi_set<K, V>(&self, pairs: &[(K, V)]) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let validated = check_batch(pairs, self.config.max_value_size, MAX_PAYLOAD_SIZE)?;
        if validated.is_empty() {
            return Ok(());
        }

        let mut log = self.lock_writer()?;

        let old_present = {
            let state = self.state.read();
            let mut staged: HashMap<&Key, u64> = HashMap::new();
            let mut total = state.index.data_size();
            let mut old_present = Vec::with_capacity(validated.len());

            for (key, value) in &validated {
                let previous = match staged.get(key) {
                    Some(size) => Some(*size),
                    None => state.index.lookup(key.as_bytes()).map(|slot| slot_size(key, slot)),
                };
                let new_len = (key.len() + value.len()) as u64;

                self.check_quota(total, previous.unwrap_or(0), new_len)
                    .map_err(|e| e.at_key(key.as_bytes()))?;
                total = total - previous.unwrap_or(0) + new_len;

                old_present.push(previous.is_some());
                staged.insert(key, new_len);
            }
            old_present
        };

        self.prepare(&mut log)?;
        let mutations = validated
            .iter()
            .map(|(key, value)| Mutation::Put {
                key: key.as_bytes().to_vec(),
                value: value.to_vec(),
            })
            .collect();
        let location = log.append(Operation::Batch(mutations))?;

        {
            let mut state = self.state.write();
            for (key, value) in &validated {
                let slot = ValueSlot::for_value(value, location, self.config.inline_value_limit);
                state.index.upsert(key.clone(), slot);
            }
            state.track(&log);
        }

        tracing::debug!("Committed batch of {} sets at lsn {}", validated.len(), location.lsn);
        let records: Vec<_> = validated
            .into_iter()
            .zip(old_present)
            .map(|((key, _), old_value_present)| ChangeRecord {
                key: key.into_bytes(),
                old_value_present,
                new_value_present: true,
                lsn: location.lsn,
            })
            .collect();
        self.bus.publish(&records);

        self.maybe_compact(&mut log);
        Ok(())
    }

    /// Remove several keys atomically
    ///
    /// Absent and repeated keys are skipped; if none are present nothing is
    /// written.
    pub fn multi_remove<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<()> {
        let mut validated = Vec::with_capacity(keys.len());
        for key in keys {
            let raw = key.as_ref();
            validated.push(Key::from_slice(raw).map_err(|e| e.at_key(raw))?);
        }

        let mut log = self.lock_writer()?;

        let present: Vec<Key> = {
            let state = self.state.read();
            let mut seen = std::collections::HashSet::new();
            validated
                .into_iter()
                .filter(|key| state.index.contains(key.as_bytes()) && seen.insert(key.clone()))
                .collect()
        };
        if present.is_empty() {
            return Ok(());
        }

        self.prepare(&mut log)?;
        let mutations = present
            .iter()
            .map(|key| Mutation::Delete {
                key: key.as_bytes().to_vec(),
            })
            .collect();
        let location = log.append(Operation::Batch(mutations))?;

        {
            let mut state = self.state.write();
            for key in &present {
                state.index.remove(key.as_bytes());
            }
            state.track(&log);
        }

        tracing::debug!("Committed batch of {} removes at lsn {}", present.len(), location.lsn);
        let records: Vec<_> = present
            .into_iter()
            .map(|key| ChangeRecord {
                key: key.into_bytes(),
                old_value_present: true,
                new_value_present: false,
                lsn: location.lsn,
            })
            .collect();
        self.bus.publish(&records);

        self.maybe_compact(&mut log);
        Ok(())
    }

    /// Enter the writer region
    ///
    /// Fails instead of deadlocking when the calling thread is already inside
    /// it, which happens when an observer tries to mutate the store.
    fn lock_writer(&self) -> Result<WriterGuard<'_>> {
        let current = thread::current().id();
        if *self.writer_thread.lock() == Some(current) {
            return Err(StoreError::ReentrantWrite);
        }

        let log = self.log.lock();
        *self.writer_thread.lock() = Some(current);
        Ok(WriterGuard {
            log,
            owner: &self.writer_thread,
        })
    }

    /// Create the log if needed and make sure a reader is open on it
    ///
    /// Runs before the append, so nothing can fail between a durable commit
    /// and its index update.
    fn prepare(&self, log: &mut LogStore) -> Result<()> {
        log.ensure_open()?;

        if self.state.read().reader.is_none() {
            let reader = LogReader::open(log.path())?;
            self.state.write().reader = Some(reader);
        }
        Ok(())
    }

    /// Reject a change that grows the store past its quota
    ///
    /// Shrinking changes are always allowed, even over quota.
    fn check_quota(&self, current: u64, old_len: u64, new_len: u64) -> Result<()> {
        let Some(limit) = self.config.max_total_size else {
            return Ok(());
        };

        let required = current - old_len + new_len;
        if required > limit && new_len > old_len {
            return Err(StoreError::QuotaExceeded { required, limit });
        }
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Rewrite the log with only live entries
    pub fn compact(&self) -> Result<CompactionStats> {
        let mut log = self.lock_writer()?;
        self.compact_locked(&mut log)
    }

    fn compact_locked(&self, log: &mut LogStore) -> Result<CompactionStats> {
        let log_size_before = log.log_len();
        if !log.exists() {
            return Ok(CompactionStats {
                log_size_before,
                log_size_after: log_size_before,
                live_keys: 0,
            });
        }
        if let Some(reason) = log.read_only_reason() {
            return Err(StoreError::ReadOnly(reason.to_string()));
        }

        // Readers keep going while the new file is written
        let mut compacted = {
            let state = self.state.read();
            log.write_compacted(&state.index, state.reader.as_ref())?
        };
        let snapshot = std::mem::take(&mut compacted.snapshot);
        let log_size_after = compacted.len;

        let mut state = self.state.write();
        // Close the old handle before the rename replaces its file
        state.reader = None;

        let installed = log.install_compacted(compacted);
        if installed.is_ok() {
            state.index.rebuild(snapshot);
        }
        state.track(log);

        state.reader = match LogReader::open(log.path()) {
            Ok(reader) => Some(reader),
            Err(e) => {
                tracing::warn!("Failed to reopen {} for reads: {}", log.path().display(), e);
                None
            }
        };
        installed?;

        let live_keys = state.index.len();
        tracing::info!(
            "Compacted {}: {} -> {} bytes, {} live keys",
            log.path().display(),
            log_size_before,
            log_size_after,
            live_keys
        );

        Ok(CompactionStats {
            log_size_before,
            log_size_after,
            live_keys,
        })
    }

    /// Compact if the configured trigger fires
    ///
    /// Called after a commit has succeeded; a failure here does not undo
    /// the commit, so it is logged rather than returned.
    fn maybe_compact(&self, log: &mut LogStore) {
        let Some(trigger) = self.config.compaction else {
            return;
        };

        let log_size = log.log_len();
        if log_size < trigger.min_log_size || log_size == 0 {
            return;
        }

        let live = self.state.read().index.compacted_log_size();
        let garbage = log_size.saturating_sub(live);
        if (garbage as f64 / log_size as f64) < trigger.garbage_ratio {
            return;
        }

        if let Err(e) = self.compact_locked(log) {
            tracing::warn!("Automatic compaction failed: {}", e);
        }
    }

    /// Re-read the log and replace the index with what it holds
    pub fn rebuild_index(&self) -> Result<()> {
        let log = self.lock_writer()?;
        let snapshot = log.read_all()?;

        let mut state = self.state.write();
        state.index.rebuild(snapshot);
        tracing::info!("Rebuilt index: {} keys", state.index.len());
        Ok(())
    }

    /// Force pending appends to disk
    ///
    /// Only needed with `WalSyncStrategy::EveryNEntries`.
    pub fn flush(&self) -> Result<()> {
        self.lock_writer()?.sync()
    }

    /// Close the store, syncing the log
    pub fn close(self) -> Result<()> {
        self.flush()?;
        tracing::info!("Closed store {:?}", self.config.namespace);
        Ok(())
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Register an observer for committed changes
    pub fn subscribe(&self, observer: impl Observer + 'static) -> SubscriptionId {
        self.bus.subscribe(observer)
    }

    /// Register a channel that receives every committed change
    pub fn subscribe_channel(&self) -> (SubscriptionId, Receiver<ChangeRecord>) {
        self.bus.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn stats(&self) -> StoreStats {
        let state = self.state.read();
        StoreStats {
            key_count: state.index.len(),
            data_size: state.index.data_size(),
            log_size: state.log_size,
            next_lsn: state.next_lsn,
        }
    }

    /// What recovery did when this store was opened
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.report
    }

    /// True when recovery failed and mutations are refused
    pub fn is_read_only(&self) -> bool {
        matches!(self.report.action, RecoveryAction::ReadOnly(_))
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.log.get_mut().sync() {
            tracing::warn!("Failed to sync {:?} on drop: {}", self.config.namespace, e);
        }
    }
}

/// Reject a value over the configured limit or too big for one record
fn check_value(key: &Key, value: &[u8], max_value_size: Option<usize>, record_limit: usize) -> Result<()> {
    let room = record_limit.saturating_sub(key.len() + MUTATION_OVERHEAD);
    let limit = max_value_size.map_or(room, |configured| configured.min(room));

    if value.len() > limit {
        return Err(StoreError::ValueTooLarge {
            key: key.as_bytes().to_vec(),
            size: value.len(),
            limit,
        });
    }
    Ok(())
}

/// Validate every pair of a batch
///
/// The batch becomes one record, so its pairs share `record_limit`; the
/// first pair that does not fit is rejected.
fn check_batch<'a, K, V>(
    pairs: &'a [(K, V)],
    max_value_size: Option<usize>,
    record_limit: usize,
) -> Result<Vec<(Key, &'a [u8])>>
where
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut validated = Vec::with_capacity(pairs.len());
    let mut record_size = 0usize;

    for (key, value) in pairs {
        let (raw_key, value) = (key.as_ref(), value.as_ref());
        let key = Key::from_slice(raw_key).map_err(|e| e.at_key(raw_key))?;

        let remaining = record_limit.saturating_sub(record_size);
        check_value(&key, value, max_value_size, remaining).map_err(|e| e.at_key(raw_key))?;
        record_size += key.len() + value.len() + MUTATION_OVERHEAD;

        validated.push((key, value));
    }
    Ok(validated)
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("key must not be empty".to_string()));
    }
    Ok(())
}

/// Bytes an entry contributes to the quota
fn slot_size(key: &Key, slot: &ValueSlot) -> u64 {
    (key.len() + slot.value_len()) as u64
}
