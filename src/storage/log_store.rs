//! Log Store
//!
//! Owns the namespace directory and the log file inside it.
//!
//! ## Responsibilities
//! - Lazy creation of the directory and log on the first mutation
//! - Recovery on open, applying the configured [`RecoveryPolicy`]
//! - Folding the log into a [`Snapshot`] for the index
//! - Compaction: rewrite live entries to a temp file, fsync, rename over
//!   the log, fsync the directory

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::config::{Config, RecoveryPolicy, WalSyncStrategy};
use crate::error::{Result, StoreError};
use crate::index::{Index, Key, Snapshot, ValueSlot};
use crate::wal::{Mutation, Operation, RecordLocation, RecoveryResult, WalEntry, WalRecovery, WalWriter};

use super::LogReader;

/// Suffix of the temp file written during compaction
const COMPACT_SUFFIX: &str = "compact";

/// Suffix of the backup written when recovery discards damaged data
const CORRUPT_SUFFIX: &str = "corrupt";

/// What recovery did with the log on open
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RecoveryAction {
    /// Log was readable (a torn tail may have been cut, see `was_truncated`)
    #[default]
    Clean,

    /// Damage found; the log was truncated to its readable prefix
    KeptValidPrefix,

    /// Damage found; the log was moved aside and the store starts empty
    StartedEmpty,

    /// Damage found and the recovery step itself failed
    ReadOnly(String),
}

/// Outcome of recovery, kept for callers that want to inspect it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub result: RecoveryResult,
    pub action: RecoveryAction,
    /// Copy of the damaged log, if one was written
    pub backup_path: Option<PathBuf>,
}

/// A compacted log written to its temp path but not yet installed
#[derive(Debug)]
pub struct CompactedLog {
    temp_path: PathBuf,
    /// Index contents pointing into the new file
    pub snapshot: Snapshot,
    next_lsn: u64,
    /// Length of the new log
    pub len: u64,
}

/// The durable side of a store
pub struct LogStore {
    dir: PathBuf,
    path: PathBuf,
    sync_strategy: WalSyncStrategy,
    inline_value_limit: usize,
    /// `None` until the first mutation, or after a compaction whose
    /// reopen failed
    writer: Option<WalWriter>,
    next_lsn: u64,
    /// Set when recovery could not repair the log
    read_only: Option<String>,
}

impl LogStore {
    /// Open the store's log, recovering it if needed
    ///
    /// Nothing is created on disk here; see [`LogStore::ensure_open`].
    pub fn open(config: &Config) -> Result<(Self, Snapshot, RecoveryReport)> {
        let dir = config.store_dir();
        let path = config.log_path();

        let mut store = Self {
            dir,
            path,
            sync_strategy: config.wal_sync_strategy,
            inline_value_limit: config.inline_value_limit,
            writer: None,
            next_lsn: 1,
            read_only: None,
        };

        store.remove_stale_compaction()?;

        if !store.path.exists() {
            tracing::debug!("No log at {}, starting empty", store.path.display());
            return Ok((store, Snapshot::new(), RecoveryReport::default()));
        }

        let (records, result) = WalRecovery::recover(&store.path)?;
        let mut report = RecoveryReport {
            result,
            ..RecoveryReport::default()
        };

        let records = match report.result.corruption.clone() {
            None => records,
            Some(detail) => {
                tracing::warn!(
                    "Corruption in {} after {} valid entries: {}",
                    store.path.display(),
                    report.result.entries_recovered,
                    detail
                );
                store.apply_recovery_policy(config.recovery_policy, detail, records, &mut report)?
            }
        };

        store.next_lsn = records.last().map(|(loc, _)| loc.lsn + 1).unwrap_or(1);
        let snapshot = fold(records, store.inline_value_limit);

        tracing::info!(
            "Recovered {}: {} records, {} live keys, last_lsn={}",
            store.path.display(),
            report.result.entries_recovered,
            snapshot.len(),
            report.result.last_lsn
        );

        Ok((store, snapshot, report))
    }

    fn apply_recovery_policy(
        &mut self,
        policy: RecoveryPolicy,
        detail: String,
        records: Vec<(RecordLocation, WalEntry)>,
        report: &mut RecoveryReport,
    ) -> Result<Vec<(RecordLocation, WalEntry)>> {
        let backup = self.path.with_extension(format!("log.{}", CORRUPT_SUFFIX));

        let outcome = match policy {
            RecoveryPolicy::FailFast => {
                return Err(StoreError::CorruptionDetected(format!(
                    "{}: {}",
                    self.path.display(),
                    detail
                )))
            }
            RecoveryPolicy::KeepValidPrefix => self
                .backup_and_truncate(&backup, report.result.valid_len)
                .map(|_| (RecoveryAction::KeptValidPrefix, records)),
            RecoveryPolicy::StartEmpty => fs::rename(&self.path, &backup)
                .map_err(StoreError::from)
                .and_then(|_| sync_dir(&self.dir))
                .map(|_| (RecoveryAction::StartedEmpty, Vec::new())),
        };

        match outcome {
            Ok((action, records)) => {
                tracing::warn!(
                    "Recovery of {} finished with {:?}; damaged log saved to {}",
                    self.path.display(),
                    action,
                    backup.display()
                );
                report.action = action;
                report.backup_path = Some(backup);
                Ok(records)
            }
            Err(e) => {
                let reason = format!("recovery failed ({}) after corruption: {}", e, detail);
                tracing::error!("{}: store is read-only", reason);
                self.read_only = Some(reason.clone());
                report.action = RecoveryAction::ReadOnly(reason);
                Ok(Vec::new())
            }
        }
    }

    fn backup_and_truncate(&self, backup: &Path, valid_len: u64) -> Result<()> {
        fs::copy(&self.path, backup)?;
        File::open(backup)?.sync_all()?;

        let file = fs::OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(valid_len)?;
        file.sync_all()?;
        Ok(())
    }

    fn remove_stale_compaction(&self) -> Result<()> {
        let temp = self.compact_path();
        if temp.exists() {
            tracing::info!("Removing interrupted compaction output {}", temp.display());
            fs::remove_file(&temp)?;
        }
        Ok(())
    }

    /// Re-read the log and fold it, failing on any damage
    pub fn read_all(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            return Ok(Snapshot::new());
        }

        let (records, result) = WalRecovery::recover(&self.path)?;
        if let Some(detail) = result.corruption {
            return Err(StoreError::CorruptionDetected(format!(
                "{}: {}",
                self.path.display(),
                detail
            )));
        }

        Ok(fold(records, self.inline_value_limit))
    }

    /// Create the directory and log if this is the first mutation
    pub fn ensure_open(&mut self) -> Result<()> {
        if let Some(reason) = &self.read_only {
            return Err(StoreError::ReadOnly(reason.clone()));
        }
        if self.writer.is_some() {
            return Ok(());
        }

        let created_dir = !self.dir.exists();
        let created_file = !self.path.exists();
        fs::create_dir_all(&self.dir)?;

        self.writer = Some(WalWriter::open_with_lsn(
            &self.path,
            self.sync_strategy,
            self.next_lsn,
        )?);

        if created_file {
            sync_dir(&self.dir)?;
        }
        if created_dir {
            if let Some(parent) = self.dir.parent() {
                sync_dir(parent)?;
            }
        }
        if created_file {
            tracing::info!("Created log {}", self.path.display());
        }
        Ok(())
    }

    /// Append one record; durable on return under `EveryWrite`
    pub fn append(&mut self, operation: Operation) -> Result<RecordLocation> {
        self.ensure_open()?;
        let writer = self.writer.as_mut().ok_or_else(|| {
            StoreError::ReadOnly(format!("log {} is not open", self.path.display()))
        })?;

        let location = writer.append(operation)?;
        self.next_lsn = writer.current_lsn();
        Ok(location)
    }

    /// Force pending appends to disk
    pub fn sync(&mut self) -> Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.sync(),
            None => Ok(()),
        }
    }

    /// Write every live entry of `index` to the compaction temp file
    ///
    /// Out-of-line values are fetched through `reader`.
    pub fn write_compacted(&self, index: &Index, reader: Option<&LogReader>) -> Result<CompactedLog> {
        let temp_path = self.compact_path();
        let result = self.write_compacted_to(&temp_path, index, reader);
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn write_compacted_to(
        &self,
        temp_path: &Path,
        index: &Index,
        reader: Option<&LogReader>,
    ) -> Result<CompactedLog> {
        let mut out = BufWriter::new(File::create(temp_path)?);
        let mut snapshot = Snapshot::new();
        let mut lsn = self.next_lsn;
        let mut offset = 0u64;

        for (key, slot) in index.iter() {
            let value: Bytes = match slot {
                ValueSlot::Inline(bytes) => bytes.clone(),
                ValueSlot::OnDisk { location, .. } => {
                    let reader = reader.ok_or_else(|| {
                        StoreError::CorruptionDetected(format!(
                            "no log reader for out-of-line key {:?}",
                            key
                        ))
                    })?;
                    reader.read_value(*location, key.as_bytes())?
                }
            };

            let frame = WalEntry::new(
                lsn,
                Operation::Put {
                    key: key.as_bytes().to_vec(),
                    value: value.to_vec(),
                },
            )
            .serialize()?;
            out.write_all(&frame)?;

            let location = RecordLocation {
                lsn,
                offset,
                len: frame.len() as u64,
            };
            snapshot.insert(
                key.clone(),
                ValueSlot::for_value(&value, location, self.inline_value_limit),
            );

            offset += frame.len() as u64;
            lsn += 1;
        }

        // An empty log would restart LSNs at 1 on reopen; a lone Clear keeps
        // the sequence going
        if index.is_empty() {
            let frame = WalEntry::new(lsn, Operation::Clear).serialize()?;
            out.write_all(&frame)?;
            offset += frame.len() as u64;
            lsn += 1;
        }

        let file = out.into_inner().map_err(|e| StoreError::Io(e.into_error()))?;
        file.sync_all()?;

        Ok(CompactedLog {
            temp_path: temp_path.to_path_buf(),
            snapshot,
            next_lsn: lsn,
            len: offset,
        })
    }

    /// Atomically replace the log with a compacted one
    ///
    /// Returns an error only if the rename failed, in which case the old log
    /// is untouched. Once the rename happened the compacted log is the
    /// store: a failed directory sync or writer reopen is logged, and the
    /// next append reopens the writer lazily.
    pub fn install_compacted(&mut self, compacted: CompactedLog) -> Result<()> {
        self.writer = None;

        if let Err(e) = fs::rename(&compacted.temp_path, &self.path) {
            let _ = fs::remove_file(&compacted.temp_path);
            return Err(e.into());
        }
        self.next_lsn = compacted.next_lsn;

        if let Err(e) = sync_dir(&self.dir) {
            tracing::warn!("Failed to sync {} after compaction: {}", self.dir.display(), e);
        }

        match WalWriter::open_with_lsn(&self.path, self.sync_strategy, self.next_lsn) {
            Ok(writer) => self.writer = Some(writer),
            Err(e) => tracing::warn!(
                "Failed to reopen {} after compaction: {}",
                self.path.display(),
                e
            ),
        }
        Ok(())
    }

    /// Current log length in bytes
    pub fn log_len(&self) -> u64 {
        match &self.writer {
            Some(writer) => writer.position(),
            None => fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
        }
    }

    /// LSN the next record will receive
    pub fn next_lsn(&self) -> u64 {
        self.next_lsn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.writer.is_some() || self.path.exists()
    }

    pub fn read_only_reason(&self) -> Option<&str> {
        self.read_only.as_deref()
    }

    fn compact_path(&self) -> PathBuf {
        self.path.with_extension(format!("log.{}", COMPACT_SUFFIX))
    }
}

/// Replay records into the key → slot map they describe
fn fold(records: Vec<(RecordLocation, WalEntry)>, inline_limit: usize) -> Snapshot {
    let mut snapshot = Snapshot::new();

    for (location, entry) in records {
        match entry.operation {
            Operation::Put { key, value } => put(&mut snapshot, key, &value, location, inline_limit),
            Operation::Delete { key } => {
                snapshot.remove(key.as_slice());
            }
            Operation::Clear => snapshot.clear(),
            Operation::Batch(mutations) => {
                for mutation in mutations {
                    match mutation {
                        Mutation::Put { key, value } => {
                            put(&mut snapshot, key, &value, location, inline_limit)
                        }
                        Mutation::Delete { key } => {
                            snapshot.remove(key.as_slice());
                        }
                    }
                }
            }
        }
    }

    snapshot
}

fn put(snapshot: &mut Snapshot, key: Vec<u8>, value: &[u8], location: RecordLocation, inline_limit: usize) {
    match Key::new(key) {
        Ok(key) => {
            snapshot.insert(key, ValueSlot::for_value(value, location, inline_limit));
        }
        Err(_) => tracing::warn!("Skipping record {} with an empty key", location.lsn),
    }
}

/// fsync a directory so a create or rename inside it is durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
