//! Configuration for localkv
//!
//! Centralized configuration with sensible defaults.

use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// Name of the log file inside a namespace directory
pub const LOG_FILENAME: &str = "data.log";

/// Main configuration for a store instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory shared by all namespaces.
    /// Internal structure:
    ///   {data_dir}/
    ///     └── {namespace}/
    ///           ├── data.log           (append-only record log)
    ///           ├── data.log.compact   (transient, during compaction)
    ///           └── data.log.corrupt   (backup written by recovery)
    pub data_dir: PathBuf,

    /// Logical store name; each namespace has its own log and index
    pub namespace: String,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the log
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // Limits
    // -------------------------------------------------------------------------
    /// Largest accepted value (bytes); `None` means unlimited
    pub max_value_size: Option<usize>,

    /// Largest total of key + value bytes across live entries
    pub max_total_size: Option<u64>,

    /// Values up to this size are cached in the index, larger ones are
    /// read back from the log on demand
    pub inline_value_limit: usize,

    // -------------------------------------------------------------------------
    // Failure Handling
    // -------------------------------------------------------------------------
    /// What to do when the log is damaged beyond a torn tail
    pub recovery_policy: RecoveryPolicy,

    /// What `get` does when reading an out-of-line value fails
    pub read_failure_policy: ReadFailurePolicy,

    // -------------------------------------------------------------------------
    // Compaction
    // -------------------------------------------------------------------------
    /// Automatic compaction trigger; `None` disables auto compaction
    pub compaction: Option<CompactionTrigger>,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every commit (a returned `Ok` is durable)
    EveryWrite,

    /// fsync after N unsynced commits; commits in between survive a process
    /// crash but not a power loss
    EveryNEntries { count: usize },
}

/// Policy applied when recovery finds corruption before the end of the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Refuse to open; the caller decides what to do with the file
    FailFast,

    /// Back up the log, then keep every record before the damage
    KeepValidPrefix,

    /// Back up the log, then start with an empty store
    StartEmpty,
}

/// Policy for I/O errors while fetching an out-of-line value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFailurePolicy {
    /// Return the error to the caller
    Propagate,

    /// Log the error and report the key as absent
    TreatAsAbsent,
}

/// When to compact the log automatically after a commit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionTrigger {
    /// Never compact a log smaller than this (bytes)
    pub min_log_size: u64,

    /// Compact once this fraction of the log is superseded data (0.0..1.0)
    pub garbage_ratio: f64,
}

impl Default for CompactionTrigger {
    fn default() -> Self {
        Self {
            min_log_size: 1024 * 1024, // 1 MB
            garbage_ratio: 0.5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./localkv_data"),
            namespace: "default".to_string(),
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            max_value_size: None,
            max_total_size: None,
            inline_value_limit: 4 * 1024, // 4 KB
            recovery_policy: RecoveryPolicy::KeepValidPrefix,
            read_failure_policy: ReadFailurePolicy::Propagate,
            compaction: Some(CompactionTrigger::default()),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Directory holding this namespace's files
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join(&self.namespace)
    }

    /// Path of this namespace's log
    pub fn log_path(&self) -> PathBuf {
        self.store_dir().join(LOG_FILENAME)
    }

    /// Check the configuration before opening a store
    pub fn validate(&self) -> Result<()> {
        validate_namespace(&self.namespace)?;

        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(StoreError::Config(
                "EveryNEntries sync count must be at least 1".to_string(),
            ));
        }

        if let Some(trigger) = &self.compaction {
            if !(trigger.garbage_ratio > 0.0 && trigger.garbage_ratio < 1.0) {
                return Err(StoreError::Config(format!(
                    "compaction garbage ratio must be in (0, 1), got {}",
                    trigger.garbage_ratio
                )));
            }
        }

        Ok(())
    }
}

/// Namespaces become directory names, so they are restricted to a safe set.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() || namespace == "." || namespace == ".." {
        return Err(StoreError::Config(format!(
            "invalid namespace {:?}",
            namespace
        )));
    }

    let ok = namespace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !ok {
        return Err(StoreError::Config(format!(
            "namespace {:?} may only contain [A-Za-z0-9._-]",
            namespace
        )));
    }

    Ok(())
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all namespaces)
    pub fn data_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    /// Set the namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the per-value size limit (in bytes)
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.config.max_value_size = Some(size);
        self
    }

    /// Set the total size quota (in bytes)
    pub fn max_total_size(mut self, size: u64) -> Self {
        self.config.max_total_size = Some(size);
        self
    }

    /// Set the largest value kept inline in the index (in bytes)
    pub fn inline_value_limit(mut self, size: usize) -> Self {
        self.config.inline_value_limit = size;
        self
    }

    /// Set the corruption recovery policy
    pub fn recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.config.recovery_policy = policy;
        self
    }

    /// Set the read failure policy
    pub fn read_failure_policy(mut self, policy: ReadFailurePolicy) -> Self {
        self.config.read_failure_policy = policy;
        self
    }

    /// Set (or disable with `None`) automatic compaction
    pub fn compaction(mut self, trigger: Option<CompactionTrigger>) -> Self {
        self.config.compaction = trigger;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
