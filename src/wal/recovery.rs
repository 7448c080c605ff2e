//! WAL Recovery
//!
//! Scans a log after a restart, separating an interrupted final append
//! (which is silently discarded) from real damage (which is reported).

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::{Result, StoreError};

use super::{RecordLocation, WalEntry, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether a partially written tail was cut off
    pub was_truncated: bool,

    /// Length of the readable prefix
    pub valid_len: u64,

    /// Bytes after the readable prefix (torn tail or damaged region)
    pub bytes_discarded: u64,

    /// Description of the damage, if the log is corrupt before its end
    pub corruption: Option<String>,
}

impl RecoveryResult {
    pub fn is_corrupt(&self) -> bool {
        self.corruption.is_some()
    }
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read all valid entries
    /// 2. Truncate a partial write at the end
    /// 3. Stop at the first damaged frame, leaving the file untouched and
    ///    recording the damage in `corruption`
    /// 4. Return all entries before that point, in order
    pub fn recover(path: &Path) -> Result<(Vec<(RecordLocation, WalEntry)>, RecoveryResult)> {
        let (entries, result) = Self::scan(path)?;

        if result.was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(result.valid_len)?;
            file.sync_all()?;
            tracing::warn!(
                "Discarded {} bytes of interrupted write at the end of {}",
                result.bytes_discarded,
                path.display()
            );
        }

        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::scan(path).map(|(_, result)| result)
    }

    fn scan(path: &Path) -> Result<(Vec<(RecordLocation, WalEntry)>, RecoveryResult)> {
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.next_entry() {
                Ok(Some((location, entry))) => {
                    result.entries_recovered += 1;
                    result.last_lsn = location.lsn;
                    entries.push((location, entry));
                }
                Ok(None) => break,
                Err(StoreError::CorruptionDetected(detail)) | Err(StoreError::Serialization(detail)) => {
                    result.corruption = Some(detail);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        result.valid_len = reader.valid_len();
        result.bytes_discarded = reader.file_len() - reader.valid_len();
        result.was_truncated = reader.hit_torn_tail() && result.bytes_discarded > 0;

        Ok((entries, result))
    }
}
