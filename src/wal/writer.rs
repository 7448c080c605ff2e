//! WAL Writer
//!
//! Handles appending entries to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::Result;

use super::{Operation, RecordLocation, WalEntry, WalReader};

/// Writes entries to the WAL file
pub struct WalWriter {
    file: File,
    path: PathBuf,
    /// LSN the next append will receive
    next_lsn: u64,
    /// End of the last fully written frame
    position: u64,
    sync_strategy: WalSyncStrategy,
    /// Appends since the last fsync
    uncommitted: usize,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
    /// Fail the next append after writing this many bytes of its frame
    #[cfg(test)]
    fail_after: Option<usize>,
}

impl WalWriter {
    /// Open or create a WAL file, continuing after its last valid LSN
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let mut last_lsn = 0;
        let mut valid_len = None;

        if path.exists() {
            let mut reader = WalReader::open(path)?;
            while let Some((location, _)) = reader.next_entry()? {
                last_lsn = location.lsn;
            }
            if reader.hit_torn_tail() {
                valid_len = Some(reader.valid_len());
            }
        }

        let writer = Self::open_with_lsn(path, sync_strategy, last_lsn + 1)?;
        match valid_len {
            // Drop the half-written frame so new records stay reachable
            Some(len) => writer.truncate_to(len),
            None => Ok(writer),
        }
    }

    /// Open or create a WAL file whose next LSN is already known
    /// (the caller has just scanned it)
    pub fn open_with_lsn(path: &Path, sync_strategy: WalSyncStrategy, next_lsn: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        let position = file.metadata()?.len();

        Ok(Self {
            file,
            path: path.to_path_buf(),
            next_lsn: next_lsn.max(1),
            position,
            sync_strategy,
            uncommitted: 0,
            poisoned: false,
            #[cfg(test)]
            fail_after: None,
        })
    }

    /// Append an entry to the WAL
    ///
    /// The frame is written with a single `write_all`. If the write or the
    /// sync fails, the file is cut back to its previous length so the log
    /// never holds a record the caller was told failed.
    pub fn append(&mut self, operation: Operation) -> Result<RecordLocation> {
        if self.poisoned {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("log {} needs reopening after a failed rollback", self.path.display()),
            )
            .into());
        }

        let lsn = self.next_lsn;
        let frame = WalEntry::new(lsn, operation).serialize()?;
        let offset = self.position;

        if let Err(e) = self.write_frame(&frame) {
            self.rollback(offset);
            return Err(e);
        }

        self.next_lsn += 1;
        self.position = offset + frame.len() as u64;

        Ok(RecordLocation {
            lsn,
            offset,
            len: frame.len() as u64,
        })
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        #[cfg(test)]
        if let Some(written) = self.fail_after.take() {
            self.file.write_all(&frame[..written.min(frame.len())])?;
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure").into());
        }

        self.file.write_all(frame)?;
        self.file.flush()?;
        self.uncommitted += 1;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.uncommitted >= count,
        };
        if due {
            self.sync()?;
        }
        Ok(())
    }

    fn rollback(&mut self, len: u64) {
        let restored = self.file.set_len(len).and_then(|_| self.file.sync_all());
        if let Err(e) = restored {
            tracing::error!(
                "Failed to roll back {} to {} bytes: {}",
                self.path.display(),
                len,
                e
            );
            self.poisoned = true;
        }
    }

    /// Cut the log back to `len` bytes
    fn truncate_to(mut self, len: u64) -> Result<Self> {
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.position = len;
        Ok(self)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.uncommitted = 0;
        Ok(())
    }

    /// Get the LSN the next append will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Number of appends not yet fsynced
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted
    }

    /// Current length of the log in bytes
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
