//! Positional reads of out-of-line values
//!
//! Readers share one file handle and never move a cursor, so many threads
//! can fetch values at once.

use std::fs::File;
use std::path::Path;

use bytes::Bytes;

use crate::error::{Result, StoreError};
use crate::wal::{RecordLocation, WalEntry};

/// Read-only handle on the log
#[derive(Debug)]
pub struct LogReader {
    file: File,
}

impl LogReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// Read and verify the record at `location`
    pub fn read_entry(&self, location: RecordLocation) -> Result<WalEntry> {
        let mut frame = vec![0u8; location.len as usize];
        read_exact_at(&self.file, &mut frame, location.offset)?;

        let entry = WalEntry::deserialize(&frame)?;
        if entry.lsn != location.lsn {
            return Err(StoreError::CorruptionDetected(format!(
                "expected lsn {} at offset {}, found {}",
                location.lsn, location.offset, entry.lsn
            )));
        }
        Ok(entry)
    }

    /// Fetch the value the record at `location` wrote for `key`
    pub fn read_value(&self, location: RecordLocation, key: &[u8]) -> Result<Bytes> {
        let entry = self.read_entry(location)?;
        match entry.operation.value_for(key) {
            Some(value) => Ok(Bytes::copy_from_slice(value)),
            None => Err(StoreError::CorruptionDetected(format!(
                "record {} does not hold a value for key {:?}",
                location.lsn,
                String::from_utf8_lossy(key)
            ))),
        }
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::io::{Error, ErrorKind};
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(Error::new(
                    ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
