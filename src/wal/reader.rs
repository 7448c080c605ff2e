//! WAL Reader
//!
//! Handles reading entries from the WAL file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Result, StoreError};

use super::entry::{FrameHeader, HEADER_SIZE, MAX_BODY_SIZE};
use super::{RecordLocation, WalEntry};

/// Reads entries from the WAL file
///
/// A frame that stops short of its checksummed length, or whose body fails
/// its CRC as the very last frame, is an interrupted append: the reader
/// stops there and reports it through [`hit_torn_tail`]. Any other damage,
/// including a header that fails its own CRC, is corruption and is returned
/// as an error.
///
/// [`hit_torn_tail`]: WalReader::hit_torn_tail
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset of the next frame to read
    position: u64,
    file_len: u64,
    torn_tail: bool,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_len,
            torn_tail: false,
        })
    }

    /// Read the next entry from the WAL
    ///
    /// Returns `Ok(None)` at the end of the log or at a torn tail.
    pub fn next_entry(&mut self) -> Result<Option<(RecordLocation, WalEntry)>> {
        let remaining = self.file_len - self.position;
        if remaining == 0 || self.torn_tail {
            return Ok(None);
        }

        if remaining < HEADER_SIZE as u64 {
            return self.torn();
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header_bytes)?;
        let header = match FrameHeader::decode(&header_bytes) {
            Ok(header) => header,
            Err(e) => {
                // Preallocated or zero-filled space after a crash looks like this
                if header_bytes.iter().all(|&b| b == 0) && self.rest_is_zeroed()? {
                    return self.torn();
                }
                return Err(self.corrupt(e.to_string()));
            }
        };

        if header.body_len == 0 || header.body_len > MAX_BODY_SIZE {
            return Err(self.corrupt(format!("implausible body length {}", header.body_len)));
        }

        // The header checksum vouches for the length, so a frame running
        // past the end can only be an interrupted append
        if self.position + header.frame_len() > self.file_len {
            return self.torn();
        }

        let mut body = vec![0u8; header.body_len as usize];
        self.reader.read_exact(&mut body)?;

        let is_last = self.position + header.frame_len() == self.file_len;
        let entry = match WalEntry::decode_body(&header, &body) {
            Ok(entry) => entry,
            Err(StoreError::CorruptionDetected(_)) if is_last => return self.torn(),
            Err(e) => return Err(self.corrupt(e.to_string())),
        };

        let location = RecordLocation {
            lsn: entry.lsn,
            offset: self.position,
            len: header.frame_len(),
        };
        self.position += header.frame_len();

        Ok(Some((location, entry)))
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    /// Whether reading stopped at a partially written final frame
    pub fn hit_torn_tail(&self) -> bool {
        self.torn_tail
    }

    /// Length of the log up to the end of the last valid frame
    pub fn valid_len(&self) -> u64 {
        self.position
    }

    /// Total length of the file on disk
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    fn torn(&mut self) -> Result<Option<(RecordLocation, WalEntry)>> {
        self.torn_tail = true;
        Ok(None)
    }

    fn corrupt(&self, detail: String) -> StoreError {
        StoreError::CorruptionDetected(format!(
            "bad frame at offset {}: {}",
            self.position, detail
        ))
    }

    fn rest_is_zeroed(&mut self) -> Result<bool> {
        let mut buf = [0u8; 4096];
        loop {
            let n = self.reader.read(&mut buf)?;
            if n == 0 {
                return Ok(true);
            }
            if buf[..n].iter().any(|&b| b != 0) {
                return Ok(false);
            }
        }
    }
}

/// Iterator over WAL entries
///
/// Yields at most one error, then stops.
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl WalIterator {
    /// Recover the underlying reader (e.g. to inspect `hit_torn_tail`)
    pub fn into_reader(self) -> WalReader {
        self.reader
    }
}

impl Iterator for WalIterator {
    type Item = Result<(RecordLocation, WalEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.reader.next_entry() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
