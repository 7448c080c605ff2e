//! WAL Entry definitions
//!
//! Defines the structure of individual log records and their framing.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Frame header size: LSN (8) + CRC (4) + Len (4) + Header CRC (4)
pub const HEADER_SIZE: usize = 20;

/// Bytes of the header covered by the header CRC
const HEADER_BODY: usize = 16;

/// Upper bound on a single record body; anything larger is treated as damage
pub const MAX_BODY_SIZE: u32 = 1024 * 1024 * 1024;

/// Largest key + value payload one record can carry, leaving room for the
/// fixed fields of the body (lsn, variant tag, length prefixes, timestamp)
pub const MAX_PAYLOAD_SIZE: usize = MAX_BODY_SIZE as usize - 64;

/// Body bytes a batch mutation adds on top of its key and value:
/// variant tag (4) + two length prefixes (16)
pub const MUTATION_OVERHEAD: usize = 20;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operation to perform
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Remove every key
    Clear,

    /// Several mutations committed as one record
    Batch(Vec<Mutation>),
}

/// A single mutation inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl Operation {
    /// Find the value this operation wrote for `key`, if any.
    ///
    /// For batches the last write to `key` wins.
    pub fn value_for(&self, key: &[u8]) -> Option<&[u8]> {
        match self {
            Operation::Put { key: k, value } if k.as_slice() == key => Some(value.as_slice()),
            Operation::Batch(mutations) => {
                match mutations.iter().rev().find(|m| m.key() == key)? {
                    Mutation::Put { value, .. } => Some(value.as_slice()),
                    Mutation::Delete { .. } => None,
                }
            }
            _ => None,
        }
    }
}

impl Mutation {
    pub fn key(&self) -> &[u8] {
        match self {
            Mutation::Put { key, .. } | Mutation::Delete { key } => key,
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub lsn: u64,
    /// CRC32 of the body
    pub crc: u32,
    pub body_len: u32,
}

impl FrameHeader {
    /// Decode a header, verifying its own checksum
    ///
    /// The body CRC cannot vouch for the LSN or the length, so the header
    /// carries a CRC of its first 16 bytes.
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        let mut header_crc = [0u8; 4];
        lsn.copy_from_slice(&bytes[0..8]);
        crc.copy_from_slice(&bytes[8..12]);
        len.copy_from_slice(&bytes[12..16]);
        header_crc.copy_from_slice(&bytes[16..20]);

        let expected = u32::from_le_bytes(header_crc);
        let actual = compute_crc(&bytes[..HEADER_BODY]);
        if expected != actual {
            return Err(StoreError::CorruptionDetected(format!(
                "header CRC mismatch: expected {:08x}, got {:08x}",
                expected, actual
            )));
        }

        Ok(Self {
            lsn: u64::from_le_bytes(lsn),
            crc: u32::from_le_bytes(crc),
            body_len: u32::from_le_bytes(len),
        })
    }

    /// Encode the header, appending its checksum
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(&self.lsn.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.crc.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.body_len.to_le_bytes());
        let header_crc = compute_crc(&bytes[..HEADER_BODY]);
        bytes[16..20].copy_from_slice(&header_crc.to_le_bytes());
        bytes
    }

    /// Total size of the frame including the header
    pub fn frame_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.body_len as u64
    }
}

impl WalEntry {
    /// Create an entry stamped with the current time
    pub fn new(lsn: u64, operation: Operation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            lsn,
            operation,
            timestamp,
        }
    }

    /// Encode the entry as a complete frame: header followed by body
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        if body.len() as u64 > MAX_BODY_SIZE as u64 {
            return Err(StoreError::Serialization(format!(
                "record body of {} bytes exceeds the {} byte frame limit",
                body.len(),
                MAX_BODY_SIZE
            )));
        }

        let header = FrameHeader {
            lsn: self.lsn,
            crc: compute_crc(&body),
            body_len: body.len() as u32,
        };

        let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a complete frame, verifying the checksum and the header LSN
    pub fn deserialize(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_SIZE {
            return Err(StoreError::CorruptionDetected(format!(
                "frame of {} bytes is shorter than its header",
                frame.len()
            )));
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&frame[..HEADER_SIZE]);
        let header = FrameHeader::decode(&header_bytes)?;

        let body = &frame[HEADER_SIZE..];
        if body.len() != header.body_len as usize {
            return Err(StoreError::CorruptionDetected(format!(
                "frame body is {} bytes, header says {}",
                body.len(),
                header.body_len
            )));
        }

        Self::decode_body(&header, body)
    }

    /// Decode a body whose header has already been read
    pub fn decode_body(header: &FrameHeader, body: &[u8]) -> Result<Self> {
        let actual = compute_crc(body);
        if actual != header.crc {
            return Err(StoreError::CorruptionDetected(format!(
                "CRC mismatch for lsn {}: expected {:08x}, got {:08x}",
                header.lsn, header.crc, actual
            )));
        }

        let entry: WalEntry = bincode::deserialize(body)?;
        if entry.lsn != header.lsn {
            return Err(StoreError::CorruptionDetected(format!(
                "header lsn {} does not match body lsn {}",
                header.lsn, entry.lsn
            )));
        }

        Ok(entry)
    }
}

/// CRC32 of a record body
pub fn compute_crc(body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    hasher.finalize()
}
