//! Write-Ahead Log (WAL) Module
//!
//! The log is the store's only durable representation: every committed
//! mutation is one framed record, and the index is rebuilt by replaying it.
//!
//! ## Responsibilities
//! - Append one record per commit, fsynced before the commit is acknowledged
//! - CRC32 checksums for corruption detection
//! - Log Sequence Numbers (LSN) for ordering
//! - Crash recovery (torn tails vs. real damage)
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ Entry 1                                          │
//! │ ┌─────────┬─────────┬────────┬─────────┬──────┐  │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ HCRC (4)│ Data │  │
//! │ └─────────┴─────────┴────────┴─────────┴──────┘  │
//! ├──────────────────────────────────────────────────┤
//! │ Entry 2                                          │
//! │ ┌─────────┬─────────┬────────┬─────────┬──────┐  │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ HCRC (4)│ Data │  │
//! │ └─────────┴─────────┴────────┴─────────┴──────┘  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! `Data` is the bincode encoding of [`WalEntry`]. `CRC` covers `Data`;
//! `HCRC` covers the 16 header bytes before it, so a damaged length is
//! never mistaken for an interrupted append.

mod entry;
mod writer;
mod reader;
mod recovery;

pub use entry::{
    compute_crc, FrameHeader, Mutation, Operation, WalEntry, HEADER_SIZE, MAX_BODY_SIZE,
    MAX_PAYLOAD_SIZE, MUTATION_OVERHEAD,
};
pub use writer::WalWriter;
pub use reader::{WalIterator, WalReader};
pub use recovery::{RecoveryResult, WalRecovery};

/// Position of a record in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    /// LSN of the record
    pub lsn: u64,
    /// Byte offset of the frame header
    pub offset: u64,
    /// Frame length including the header
    pub len: u64,
}
