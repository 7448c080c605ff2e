//! Storage Module
//!
//! The durable file store: one append-only log per namespace.
//!
//! ## Responsibilities
//! - Open-or-create the namespace's log lazily
//! - Crash recovery with a configurable corruption policy
//! - Positional reads of values not cached in the index
//! - Compaction by atomic rename
//!
//! ## On-disk Layout
//! ```text
//! {data_dir}/{namespace}/
//! ├── data.log            records, see `wal`
//! ├── data.log.compact    compaction output before its rename
//! └── data.log.corrupt    copy of a damaged log kept by recovery
//! ```
//!
//! A crash during compaction leaves either the old log or the new one in
//! place; a leftover `.compact` file is deleted on the next open.

mod log_store;
mod reader;

pub use log_store::{CompactedLog, LogStore, RecoveryAction, RecoveryReport};
pub use reader::LogReader;
