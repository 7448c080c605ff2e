//! Error types for localkv
//!
//! Provides a unified error type for all operations, plus a coarse
//! [`ErrorKind`] that bridges can match on without inspecting messages.

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for localkv operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error(
        "Value for key {:?} is {size} bytes, limit is {limit} bytes",
        String::from_utf8_lossy(.key)
    )]
    ValueTooLarge {
        key: Vec<u8>,
        size: usize,
        limit: usize,
    },

    #[error("Quota exceeded: store would hold {required} bytes, limit is {limit} bytes")]
    QuotaExceeded { required: u64, limit: u64 },

    // -------------------------------------------------------------------------
    // Batch Errors
    // -------------------------------------------------------------------------
    #[error("Batch rejected at key {:?}: {source}", String::from_utf8_lossy(.key))]
    PartialFailure {
        key: Vec<u8>,
        #[source]
        source: Box<StoreError>,
    },

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    CorruptionDetected(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store is read-only: {0}")]
    ReadOnly(String),

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    #[error("Store mutated from inside a change observer")]
    ReentrantWrite,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

/// The error categories surfaced across the store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidKey,
    ValueTooLarge,
    QuotaExceeded,
    IoFailure,
    CorruptionDetected,
    PartialFailure,
    ReentrantWrite,
    Config,
}

impl StoreError {
    /// Category of this error.
    ///
    /// A store left read-only by a failed recovery reports
    /// `CorruptionDetected`, as does an undecodable record.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::InvalidKey(_) => ErrorKind::InvalidKey,
            StoreError::ValueTooLarge { .. } => ErrorKind::ValueTooLarge,
            StoreError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            StoreError::PartialFailure { .. } => ErrorKind::PartialFailure,
            StoreError::Io(_) => ErrorKind::IoFailure,
            StoreError::CorruptionDetected(_)
            | StoreError::Serialization(_)
            | StoreError::ReadOnly(_) => ErrorKind::CorruptionDetected,
            StoreError::ReentrantWrite => ErrorKind::ReentrantWrite,
            StoreError::Config(_) => ErrorKind::Config,
        }
    }

    /// Wrap `self` as the cause of a rejected batch entry.
    pub(crate) fn at_key(self, key: &[u8]) -> StoreError {
        StoreError::PartialFailure {
            key: key.to_vec(),
            source: Box::new(self),
        }
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
