//! # localkv
//!
//! A durable on-device key-value store with:
//! - Append-only log with per-record checksums for durability
//! - Crash recovery with torn-write handling and a corruption policy
//! - Single-writer/multi-reader concurrency model
//! - Atomic multi-key writes and change notifications
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Store (per namespace)                     │
//! │      get / set / remove / clear / multi_get / multi_set      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┼─────────────────────┐
//!          │            │                     │
//!          ▼            ▼                     ▼
//!   ┌─────────────┐  ┌─────────────┐   ┌─────────────┐
//!   │  LogStore   │  │    Index    │   │  ChangeBus  │
//!   │  (Append)   │  │  (RwLock)   │   │ (Observers) │
//!   └──────┬──────┘  └─────────────┘   └─────────────┘
//!          │
//!          ▼
//!   ┌─────────────┐
//!   │     WAL     │
//!   │  (Records)  │
//!   └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use localkv::{Config, Store};
//!
//! let store = Store::open(Config::builder().data_dir("/tmp/app").namespace("prefs").build())?;
//! store.set(b"theme", b"dark")?;
//! assert_eq!(store.get(b"theme")?.as_deref(), Some(&b"dark"[..]));
//! # Ok::<(), localkv::StoreError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod index;
pub mod storage;
pub mod notify;
pub mod engine;
pub mod registry;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorKind, Result, StoreError};
pub use config::{CompactionTrigger, Config, ReadFailurePolicy, RecoveryPolicy, WalSyncStrategy};
pub use engine::{CompactionStats, Store, StoreStats};
pub use notify::{ChangeRecord, Observer, SubscriptionId};
pub use registry::StoreRegistry;
pub use storage::{RecoveryAction, RecoveryReport};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of localkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
