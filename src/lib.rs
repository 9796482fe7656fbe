//! # tdb
//!
//! An embedded, single-process, log-structured key-value engine with:
//! - An append-only write-ahead log (WAL) with CRC32-checked records
//! - One ordered in-memory index per bucket, rebuilt by replay on open
//! - Compaction of live data into a snapshot file
//! - Lazy, pointer-based value reads straight from the data files
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Callers (repositories, blob store, ...)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  set / get / delete / all / range
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                          Db                                 │
//! │        (RwLock over index + files, compaction lock)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌───────────────┐
//!   │     WAL     │─────────▶│  BucketTable  │
//!   │  tdb.wal    │ pointers │ key -> ValPtr │
//!   └──────┬──────┘          └───────────────┘
//!          │ compaction
//!          ▼
//!   ┌─────────────┐
//!   │  Snapshot   │
//!   │  data.tdb   │
//!   └─────────────┘
//! ```
//!
//! Only one `Db` per directory per process: pass the same
//! `DirLockRegistry` to every `Db::open`. Separate processes are not
//! guarded against.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod value;
pub mod index;
pub mod lock;
pub mod db;
pub mod blob;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{TdbError, Result};
pub use config::{Config, WalSyncStrategy};
pub use db::{CompactionReport, Db, DbState, DbStats, Entries, Entry, OpenReport};
pub use lock::DirLockRegistry;
pub use value::{ValuePointer, ValueReader};
pub use blob::{BlobStore, BlobWriter, DbBlobStore};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of tdb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
