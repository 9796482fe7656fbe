//! Error types for tdb
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using TdbError
pub type Result<T> = std::result::Result<T, TdbError>;

/// Unified error type for tdb operations
#[derive(Debug, Error)]
pub enum TdbError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Record Corruption
    // -------------------------------------------------------------------------
    #[error("Invalid node kind: 0x{0:02x}")]
    InvalidNodeKind(u8),

    #[error("Invalid checksum: expected {expected:#010x}, computed {actual:#010x}")]
    InvalidChecksum { expected: u32, actual: u32 },

    #[error("Short buffer: need {needed} bytes, have {available}")]
    ShortBuffer { needed: usize, available: usize },

    #[error("Malformed varint in record payload")]
    InvalidVarint,

    #[error("Record payload has {extra} unparsed trailing bytes")]
    TrailingBytes { extra: usize },

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Directory already open in this process: {}", .0.display())]
    AlreadyOpen(PathBuf),

    #[error("Database is not open")]
    NotOpen,

    #[error("Database is read-only after detecting corruption during replay")]
    ReadOnly,

    #[error("A full log replay is already in progress")]
    ReplayInProgress,

    // -------------------------------------------------------------------------
    // Value Access Errors
    // -------------------------------------------------------------------------
    #[error("Stale value pointer: generation {pointer}, current {current}")]
    StalePointer { pointer: u64, current: u64 },

    #[error("Reader closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TdbError {
    /// True for errors raised while decoding a damaged record.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            TdbError::InvalidNodeKind(_)
                | TdbError::InvalidChecksum { .. }
                | TdbError::ShortBuffer { .. }
                | TdbError::InvalidVarint
                | TdbError::TrailingBytes { .. }
        )
    }
}

impl From<TdbError> for std::io::Error {
    fn from(err: TdbError) -> Self {
        match err {
            TdbError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}
