//! Configuration for tdb
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TdbError};

/// Main configuration for a tdb instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── tdb.wal          (write-ahead log)
    ///     └── data.tdb         (latest compacted snapshot)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// WAL size (in bytes) above which `Db::open` compacts before returning
    pub compaction_threshold: u64,

    /// Whether `Db::open` checks the threshold at all
    pub compact_on_open: bool,

    // -------------------------------------------------------------------------
    // Write Path Configuration
    // -------------------------------------------------------------------------
    /// Largest value length for which `set` compares bytes with the stored
    /// value and skips the write when identical
    pub equality_check_limit: usize,

    // -------------------------------------------------------------------------
    // Recovery Configuration
    // -------------------------------------------------------------------------
    /// Truncate a corrupt file at the first bad record instead of opening
    /// read-only. Data after the bad record is discarded.
    pub repair_on_open: bool,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalSyncStrategy {
    /// fsync only on `sync()`, `close()` and compaction
    Manual,

    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tdb_data"),
            wal_sync_strategy: WalSyncStrategy::Manual,
            compaction_threshold: 128 * 1024 * 1024, // 128 MiB
            compact_on_open: true,
            equality_check_limit: 64 * 1024, // 64 KiB
            repair_on_open: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(TdbError::Config("data_dir must not be empty".to_string()));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(TdbError::Config(
                "EveryNEntries requires a count greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the WAL size that triggers compaction on open (in bytes)
    pub fn compaction_threshold(mut self, bytes: u64) -> Self {
        self.config.compaction_threshold = bytes;
        self
    }

    /// Enable or disable the open-time compaction check
    pub fn compact_on_open(mut self, enabled: bool) -> Self {
        self.config.compact_on_open = enabled;
        self
    }

    /// Set the no-op equality check limit (in bytes)
    pub fn equality_check_limit(mut self, bytes: usize) -> Self {
        self.config.equality_check_limit = bytes;
        self
    }

    /// Truncate corrupt files on open instead of going read-only
    pub fn repair_on_open(mut self, enabled: bool) -> Self {
        self.config.repair_on_open = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
