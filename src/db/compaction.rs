//! Compaction
//!
//! Rewrites the live contents of every bucket into a fresh snapshot file and
//! drops the WAL when nothing was written in the meantime.
//!
//! ## Phases
//! 1. Under `inner` (shared): copy every bucket index and read the tx counter
//!    (`snapshot_tx`).
//! 2. No index lock: stream each value into `data.tdb.tmp`, every record
//!    tagged with `snapshot_tx`, sync, and rename over `data.tdb`.
//! 3. Under `inner` (exclusive): if the tx counter is still `snapshot_tx`,
//!    close and delete the WAL. Advance the generation and reload both files
//!    and the index from disk.
//!
//! A failure in phase 2 leaves the old snapshot and WAL untouched. A WAL
//! that survives phase 3 is still correct: its records up to `snapshot_tx`
//! are skipped on replay.

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;

use bytes::Bytes;

use crate::config::WalSyncStrategy;
use crate::error::Result;
use crate::index::BucketIndex;
use crate::value::Generation;
use crate::wal::Wal;

use super::{load, Db};

/// Outcome of one compaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Transaction number every snapshot record is tagged with
    pub snapshot_tx: u64,

    /// Entries written to the snapshot
    pub entries: u64,

    /// Size of the new snapshot file
    pub snapshot_size: u64,

    /// Whether the old WAL was deleted
    pub wal_removed: bool,
}

impl Db {
    /// Compact the WAL into the snapshot file.
    ///
    /// Every value pointer handed out before this call is stale afterwards.
    pub fn compact(&self) -> Result<CompactionReport> {
        self.ensure_writable()?;
        let _compaction = self.compaction_lock.lock();
        self.ensure_open()?;

        let (buckets, snapshot_tx) = self.freeze();
        let (entries, snapshot_size) = self.publish_snapshot(buckets, snapshot_tx)?;
        let wal_removed = self.swap_in_snapshot(snapshot_tx)?;

        tracing::info!(
            snapshot_tx,
            entries,
            snapshot_size,
            wal_removed,
            generation = self.generation.current(),
            "compaction complete"
        );

        Ok(CompactionReport {
            snapshot_tx,
            entries,
            snapshot_size,
            wal_removed,
        })
    }

    /// Phase 1: consistent copy of every bucket index
    fn freeze(&self) -> (Vec<(Bytes, BucketIndex)>, u64) {
        let inner = self.inner.read();
        (inner.table.snapshot(), inner.wal.tx())
    }

    /// Phase 2: write the new snapshot and rename it into place
    fn publish_snapshot(&self, buckets: Vec<(Bytes, BucketIndex)>, snapshot_tx: u64) -> Result<(u64, u64)> {
        let tmp_path = self.dir.join(Self::COMPACT_TMP_FILENAME);
        let written = match write_snapshot(&tmp_path, &buckets, snapshot_tx) {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                tracing::warn!(error = %e, "compaction aborted while writing snapshot");
                return Err(e);
            }
        };
        drop(buckets);

        if let Err(e) = fs::rename(&tmp_path, &self.snapshot_path) {
            let _ = fs::remove_file(&tmp_path);
            tracing::warn!(error = %e, "compaction aborted, rename failed");
            return Err(e.into());
        }
        sync_dir(&self.dir);
        Ok(written)
    }

    /// Phase 3: drop the WAL if nothing was written since `freeze`, then
    /// reload. Returns whether the WAL was removed.
    fn swap_in_snapshot(&self, snapshot_tx: u64) -> Result<bool> {
        let mut inner = self.inner.write();
        let mut wal_removed = false;
        if inner.wal.tx() == snapshot_tx {
            let removed = inner
                .wal
                .close()
                .and_then(|()| fs::remove_file(&self.wal_path).map_err(Into::into));
            match removed {
                Ok(()) => wal_removed = true,
                Err(e) => tracing::warn!(error = %e, "keeping WAL after compaction"),
            }
        } else {
            tracing::debug!(snapshot_tx, tx = inner.wal.tx(), "writes during compaction, keeping WAL");
        }

        self.generation.advance();
        let interner = inner.table.interner().clone();
        let (fresh, report) = match load(
            &self.wal_path,
            &self.snapshot_path,
            &self.config,
            &self.generation,
            interner,
        ) {
            Ok(loaded) => loaded,
            Err(e) => {
                // Old handles are stale now; refuse writes until reopened
                self.read_only.store(true, Ordering::Release);
                tracing::error!(error = %e, "reload after compaction failed");
                return Err(e);
            }
        };
        // An empty snapshot carries no tx of its own
        fresh.wal.advance_tx(snapshot_tx);
        *inner = fresh;
        if report.read_only {
            self.read_only.store(true, Ordering::Release);
        }
        *self.recovery.lock() = report;
        Ok(wal_removed)
    }
}

/// Write every entry to a new log at `path`. Returns entry count and size.
fn write_snapshot(path: &Path, buckets: &[(Bytes, BucketIndex)], snapshot_tx: u64) -> Result<(u64, u64)> {
    let out = Wal::create(path, WalSyncStrategy::Manual, Generation::new())?;
    let mut entries = 0;

    for (bucket, index) in buckets {
        for (key, ptr) in index {
            let value = ptr.read_to_bytes()?;
            out.set_with_tx(snapshot_tx, bucket, key, &value)?;
            entries += 1;
        }
    }

    out.close()?;
    Ok((entries, out.size()))
}

/// Persist a rename by syncing the directory entry. Best effort.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
            tracing::warn!(path = %dir.display(), error = %e, "failed to sync directory");
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}
