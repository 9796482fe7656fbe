//! Database Module
//!
//! The engine that coordinates the WAL, the compacted snapshot file and the
//! in-memory index.
//!
//! ## Responsibilities
//! - Rebuild the index on open (snapshot first, then WAL)
//! - Serve Get/Exists/All/Range from the index, Set/Delete through the WAL
//! - Compact the log into the snapshot file (see `compaction.rs`)
//! - Hold the in-process directory lock for its lifetime
//!
//! ## On-disk layout
//! ```text
//! {data_dir}/
//!   ├── tdb.wal        active write-ahead log
//!   └── data.tdb       latest compacted snapshot (same record format)
//! ```

mod compaction;
mod iter;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::config::{Config, WalSyncStrategy};
use crate::error::{Result, TdbError};
use crate::index::{BucketTable, Interner};
use crate::lock::{DirLockGuard, DirLockRegistry};
use crate::value::{Generation, ValueReader};
use crate::wal::{NodeKind, RecoveryReport, Wal};

pub use compaction::CompactionReport;
pub use iter::{BucketNames, Entries, Entry};

/// Lifecycle of an engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DbState {
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl DbState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => DbState::Open,
            2 => DbState::Closing,
            _ => DbState::Closed,
        }
    }
}

/// What startup replay found
#[derive(Debug, Default)]
pub struct OpenReport {
    /// Scan of `data.tdb` (`None` when the file does not exist)
    pub snapshot: Option<RecoveryReport>,

    /// Scan of `tdb.wal`
    pub wal: RecoveryReport,

    /// WAL records applied to the index
    pub applied: u64,

    /// WAL records already covered by the snapshot
    pub skipped: u64,

    /// A torn WAL tail was cut off
    pub truncated_tail: bool,

    /// Corruption was found and the engine refuses writes
    pub read_only: bool,
}

/// Point-in-time counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStats {
    pub tx: u64,
    pub wal_size: u64,
    pub snapshot_size: u64,
    pub buckets: usize,
    pub entries: usize,
    pub generation: u64,
    pub read_only: bool,
}

/// State that compaction swaps out as a unit
struct Inner {
    table: BucketTable,
    wal: Wal,
    snapshot: Option<Wal>,
}

/// The storage engine
///
/// ## Concurrency Model
///
/// - `inner` (RwLock): all bucket indexes plus the file handles.
///   Set/Delete hold it exclusively across the WAL append and index update;
///   Get/Exists/All/Range hold it shared only long enough to copy pointers.
/// - The WAL has its own append lock, independent of `inner`.
/// - `compaction_lock` (Mutex): at most one compaction at a time.
///
/// Value readers do their I/O after `inner` is released.
pub struct Db {
    config: Config,
    dir: PathBuf,
    wal_path: PathBuf,
    snapshot_path: PathBuf,

    inner: RwLock<Inner>,
    compaction_lock: Mutex<()>,

    generation: Generation,
    state: AtomicU8,
    read_only: AtomicBool,
    recovery: Mutex<OpenReport>,

    dir_lock: Mutex<Option<DirLockGuard>>,
}

impl Db {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "tdb.wal";
    const SNAPSHOT_FILENAME: &'static str = "data.tdb";
    const COMPACT_TMP_FILENAME: &'static str = "data.tdb.tmp";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory and claim it in `registry`
    /// 2. Replay `data.tdb` into the index, noting its transaction number
    /// 3. Replay `tdb.wal`, skipping records the snapshot already covers
    /// 4. Compact if the WAL is over the threshold
    pub fn open(config: Config, registry: &Arc<DirLockRegistry>) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let guard = registry.try_acquire(&config.data_dir)?;
        let dir = guard.path().to_path_buf();
        let wal_path = dir.join(Self::WAL_FILENAME);
        let snapshot_path = dir.join(Self::SNAPSHOT_FILENAME);

        let generation = Generation::new();
        let (inner, report) = load(
            &wal_path,
            &snapshot_path,
            &config,
            &generation,
            Interner::new(),
        )?;

        let read_only = report.read_only;
        let db = Self {
            config,
            dir,
            wal_path,
            snapshot_path,
            inner: RwLock::new(inner),
            compaction_lock: Mutex::new(()),
            generation,
            state: AtomicU8::new(DbState::Open as u8),
            read_only: AtomicBool::new(read_only),
            recovery: Mutex::new(report),
            dir_lock: Mutex::new(Some(guard)),
        };

        let (wal_size, entries) = {
            let inner = db.inner.read();
            (inner.wal.size(), inner.table.len())
        };
        tracing::info!(
            path = %db.dir.display(),
            entries,
            wal_size,
            read_only,
            "database opened"
        );

        if !read_only && db.config.compact_on_open && wal_size > db.config.compaction_threshold {
            tracing::info!(
                wal_size,
                threshold = db.config.compaction_threshold,
                "WAL over threshold, compacting"
            );
            db.compact()?;
        }

        Ok(db)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path, registry: &Arc<DirLockRegistry>) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config, registry)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store `value` under `bucket`/`key`.
    ///
    /// Writing a value identical to the stored one (up to
    /// `equality_check_limit` bytes) is a no-op and does not touch the WAL.
    pub fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let mut inner = self.inner.write();

        if let Some(existing) = inner.table.get(bucket, key) {
            if value.len() <= self.config.equality_check_limit && existing.content_eq(value)? {
                return Ok(());
            }
        }

        let ptr = inner.wal.set(bucket, key, value)?;
        inner.table.insert(bucket, key, ptr);
        Ok(())
    }

    /// Remove `bucket`/`key`. Removing a missing key succeeds.
    pub fn delete(&self, bucket: &[u8], key: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let mut inner = self.inner.write();

        if !inner.table.contains(bucket, key) {
            return Ok(());
        }

        inner.wal.delete(bucket, key)?;
        inner.table.remove(bucket, key);
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Reader over the stored value, or `None` if absent
    pub fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Option<ValueReader>> {
        self.ensure_open()?;
        let ptr = self.inner.read().table.get(bucket, key).cloned();
        Ok(ptr.map(|p| p.reader()))
    }

    /// The stored value read fully into memory
    pub fn get_bytes(&self, bucket: &[u8], key: &[u8]) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        let ptr = self.inner.read().table.get(bucket, key).cloned();
        ptr.map(|p| p.read_to_bytes()).transpose()
    }

    pub fn exists(&self, bucket: &[u8], key: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.inner.read().table.contains(bucket, key))
    }

    /// Every entry of `bucket` in key order, as of this call
    pub fn all(&self, bucket: &[u8]) -> Result<Entries> {
        self.range(bucket, b"", b"")
    }

    /// Entries with `min <= key < max` in key order, as of this call.
    /// An empty `max` means no upper bound.
    ///
    /// The bucket is copied under a shared lock; writes made while the
    /// returned iterator is consumed are not visible to it.
    pub fn range(&self, bucket: &[u8], min: &[u8], max: &[u8]) -> Result<Entries> {
        self.ensure_open()?;
        let entries = self.inner.read().table.snapshot_range(bucket, min, max);
        Ok(Entries::new(entries))
    }

    /// Names of every bucket that has ever been written to, in byte order
    pub fn buckets(&self) -> Result<BucketNames> {
        self.ensure_open()?;
        let names = self.inner.read().table.bucket_names();
        Ok(BucketNames::new(names))
    }

    /// Number of keys in `bucket`
    pub fn len(&self, bucket: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.inner.read().table.bucket_len(bucket))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Flush the WAL to stable storage
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.read().wal.sync()
    }

    /// Sync and close the files, invalidate outstanding value pointers and
    /// release the directory lock. Later calls are no-ops.
    pub fn close(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(
                DbState::Open as u8,
                DbState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }

        let _compaction = self.compaction_lock.lock();
        let inner = self.inner.write();

        let mut result = inner.wal.close();
        if let Some(snapshot) = &inner.snapshot {
            if let Err(e) = snapshot.close() {
                result = result.and(Err(e));
            }
        }
        self.generation.advance();
        drop(inner);

        if let Some(guard) = self.dir_lock.lock().take() {
            guard.release();
        }
        self.state.store(DbState::Closed as u8, Ordering::Release);

        match &result {
            Ok(()) => tracing::info!(path = %self.dir.display(), "database closed"),
            Err(e) => tracing::warn!(path = %self.dir.display(), error = %e, "database closed with error"),
        }
        result
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Directory holding the data files
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> DbState {
        DbState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True when replay found corruption and writes are refused
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Current transaction number
    pub fn tx(&self) -> u64 {
        self.inner.read().wal.tx()
    }

    /// Current file generation
    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    /// Run `f` against the most recent replay report
    pub fn with_recovery<R>(&self, f: impl FnOnce(&OpenReport) -> R) -> R {
        f(&self.recovery.lock())
    }

    pub fn stats(&self) -> Result<DbStats> {
        self.ensure_open()?;
        let inner = self.inner.read();
        Ok(DbStats {
            tx: inner.wal.tx(),
            wal_size: inner.wal.size(),
            snapshot_size: inner.snapshot.as_ref().map_or(0, Wal::size),
            buckets: inner.table.bucket_count(),
            entries: inner.table.len(),
            generation: self.generation.current(),
            read_only: self.is_read_only(),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state() != DbState::Open {
            return Err(TdbError::NotOpen);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.is_read_only() {
            return Err(TdbError::ReadOnly);
        }
        Ok(())
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close database on drop");
        }
    }
}

// =============================================================================
// Replay
// =============================================================================

/// Open both files and rebuild the index from them
fn load(
    wal_path: &Path,
    snapshot_path: &Path,
    config: &Config,
    generation: &Generation,
    interner: Interner,
) -> Result<(Inner, OpenReport)> {
    let mut table = BucketTable::with_interner(interner);
    let mut report = OpenReport::default();

    let mut snapshot_tx = 0;
    let snapshot = if snapshot_path.exists() {
        let snapshot = Wal::open_with_generation(snapshot_path, WalSyncStrategy::Manual, generation.clone())?;
        let (scan, _, _) = replay_into(&snapshot, &mut table, None)?;
        snapshot_tx = scan.last_tx;

        if let Some(err) = &scan.error {
            // Written atomically by compaction, so even a short tail is damage
            if config.repair_on_open {
                tracing::warn!(
                    path = %snapshot_path.display(),
                    valid_len = scan.valid_len,
                    error = %err,
                    "truncating corrupt snapshot"
                );
                snapshot.truncate(scan.valid_len)?;
            } else {
                tracing::warn!(
                    path = %snapshot_path.display(),
                    valid_len = scan.valid_len,
                    error = %err,
                    "corrupt snapshot, opening read-only"
                );
                report.read_only = true;
            }
        }
        report.snapshot = Some(scan);
        Some(snapshot)
    } else {
        None
    };

    let wal = Wal::open_with_generation(wal_path, config.wal_sync_strategy, generation.clone())?;
    let (scan, applied, skipped) = replay_into(&wal, &mut table, Some(snapshot_tx))?;

    if let Some(err) = &scan.error {
        // A short record only counts as an interrupted append when nothing
        // intact follows it
        let torn_tail = scan.is_torn_tail() && {
            match wal.find_record_after(scan.valid_len)? {
                Some(offset) => {
                    tracing::warn!(
                        path = %wal_path.display(),
                        valid_len = scan.valid_len,
                        next_record = offset,
                        "intact records follow a short record"
                    );
                    false
                }
                None => true,
            }
        };

        if torn_tail || config.repair_on_open {
            tracing::warn!(
                path = %wal_path.display(),
                valid_len = scan.valid_len,
                error = %err,
                "truncating WAL after last valid record"
            );
            wal.truncate(scan.valid_len)?;
            report.truncated_tail = true;
        } else {
            tracing::warn!(
                path = %wal_path.display(),
                valid_len = scan.valid_len,
                error = %err,
                "corrupt WAL, opening read-only"
            );
            report.read_only = true;
        }
    }

    wal.advance_tx(snapshot_tx.max(scan.last_tx));
    tracing::debug!(
        snapshot_tx,
        applied,
        skipped,
        tx = wal.tx(),
        buckets = table.bucket_count(),
        entries = table.len(),
        "replay complete"
    );

    report.wal = scan;
    report.applied = applied;
    report.skipped = skipped;

    Ok((Inner { table, wal, snapshot }, report))
}

/// Apply every valid record of `log` to `table`.
///
/// Records with `tx <= skip_through` are counted but not applied. Returns
/// the scan report plus applied/skipped counts. Only I/O failures are
/// errors; a corrupt record ends the scan and is left in the report.
fn replay_into(
    log: &Wal,
    table: &mut BucketTable,
    skip_through: Option<u64>,
) -> Result<(RecoveryReport, u64, u64)> {
    let mut replay = log.all()?;
    let mut applied = 0;
    let mut skipped = 0;

    for item in replay.by_ref() {
        let node = match item {
            Ok(node) => node,
            Err(e) if e.is_corruption() => break,
            Err(e) => return Err(e),
        };

        if skip_through.is_some_and(|tx| node.tx <= tx) {
            skipped += 1;
            continue;
        }

        match node.kind {
            NodeKind::Set => {
                table.insert(&node.bucket, &node.key, log.pointer(&node));
            }
            NodeKind::Delete => {
                table.remove(&node.bucket, &node.key);
            }
        }
        applied += 1;
    }

    Ok((replay.report(), applied, skipped))
}
