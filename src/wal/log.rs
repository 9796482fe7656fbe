//! WAL file
//!
//! Append-only log of Set/Delete nodes. Appends go to the tracked end of
//! file with positioned writes, so readers holding value pointers never
//! race a shared cursor.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::config::WalSyncStrategy;
use crate::error::{Result, TdbError};
use crate::value::{Generation, SharedFile, ValuePointer};

use super::node::{encode_record, Encoded, Node, NodeKind};
use super::pio;
use super::replay::{find_record_after, RecoveryReport, Replay};

/// Write-ahead log over a single file
///
/// ## Concurrency:
/// - `write_lock`: serializes appends (and guards the encode buffer)
/// - `replay_lock`: one full scan at a time; appends may continue during it
/// - `size` / `tx`: atomics, readable without any lock
pub struct Wal {
    path: PathBuf,

    /// Handle shared with every value pointer into this file
    file: Arc<SharedFile>,

    /// End of the last complete record
    size: AtomicU64,

    /// Highest transaction number allocated or replayed
    tx: AtomicU64,

    write_lock: Mutex<BytesMut>,
    replay_lock: Mutex<()>,

    sync_strategy: WalSyncStrategy,
    unsynced: AtomicUsize,
    closed: AtomicBool,

    /// Opened without write access; appends fail with `ReadOnly`
    read_only: bool,
}

impl Wal {
    /// Open or create a WAL with its own generation counter
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        Self::open_with_generation(path, sync_strategy, Generation::new())
    }

    /// Open or create a WAL whose handle belongs to `epoch`
    pub fn open_with_generation(
        path: &Path,
        sync_strategy: WalSyncStrategy,
        epoch: Generation,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        Self::from_file(file, path, sync_strategy, epoch)
    }

    /// Create an empty WAL, discarding any file already at `path`
    pub fn create(path: &Path, sync_strategy: WalSyncStrategy, epoch: Generation) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(file, path, sync_strategy, epoch)
    }

    fn from_file(
        file: File,
        path: &Path,
        sync_strategy: WalSyncStrategy,
        epoch: Generation,
    ) -> Result<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(SharedFile::new(file, path.to_path_buf(), epoch)),
            size: AtomicU64::new(size),
            tx: AtomicU64::new(0),
            write_lock: Mutex::new(BytesMut::with_capacity(4096)),
            replay_lock: Mutex::new(()),
            sync_strategy,
            unsynced: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            read_only: false,
        })
    }

    /// Open an existing log for reading only. Never creates the file.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut wal = Self::from_file(file, path, WalSyncStrategy::Manual, Generation::new())?;
        wal.read_only = true;
        Ok(wal)
    }

    /// Scan a log file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryReport> {
        let wal = Self::open_read_only(path)?;
        let mut replay = wal.all()?;
        for item in replay.by_ref() {
            if item.is_err() {
                break;
            }
        }
        Ok(replay.report())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Append a node at the end of the log.
    ///
    /// On success the node's `value_offset` is an absolute file offset.
    /// Returns the number of bytes written. On error the log is left as it
    /// was before the call.
    pub fn write(&self, node: &mut Node) -> Result<u64> {
        self.ensure_writable()?;
        let mut buf = self.write_lock.lock();
        buf.clear();
        let len = node.encode(&mut buf) as u64;
        let offset = self.append_locked(&buf)?;
        drop(buf);

        if node.kind == NodeKind::Set {
            node.value_offset += offset;
        }
        self.tx.fetch_max(node.tx, Ordering::AcqRel);
        Ok(len)
    }

    /// Append a Set with the next transaction number
    pub fn set(&self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<ValuePointer> {
        self.set_with_tx(self.next_tx(), bucket, key, value)
    }

    /// Append a Set with an explicit transaction number
    pub fn set_with_tx(&self, tx: u64, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<ValuePointer> {
        let (offset, enc) = self.append_record(NodeKind::Set, tx, bucket, key, Some(value))?;
        Ok(ValuePointer::new(
            Arc::clone(&self.file),
            offset + enc.value_offset,
            enc.value_len,
        ))
    }

    /// Append a Delete with the next transaction number. Returns that number.
    pub fn delete(&self, bucket: &[u8], key: &[u8]) -> Result<u64> {
        let tx = self.next_tx();
        self.append_record(NodeKind::Delete, tx, bucket, key, None)?;
        Ok(tx)
    }

    fn append_record(
        &self,
        kind: NodeKind,
        tx: u64,
        bucket: &[u8],
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Result<(u64, Encoded)> {
        self.ensure_writable()?;
        let mut buf = self.write_lock.lock();
        buf.clear();
        let enc = encode_record(kind, tx, bucket, key, value, &mut buf);
        let offset = self.append_locked(&buf)?;
        drop(buf);

        self.tx.fetch_max(tx, Ordering::AcqRel);
        Ok((offset, enc))
    }

    /// Write `record` at the tracked end of file and sync if the strategy
    /// calls for it. Caller holds `write_lock`.
    ///
    /// A failed write or sync cuts the file back to `offset`, so an `Err`
    /// always means the record is not in the log.
    fn append_locked(&self, record: &[u8]) -> Result<u64> {
        let offset = self.size.load(Ordering::Acquire);
        let sync_due = self.sync_due();

        let appended = pio::write_all_at(self.file.file(), record, offset).and_then(|()| {
            if sync_due {
                self.file.file().sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(err) = appended {
            // Keep the tail on a record boundary for the next append
            if let Err(trunc_err) = self.file.file().set_len(offset) {
                tracing::error!(
                    path = %self.path.display(),
                    offset,
                    error = %trunc_err,
                    "failed to truncate WAL after write error"
                );
            }
            return Err(err.into());
        }

        self.size.store(offset + record.len() as u64, Ordering::Release);
        if sync_due {
            self.unsynced.store(0, Ordering::Release);
        } else {
            self.unsynced.fetch_add(1, Ordering::AcqRel);
        }
        Ok(offset)
    }

    /// Whether the append about to be made should be followed by a sync
    fn sync_due(&self) -> bool {
        match self.sync_strategy {
            WalSyncStrategy::Manual => false,
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => {
                self.unsynced.load(Ordering::Acquire) + 1 >= count
            }
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TdbError::NotOpen);
        }
        if self.read_only {
            return Err(TdbError::ReadOnly);
        }
        Ok(())
    }

    // =========================================================================
    // Replay
    // =========================================================================

    /// Sequential scan of every record from offset zero.
    ///
    /// Only one scan may run at a time; a second (or nested) call fails with
    /// `ReplayInProgress`. Appends made during the scan are picked up.
    pub fn all(&self) -> Result<Replay<'_>> {
        let guard = self.replay_lock.try_lock().ok_or(TdbError::ReplayInProgress)?;
        Ok(Replay::new(self, guard))
    }

    /// Offset of the first intact record that starts after `from`, if any.
    ///
    /// Used after a scan stops early: `None` means the damage runs to end
    /// of file.
    pub fn find_record_after(&self, from: u64) -> Result<Option<u64>> {
        find_record_after(self, from)
    }

    /// Pointer to the value of a replayed Set node
    pub fn pointer(&self, node: &Node) -> ValuePointer {
        ValuePointer::new(Arc::clone(&self.file), node.value_offset, node.value_len)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Flush file contents to stable storage
    pub fn sync(&self) -> Result<()> {
        self.file.file().sync_data()?;
        self.unsynced.store(0, Ordering::Release);
        Ok(())
    }

    /// Cut the log back to `len` bytes
    pub fn truncate(&self, len: u64) -> Result<()> {
        self.ensure_writable()?;
        let _buf = self.write_lock.lock();
        self.file.file().set_len(len)?;
        self.file.file().sync_all()?;
        self.size.store(len, Ordering::Release);
        Ok(())
    }

    /// Sync, then refuse further appends. The descriptor itself is released
    /// once the last value pointer into it is dropped.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.read_only {
            return Ok(());
        }
        let _buf = self.write_lock.lock();
        self.sync()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current end of the log
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Highest transaction number seen
    pub fn tx(&self) -> u64 {
        self.tx.load(Ordering::Acquire)
    }

    /// Raise the transaction counter to at least `tx`
    pub fn advance_tx(&self, tx: u64) {
        self.tx.fetch_max(tx, Ordering::AcqRel);
    }

    fn next_tx(&self) -> u64 {
        self.tx.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn generation(&self) -> u64 {
        self.file.generation()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn shared_file(&self) -> &Arc<SharedFile> {
        &self.file
    }
}
