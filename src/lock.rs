//! Directory lock registry
//!
//! Keeps two `Db` instances in the same process from opening the same
//! directory. The registry is an ordinary value: create one at startup and
//! pass it to every `Db::open`.
//!
//! This is an in-process guard only. Two separate OS processes opening the
//! same directory are not detected.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, TdbError};

/// Set of directories currently held by open engines
#[derive(Debug, Default)]
pub struct DirLockRegistry {
    held: Mutex<HashSet<PathBuf>>,
}

impl DirLockRegistry {
    /// Create an empty registry, ready to share
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `path`. Fails with `AlreadyOpen` if it is already held.
    ///
    /// The claim is released when the returned guard is dropped.
    pub fn try_acquire(self: &Arc<Self>, path: &Path) -> Result<DirLockGuard> {
        let key = normalize(path)?;
        let mut held = self.held.lock();
        if !held.insert(key.clone()) {
            return Err(TdbError::AlreadyOpen(key));
        }
        drop(held);

        tracing::debug!(path = %key.display(), "directory lock acquired");
        Ok(DirLockGuard {
            registry: Arc::clone(self),
            path: key,
            released: false,
        })
    }

    /// Release `path`. Returns false if it was not held.
    pub fn release(&self, path: &Path) -> bool {
        let key = normalize(path).unwrap_or_else(|_| path.to_path_buf());
        let released = self.held.lock().remove(&key);
        if released {
            tracing::debug!(path = %key.display(), "directory lock released");
        }
        released
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        match normalize(path) {
            Ok(key) => self.held.lock().contains(&key),
            Err(_) => false,
        }
    }

    /// Number of directories currently held
    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }
}

/// Claim on one directory; releases on drop
#[derive(Debug)]
pub struct DirLockGuard {
    registry: Arc<DirLockRegistry>,
    path: PathBuf,
    released: bool,
}

impl DirLockGuard {
    /// Absolute path that is held
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release now instead of on drop
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release(&self.path);
        }
    }
}

impl Drop for DirLockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Canonical absolute form of a directory path
fn normalize(path: &Path) -> Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(p) => Ok(p),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => Ok(std::env::current_dir()?.join(path)),
    }
}
