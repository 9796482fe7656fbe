//! Value pointers
//!
//! The index never holds value bytes. It holds a `ValuePointer`: a shared
//! handle to the file the value was written to plus the value's offset and
//! length. Bytes are read on demand with positioned reads.
//!
//! ## Generations
//! Every file handle is stamped with the `Generation` that was current when
//! it was opened. Compaction and close advance the generation, after which
//! every pointer into the old handles refuses to read (`StalePointer`).

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, TdbError};
use crate::wal::pio;

/// Chunk size for streaming comparisons
const COMPARE_CHUNK: usize = 4096;

// =============================================================================
// Generation
// =============================================================================

/// Shared file-layout epoch
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Invalidate every handle opened so far. Returns the new generation.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

// =============================================================================
// SharedFile
// =============================================================================

/// An open data file shared by the log that owns it and every pointer into it
#[derive(Debug)]
pub struct SharedFile {
    file: File,
    path: PathBuf,
    generation: u64,
    epoch: Generation,
}

impl SharedFile {
    pub(crate) fn new(file: File, path: PathBuf, epoch: Generation) -> Self {
        Self {
            file,
            path,
            generation: epoch.current(),
            epoch,
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generation this handle was opened at
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        self.epoch.current() != self.generation
    }

    fn ensure_current(&self) -> Result<()> {
        let current = self.epoch.current();
        if current != self.generation {
            return Err(TdbError::StalePointer {
                pointer: self.generation,
                current,
            });
        }
        Ok(())
    }
}

// =============================================================================
// ValuePointer
// =============================================================================

/// Location of a value inside a data file
#[derive(Debug, Clone)]
pub struct ValuePointer {
    file: Arc<SharedFile>,
    offset: u64,
    len: u64,
}

impl ValuePointer {
    pub(crate) fn new(file: Arc<SharedFile>, offset: u64, len: u64) -> Self {
        Self { file, offset, len }
    }

    /// Absolute offset of the value in its file
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn generation(&self) -> u64 {
        self.file.generation()
    }

    pub fn is_stale(&self) -> bool {
        self.file.is_stale()
    }

    /// Path of the file this pointer reads from
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Read the value into `dst` without an intermediate buffer.
    ///
    /// Copies `min(dst.len(), self.len())` bytes and returns that count.
    pub fn copy_to(&self, dst: &mut [u8]) -> Result<usize> {
        self.file.ensure_current()?;
        let n = dst.len().min(self.len as usize);
        pio::read_exact_at(self.file.file(), &mut dst[..n], self.offset)?;
        Ok(n)
    }

    /// Read the whole value
    pub fn read_to_bytes(&self) -> Result<Bytes> {
        let mut buf = vec![0u8; self.len as usize];
        self.copy_to(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Compare the stored bytes with `other` chunk by chunk
    pub fn content_eq(&self, other: &[u8]) -> Result<bool> {
        if other.len() as u64 != self.len {
            return Ok(false);
        }
        self.file.ensure_current()?;

        let mut chunk = [0u8; COMPARE_CHUNK];
        let mut pos = 0usize;
        while pos < other.len() {
            let n = (other.len() - pos).min(COMPARE_CHUNK);
            pio::read_exact_at(self.file.file(), &mut chunk[..n], self.offset + pos as u64)?;
            if chunk[..n] != other[pos..pos + n] {
                return Ok(false);
            }
            pos += n;
        }
        Ok(true)
    }

    /// Open a sequential reader over the value
    pub fn reader(&self) -> ValueReader {
        ValueReader {
            ptr: self.clone(),
            pos: 0,
            closed: false,
        }
    }
}

// =============================================================================
// ValueReader
// =============================================================================

/// Single-use sequential reader over one value.
///
/// Reads stop at the value's recorded length even if the file continues.
#[derive(Debug)]
pub struct ValueReader {
    ptr: ValuePointer,
    pos: u64,
    closed: bool,
}

impl ValueReader {
    /// Bytes left before end-of-value
    pub fn remaining(&self) -> u64 {
        self.ptr.len - self.pos
    }

    pub fn pointer(&self) -> &ValuePointer {
        &self.ptr
    }

    /// Read everything that is left
    pub fn read_to_bytes(&mut self) -> Result<Bytes> {
        let mut buf = vec![0u8; self.remaining() as usize];
        self.fill(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    /// Invalidate the reader; later reads fail with `Closed`
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(TdbError::Closed);
        }
        let n = buf.len().min(self.remaining() as usize);
        if n == 0 {
            return Ok(0);
        }

        self.ptr.file.ensure_current()?;
        pio::read_exact_at(self.ptr.file.file(), &mut buf[..n], self.ptr.offset + self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Read for ValueReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fill(buf).map_err(io::Error::from)
    }
}
