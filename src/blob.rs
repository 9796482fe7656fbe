//! Blob-store adapter
//!
//! Exposes one bucket of a `Db` through a generic byte-stream store
//! interface: names map to keys, blob contents to values.

use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::Bytes;

use crate::db::Db;
use crate::error::Result;

/// Named byte streams
pub trait BlobStore: Send + Sync {
    /// Names of every blob, in byte order
    fn list(&self) -> Result<Vec<String>>;

    fn exists(&self, name: &str) -> Result<bool>;

    /// Remove a blob. Removing a missing blob succeeds.
    fn delete(&self, name: &str) -> Result<()>;

    /// Stream the contents of a blob, `None` if it does not exist
    fn new_reader(&self, name: &str) -> Result<Option<Box<dyn Read + Send>>>;

    /// Start writing a blob. Nothing is stored until `commit`.
    fn new_writer(&self, name: &str) -> Result<Box<dyn BlobWriter>>;
}

/// Writer returned by `BlobStore::new_writer`
pub trait BlobWriter: Write + Send {
    /// Store everything written so far, replacing any previous contents
    fn commit(self: Box<Self>) -> Result<()>;
}

/// `BlobStore` backed by one bucket of a `Db`
#[derive(Clone)]
pub struct DbBlobStore {
    db: Arc<Db>,
    bucket: Bytes,
}

impl DbBlobStore {
    pub fn new(db: Arc<Db>, bucket: impl Into<Bytes>) -> Self {
        Self {
            db,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &[u8] {
        &self.bucket
    }
}

impl BlobStore for DbBlobStore {
    fn list(&self) -> Result<Vec<String>> {
        let names = self
            .db
            .all(&self.bucket)?
            .filter_map(|entry| match std::str::from_utf8(entry.key()) {
                Ok(name) => Some(name.to_string()),
                Err(_) => {
                    tracing::debug!(key = ?entry.key(), "skipping non-UTF-8 blob key");
                    None
                }
            })
            .collect();
        Ok(names)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        self.db.exists(&self.bucket, name.as_bytes())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.db.delete(&self.bucket, name.as_bytes())
    }

    fn new_reader(&self, name: &str) -> Result<Option<Box<dyn Read + Send>>> {
        let reader = self.db.get(&self.bucket, name.as_bytes())?;
        Ok(reader.map(|r| Box::new(r) as Box<dyn Read + Send>))
    }

    fn new_writer(&self, name: &str) -> Result<Box<dyn BlobWriter>> {
        Ok(Box::new(DbBlobWriter {
            db: Arc::clone(&self.db),
            bucket: self.bucket.clone(),
            name: name.to_string(),
            buf: Vec::new(),
        }))
    }
}

/// Buffers a blob in memory and stores it with a single `set`
struct DbBlobWriter {
    db: Arc<Db>,
    bucket: Bytes,
    name: String,
    buf: Vec<u8>,
}

impl Write for DbBlobWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BlobWriter for DbBlobWriter {
    fn commit(self: Box<Self>) -> Result<()> {
        self.db.set(&self.bucket, self.name.as_bytes(), &self.buf)
    }
}
