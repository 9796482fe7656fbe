//! Iteration over point-in-time copies of the index

use bytes::Bytes;

use crate::error::Result;
use crate::value::{ValuePointer, ValueReader};

/// One key of a bucket and a pointer to its value
#[derive(Debug, Clone)]
pub struct Entry {
    key: Bytes,
    value: ValuePointer,
}

impl Entry {
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn pointer(&self) -> &ValuePointer {
        &self.value
    }

    /// Sequential reader over the value
    pub fn reader(&self) -> ValueReader {
        self.value.reader()
    }

    /// The value read fully into memory
    pub fn value(&self) -> Result<Bytes> {
        self.value.read_to_bytes()
    }

    pub fn into_parts(self) -> (Bytes, ValuePointer) {
        (self.key, self.value)
    }
}

/// Entries of one bucket in ascending key order.
///
/// Holds its own copy of the pointers; no lock is held while iterating.
/// Values are read lazily, so a compaction that runs mid-iteration makes
/// the remaining reads fail with `StalePointer`; call `Db::all`/`Db::range`
/// again to restart.
#[derive(Debug)]
pub struct Entries {
    inner: std::vec::IntoIter<(Bytes, ValuePointer)>,
}

impl Entries {
    pub(crate) fn new(entries: Vec<(Bytes, ValuePointer)>) -> Self {
        Self {
            inner: entries.into_iter(),
        }
    }
}

impl Iterator for Entries {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        self.inner.next().map(|(key, value)| Entry { key, value })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for Entries {
    fn next_back(&mut self) -> Option<Entry> {
        self.inner.next_back().map(|(key, value)| Entry { key, value })
    }
}

impl ExactSizeIterator for Entries {}

/// Bucket names in ascending byte order
#[derive(Debug)]
pub struct BucketNames {
    inner: std::vec::IntoIter<Bytes>,
}

impl BucketNames {
    pub(crate) fn new(names: Vec<Bytes>) -> Self {
        Self {
            inner: names.into_iter(),
        }
    }
}

impl Iterator for BucketNames {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for BucketNames {}
