//! Bucket table
//!
//! Bucket name -> ordered map of key -> value pointer.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use bytes::Bytes;

use crate::value::ValuePointer;

use super::intern::Interner;

/// Ordered index of one bucket
pub type BucketIndex = BTreeMap<Bytes, ValuePointer>;

/// All bucket indexes of an engine instance
///
/// Not synchronized; the owner wraps it in a lock.
#[derive(Debug, Default)]
pub struct BucketTable {
    buckets: HashMap<Bytes, BucketIndex>,
    interner: Interner,
    entries: usize,
}

impl BucketTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table that reuses an existing set of interned names
    pub fn with_interner(interner: Interner) -> Self {
        Self {
            buckets: HashMap::new(),
            interner,
            entries: 0,
        }
    }

    /// Interned bucket names, for carrying over into a rebuilt table
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    // =========================================================================
    // Point operations
    // =========================================================================

    pub fn get(&self, bucket: &[u8], key: &[u8]) -> Option<&ValuePointer> {
        self.buckets.get(bucket)?.get(key)
    }

    pub fn contains(&self, bucket: &[u8], key: &[u8]) -> bool {
        self.get(bucket, key).is_some()
    }

    /// Insert or replace. The bucket is created on first use; an existing
    /// key keeps its allocation.
    pub fn insert(&mut self, bucket: &[u8], key: &[u8], ptr: ValuePointer) -> Option<ValuePointer> {
        let name = self.interner.intern(bucket);
        let index = self.buckets.entry(name).or_default();

        if let Some(slot) = index.get_mut(key) {
            return Some(std::mem::replace(slot, ptr));
        }
        index.insert(Bytes::copy_from_slice(key), ptr);
        self.entries += 1;
        None
    }

    /// Remove a key. Empty buckets stay in the table.
    pub fn remove(&mut self, bucket: &[u8], key: &[u8]) -> Option<ValuePointer> {
        let removed = self.buckets.get_mut(bucket)?.remove(key);
        if removed.is_some() {
            self.entries -= 1;
        }
        removed
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Copy of the entries of `bucket` with `min <= key < max`.
    /// An empty `max` means no upper bound.
    pub fn snapshot_range(&self, bucket: &[u8], min: &[u8], max: &[u8]) -> Vec<(Bytes, ValuePointer)> {
        let Some(index) = self.buckets.get(bucket) else {
            return Vec::new();
        };
        if !max.is_empty() && min >= max {
            return Vec::new();
        }

        let upper = if max.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(max)
        };
        index
            .range::<[u8], _>((Bound::Included(min), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Copy of every bucket's index
    pub fn snapshot(&self) -> Vec<(Bytes, BucketIndex)> {
        let mut out: Vec<_> = self
            .buckets
            .iter()
            .map(|(name, index)| (name.clone(), index.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Bucket names in ascending byte order
    pub fn bucket_names(&self) -> Vec<Bytes> {
        let mut names: Vec<Bytes> = self.buckets.keys().cloned().collect();
        names.sort();
        names
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of keys in `bucket`
    pub fn bucket_len(&self, bucket: &[u8]) -> usize {
        self.buckets.get(bucket).map_or(0, BTreeMap::len)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of keys across all buckets
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}
