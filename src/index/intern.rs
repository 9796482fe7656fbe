//! Bucket name interning
//!
//! Every record carries its bucket name. Interning keeps one shared
//! allocation per distinct name no matter how many records, index rebuilds
//! or iterators reference it.

use std::collections::HashSet;

use bytes::Bytes;

/// Table of distinct byte strings
#[derive(Debug, Clone, Default)]
pub struct Interner {
    names: HashSet<Bytes>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared copy of `name`, allocating only the first time it is seen
    pub fn intern(&mut self, name: &[u8]) -> Bytes {
        if let Some(existing) = self.names.get(name) {
            return existing.clone();
        }
        let owned = Bytes::copy_from_slice(name);
        self.names.insert(owned.clone());
        owned
    }

    pub fn get(&self, name: &[u8]) -> Option<&Bytes> {
        self.names.get(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
