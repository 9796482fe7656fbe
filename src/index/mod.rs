//! In-Memory Index Module
//!
//! One ordered map per bucket from key to value pointer.
//!
//! ## Responsibilities
//! - Point lookups for Get/Exists
//! - Last-writer-wins replacement on Set, removal on Delete
//! - Cheap point-in-time copies for All/Range and compaction
//!
//! ## Data Structure Choice
//! `BTreeMap<Bytes, ValuePointer>` per bucket:
//! - Keys ordered by raw bytes, so ranges come out sorted
//! - `Bytes` keys clone by reference count, so copying a bucket for
//!   iteration does not copy key bytes
//! - Values are pointers into the data files, never the bytes themselves

mod intern;
mod table;

pub use intern::Interner;
pub use table::{BucketIndex, BucketTable};
