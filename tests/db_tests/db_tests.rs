//! Integration tests for the Db engine
//!
//! These tests verify:
//! - Set/Get/Exists/Delete round trips, including empty and large values
//! - Overwriting with an identical value does not touch the WAL
//! - All/Range ordering and [min, max) bounds
//! - Iterators are isolated from later writes
//! - Lifecycle: reopen, close, NotOpen, stale pointers after close
//! - Concurrent readers and writers

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use tdb::{Config, Db, DbState, DirLockRegistry, TdbError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn test_config(dir: &Path) -> Config {
    Config::builder().data_dir(dir).build()
}

fn setup_temp_db() -> (TempDir, Arc<DirLockRegistry>, Db) {
    let temp_dir = TempDir::new().unwrap();
    let registry = DirLockRegistry::new();
    let db = Db::open(test_config(temp_dir.path()), &registry).unwrap();
    (temp_dir, registry, db)
}

fn get(db: &Db, bucket: &[u8], key: &[u8]) -> Option<Bytes> {
    db.get_bytes(bucket, key).unwrap()
}

fn keys(db: &Db, bucket: &[u8], min: &[u8], max: &[u8]) -> Vec<Bytes> {
    db.range(bucket, min, max)
        .unwrap()
        .map(|e| e.key().clone())
        .collect()
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_set_and_get() {
    let (_temp, _registry, db) = setup_temp_db();

    db.set(b"users", b"alice", b"admin").unwrap();

    assert_eq!(get(&db, b"users", b"alice").unwrap(), "admin");
    assert!(get(&db, b"users", b"bob").is_none());
    assert!(get(&db, b"other", b"alice").is_none());
}

#[test]
fn test_get_reader() {
    let (_temp, _registry, db) = setup_temp_db();
    db.set(b"b", b"k", b"streamed value").unwrap();

    let mut reader = db.get(b"b", b"k").unwrap().unwrap();
    let mut out = String::new();
    reader.read_to_string(&mut out).unwrap();

    assert_eq!(out, "streamed value");
    assert!(db.get(b"b", b"missing").unwrap().is_none());
}

#[test]
fn test_empty_key_and_value() {
    let (_temp, _registry, db) = setup_temp_db();

    db.set(b"b", b"", b"empty key").unwrap();
    db.set(b"b", b"empty value", b"").unwrap();

    assert_eq!(get(&db, b"b", b"").unwrap(), "empty key");
    assert_eq!(get(&db, b"b", b"empty value").unwrap(), "");
    assert!(db.exists(b"b", b"empty value").unwrap());
}

#[test]
fn test_large_values() {
    let (_temp, _registry, db) = setup_temp_db();
    let large: Vec<u8> = (0..80 * 1024).map(|i| (i % 253) as u8).collect();

    db.set(b"blobs", b"big", &large).unwrap();
    db.set(b"blobs", b"after", b"x").unwrap();

    assert_eq!(get(&db, b"blobs", b"big").unwrap(), large);
}

#[test]
fn test_overwrite() {
    let (_temp, _registry, db) = setup_temp_db();

    db.set(b"b", b"k", b"v1").unwrap();
    db.set(b"b", b"k", b"v2").unwrap();

    assert_eq!(get(&db, b"b", b"k").unwrap(), "v2");
    assert_eq!(db.len(b"b").unwrap(), 1);
    assert_eq!(db.tx(), 2);
}

#[test]
fn test_identical_overwrite_is_noop() {
    let (_temp, _registry, db) = setup_temp_db();
    db.set(b"b", b"k", b"same").unwrap();
    let stats = db.stats().unwrap();

    db.set(b"b", b"k", b"same").unwrap();

    let after = db.stats().unwrap();
    assert_eq!(after.tx, stats.tx);
    assert_eq!(after.wal_size, stats.wal_size);
}

#[test]
fn test_identical_overwrite_above_limit_is_written() {
    let temp_dir = TempDir::new().unwrap();
    let registry = DirLockRegistry::new();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .equality_check_limit(4)
        .build();
    let db = Db::open(config, &registry).unwrap();

    db.set(b"b", b"k", b"longer than four").unwrap();
    db.set(b"b", b"k", b"longer than four").unwrap();

    assert_eq!(db.tx(), 2);
}

#[test]
fn test_delete() {
    let (_temp, _registry, db) = setup_temp_db();
    db.set(b"b", b"k", b"v").unwrap();

    db.delete(b"b", b"k").unwrap();

    assert!(get(&db, b"b", b"k").is_none());
    assert!(!db.exists(b"b", b"k").unwrap());
    assert_eq!(db.all(b"b").unwrap().count(), 0);
}

#[test]
fn test_delete_missing_is_noop() {
    let (_temp, _registry, db) = setup_temp_db();
    db.set(b"b", b"k", b"v").unwrap();
    let tx = db.tx();

    db.delete(b"b", b"missing").unwrap();
    db.delete(b"nobucket", b"k").unwrap();

    assert_eq!(db.tx(), tx);
}

#[test]
fn test_set_after_delete() {
    let (_temp, _registry, db) = setup_temp_db();

    db.set(b"b", b"k", b"v1").unwrap();
    db.delete(b"b", b"k").unwrap();
    db.set(b"b", b"k", b"v2").unwrap();

    assert_eq!(get(&db, b"b", b"k").unwrap(), "v2");
}

// =============================================================================
// Iteration
// =============================================================================

#[test]
fn test_all_sorted() {
    let (_temp, _registry, db) = setup_temp_db();
    for key in ["m", "a", "z", "b", "aa"] {
        db.set(b"b", key.as_bytes(), key.to_uppercase().as_bytes()).unwrap();
    }

    let entries: Vec<(Bytes, Bytes)> = db
        .all(b"b")
        .unwrap()
        .map(|e| (e.key().clone(), e.value().unwrap()))
        .collect();

    let expected: Vec<(Bytes, Bytes)> = ["a", "aa", "b", "m", "z"]
        .iter()
        .map(|k| (Bytes::from(k.to_string()), Bytes::from(k.to_uppercase())))
        .collect();
    assert_eq!(entries, expected);
}

#[test]
fn test_all_equals_unbounded_range() {
    let (_temp, _registry, db) = setup_temp_db();
    for i in 0..50u32 {
        db.set(b"b", &i.to_be_bytes(), b"v").unwrap();
    }

    let all: Vec<Bytes> = db.all(b"b").unwrap().map(|e| e.key().clone()).collect();

    assert_eq!(all, keys(&db, b"b", b"", b""));
    assert_eq!(all.len(), 50);
}

#[test]
fn test_range_bounds() {
    let (_temp, _registry, db) = setup_temp_db();
    for key in ["a", "b", "c", "d", "e"] {
        db.set(b"b", key.as_bytes(), b"v").unwrap();
    }

    assert_eq!(keys(&db, b"b", b"b", b"d"), vec!["b", "c"]);
    assert_eq!(keys(&db, b"b", b"c", b""), vec!["c", "d", "e"]);
    assert_eq!(keys(&db, b"b", b"bb", b"cc"), vec!["c"]);
    assert!(keys(&db, b"b", b"d", b"b").is_empty());
    assert!(keys(&db, b"missing", b"", b"").is_empty());
}

#[test]
fn test_range_reverse() {
    let (_temp, _registry, db) = setup_temp_db();
    for key in ["a", "b", "c"] {
        db.set(b"b", key.as_bytes(), b"v").unwrap();
    }

    let reversed: Vec<Bytes> = db.all(b"b").unwrap().rev().map(|e| e.key().clone()).collect();

    assert_eq!(reversed, vec!["c", "b", "a"]);
    assert_eq!(db.all(b"b").unwrap().len(), 3);
}

#[test]
fn test_iterator_isolated_from_later_writes() {
    let (_temp, _registry, db) = setup_temp_db();
    db.set(b"b", b"a", b"1").unwrap();
    db.set(b"b", b"b", b"2").unwrap();

    let mut entries = db.all(b"b").unwrap();
    let first = entries.next().unwrap();

    db.set(b"b", b"c", b"3").unwrap();
    db.delete(b"b", b"b").unwrap();
    db.set(b"b", b"a", b"changed").unwrap();

    // Old pointers still read the bytes they were created for
    assert_eq!(first.value().unwrap(), "1");
    let second = entries.next().unwrap();
    assert_eq!(second.key(), "b");
    assert_eq!(second.value().unwrap(), "2");
    assert!(entries.next().is_none());
}

#[test]
fn test_buckets() {
    let (_temp, _registry, db) = setup_temp_db();
    db.set(b"zeta", b"k", b"v").unwrap();
    db.set(b"alpha", b"k", b"v").unwrap();
    db.set(b"mid", b"k", b"v").unwrap();
    db.delete(b"mid", b"k").unwrap();

    let names: Vec<Bytes> = db.buckets().unwrap().collect();

    assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    assert_eq!(db.len(b"mid").unwrap(), 0);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_reopen_persists() {
    let temp_dir = TempDir::new().unwrap();
    let registry = DirLockRegistry::new();

    {
        let db = Db::open(test_config(temp_dir.path()), &registry).unwrap();
        db.set(b"b", b"k1", b"v1").unwrap();
        db.set(b"b", b"k2", b"v2").unwrap();
        db.delete(b"b", b"k1").unwrap();
        db.close().unwrap();
    }

    let db = Db::open(test_config(temp_dir.path()), &registry).unwrap();

    assert!(get(&db, b"b", b"k1").is_none());
    assert_eq!(get(&db, b"b", b"k2").unwrap(), "v2");
    assert_eq!(db.tx(), 3);

    // New writes continue the sequence
    db.set(b"b", b"k3", b"v3").unwrap();
    assert_eq!(db.tx(), 4);
}

#[test]
fn test_drop_closes() {
    let temp_dir = TempDir::new().unwrap();
    let registry = DirLockRegistry::new();

    {
        let db = Db::open(test_config(temp_dir.path()), &registry).unwrap();
        db.set(b"b", b"k", b"v").unwrap();
    }

    assert!(registry.is_empty());
    let db = Db::open(test_config(temp_dir.path()), &registry).unwrap();
    assert_eq!(get(&db, b"b", b"k").unwrap(), "v");
}

#[test]
fn test_operations_after_close() {
    let (_temp, _registry, db) = setup_temp_db();
    db.set(b"b", b"k", b"v").unwrap();

    db.close().unwrap();
    db.close().unwrap();

    assert_eq!(db.state(), DbState::Closed);
    assert!(matches!(db.get(b"b", b"k").unwrap_err(), TdbError::NotOpen));
    assert!(matches!(db.set(b"b", b"k", b"v2").unwrap_err(), TdbError::NotOpen));
    assert!(matches!(db.delete(b"b", b"k").unwrap_err(), TdbError::NotOpen));
    assert!(matches!(db.exists(b"b", b"k").unwrap_err(), TdbError::NotOpen));
    assert!(matches!(db.all(b"b").unwrap_err(), TdbError::NotOpen));
    assert!(matches!(db.sync().unwrap_err(), TdbError::NotOpen));
    assert!(matches!(db.compact().unwrap_err(), TdbError::NotOpen));
}

#[test]
fn test_readers_stale_after_close() {
    let (_temp, _registry, db) = setup_temp_db();
    db.set(b"b", b"k", b"v").unwrap();
    let mut reader = db.get(b"b", b"k").unwrap().unwrap();
    let entry = db.all(b"b").unwrap().next().unwrap();

    db.close().unwrap();

    assert!(matches!(reader.read_to_bytes().unwrap_err(), TdbError::StalePointer { .. }));
    assert!(matches!(entry.value().unwrap_err(), TdbError::StalePointer { .. }));
}

#[test]
fn test_stats() {
    let (_temp, _registry, db) = setup_temp_db();
    db.set(b"a", b"k1", b"v").unwrap();
    db.set(b"a", b"k2", b"v").unwrap();
    db.set(b"b", b"k1", b"v").unwrap();

    let stats = db.stats().unwrap();

    assert_eq!(stats.tx, 3);
    assert_eq!(stats.buckets, 2);
    assert_eq!(stats.entries, 3);
    assert!(stats.wal_size > 0);
    assert_eq!(stats.snapshot_size, 0);
    assert!(!stats.read_only);
}

#[test]
fn test_open_path_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let registry = DirLockRegistry::new();
    let nested = temp_dir.path().join("a").join("b");

    let db = Db::open_path(&nested, &registry).unwrap();
    db.set(b"b", b"k", b"v").unwrap();

    assert!(nested.join("tdb.wal").exists());
    assert_eq!(db.state(), DbState::Open);
}

#[test]
fn test_invalid_config_rejected() {
    let registry = DirLockRegistry::new();
    let config = Config::builder().data_dir("").build();

    let err = Db::open(config, &registry).err().unwrap();

    assert!(matches!(err, TdbError::Config(_)));
    assert!(registry.is_empty());
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_writers() {
    let (_temp, _registry, db) = setup_temp_db();
    let db = Arc::new(db);

    let mut handles = vec![];
    for t in 0..4u32 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            let bucket = format!("bucket-{}", t);
            for i in 0..200u32 {
                let value = format!("{}-{}", t, i);
                db.set(bucket.as_bytes(), &i.to_be_bytes(), value.as_bytes()).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(db.tx(), 800);
    for t in 0..4u32 {
        let bucket = format!("bucket-{}", t);
        assert_eq!(db.len(bucket.as_bytes()).unwrap(), 200);
        let value = get(&db, bucket.as_bytes(), &199u32.to_be_bytes()).unwrap();
        assert_eq!(value, format!("{}-199", t).into_bytes());
    }
}

#[test]
fn test_concurrent_readers_and_writer() {
    let (_temp, _registry, db) = setup_temp_db();
    let db = Arc::new(db);
    for i in 0..100u32 {
        db.set(b"b", &i.to_be_bytes(), &i.to_le_bytes()).unwrap();
    }

    let writer = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for i in 100..300u32 {
                db.set(b"b", &i.to_be_bytes(), &i.to_le_bytes()).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for _ in 0..20 {
                    let entries: Vec<_> = db.all(b"b").unwrap().collect();
                    assert!(entries.len() >= 100);
                    for entry in entries {
                        let i = u32::from_be_bytes(entry.key()[..].try_into().unwrap());
                        assert_eq!(entry.value().unwrap(), i.to_le_bytes().to_vec());
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(db.len(b"b").unwrap(), 300);
}
