//! Tests for the log record codec
//!
//! These tests verify:
//! - Set and Delete nodes encode to the documented layout
//! - Value offsets point at the value bytes inside the record
//! - Corruption is reported (kind, checksum, short buffer) before parsing
//! - A checksum-valid payload with unparsed bytes left over is rejected

use bytes::{Bytes, BytesMut};
use tdb::wal::{decode_header, encode_record, Node, NodeKind, HEADER_SIZE};
use tdb::TdbError;

// =============================================================================
// Helper Functions
// =============================================================================

fn encode(node: &mut Node) -> Bytes {
    let mut buf = BytesMut::new();
    node.encode(&mut buf);
    buf.freeze()
}

/// Append `extra` to the payload of an encoded record, keeping the
/// length field and checksum consistent
fn with_extra_payload(record: &[u8], extra: &[u8]) -> Bytes {
    let mut bytes = record.to_vec();
    bytes.extend_from_slice(extra);
    let payload_len = (bytes.len() - HEADER_SIZE) as u32;
    bytes[1..5].copy_from_slice(&payload_len.to_le_bytes());
    let crc = crc32fast::hash(&bytes[HEADER_SIZE..]);
    bytes[5..9].copy_from_slice(&crc.to_le_bytes());
    Bytes::from(bytes)
}

fn sample_set() -> Node {
    Node::set(
        7,
        Bytes::from_static(b"users"),
        Bytes::from_static(b"alice"),
        Bytes::from_static(b"hello world"),
    )
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_set_layout() {
    let mut node = sample_set();
    let bytes = encode(&mut node);

    assert_eq!(bytes[0], 1);
    let size = u32::from_le_bytes(bytes[1..5].try_into().unwrap());
    let crc = u32::from_le_bytes(bytes[5..9].try_into().unwrap());
    assert_eq!(size as usize, bytes.len() - HEADER_SIZE);
    assert_eq!(crc, crc32fast::hash(&bytes[HEADER_SIZE..]));

    // tx, bucket_len, bucket, key_len, key, value_len, value
    let payload = &bytes[HEADER_SIZE..];
    assert_eq!(payload[0], 7);
    assert_eq!(payload[1], 5);
    assert_eq!(&payload[2..7], b"users");
    assert_eq!(payload[7], 5);
    assert_eq!(&payload[8..13], b"alice");
    assert_eq!(payload[13], 11);
    assert_eq!(&payload[14..], b"hello world");

    assert_eq!(node.size, size);
    assert_eq!(node.crc, crc);
    assert_eq!(node.encoded_len(), bytes.len());
}

#[test]
fn test_delete_has_no_value() {
    let mut node = Node::delete(3, Bytes::from_static(b"b"), Bytes::from_static(b"k"));
    let bytes = encode(&mut node);

    assert_eq!(bytes[0], 2);
    // tx + bucket_len + "b" + key_len + "k"
    assert_eq!(bytes.len(), HEADER_SIZE + 5);
    assert_eq!(node.encoded_len(), bytes.len());
    assert_eq!(node.value_len, 0);
}

#[test]
fn test_value_offset_points_at_value() {
    let mut node = sample_set();
    let bytes = encode(&mut node);

    let start = node.value_offset as usize;
    let end = start + node.value_len as usize;
    assert_eq!(&bytes[start..end], b"hello world");
}

#[test]
fn test_encode_record_appends_after_existing_bytes() {
    let mut buf = BytesMut::from(&b"prefix"[..]);
    let enc = encode_record(NodeKind::Set, 1, b"b", b"k", Some(&b"v"[..]), &mut buf);

    assert_eq!(buf.len(), 6 + enc.len);
    let record = Bytes::copy_from_slice(&buf[6..]);
    let node = Node::decode(&record).unwrap();
    assert_eq!(node.value.as_deref(), Some(&b"v"[..]));
    assert_eq!(enc.value_offset, node.value_offset);
    assert_eq!(enc.crc, node.crc);
}

// =============================================================================
// Decode Tests
// =============================================================================

#[test]
fn test_decode_set() {
    let mut node = sample_set();
    let bytes = encode(&mut node);

    let decoded = Node::decode(&bytes).unwrap();

    assert_eq!(decoded, node);
    assert_eq!(decoded.kind, NodeKind::Set);
    assert_eq!(decoded.tx, 7);
    assert_eq!(&decoded.bucket[..], b"users");
    assert_eq!(&decoded.key[..], b"alice");
}

#[test]
fn test_decode_delete() {
    let mut node = Node::delete(u64::MAX, Bytes::from_static(b"bucket"), Bytes::from_static(b"key"));
    let bytes = encode(&mut node);

    let decoded = Node::decode(&bytes).unwrap();

    assert_eq!(decoded.kind, NodeKind::Delete);
    assert_eq!(decoded.tx, u64::MAX);
    assert!(decoded.value.is_none());
}

#[test]
fn test_empty_bucket_key_and_value() {
    let mut node = Node::set(1, Bytes::new(), Bytes::new(), Bytes::new());
    let bytes = encode(&mut node);

    let decoded = Node::decode(&bytes).unwrap();

    assert!(decoded.bucket.is_empty());
    assert!(decoded.key.is_empty());
    assert_eq!(decoded.value.as_deref(), Some(&b""[..]));
    assert_eq!(decoded.value_len, 0);
}

#[test]
fn test_large_value() {
    let value = vec![0xabu8; 40 * 1024];
    let mut node = Node::set(9, Bytes::from_static(b"b"), Bytes::from_static(b"k"), value.clone());
    let bytes = encode(&mut node);

    let decoded = Node::decode(&bytes).unwrap();

    assert_eq!(decoded.value.as_deref(), Some(value.as_slice()));
    assert_eq!(decoded.value_len, value.len() as u64);
}

#[test]
fn test_decode_ignores_trailing_bytes() {
    let mut first = sample_set();
    let mut second = Node::delete(8, Bytes::from_static(b"users"), Bytes::from_static(b"alice"));
    let mut buf = BytesMut::new();
    first.encode(&mut buf);
    second.encode(&mut buf);
    let bytes = buf.freeze();

    let decoded = Node::decode(&bytes).unwrap();
    assert_eq!(decoded.tx, 7);

    let rest = bytes.slice(decoded.encoded_len()..);
    assert_eq!(Node::decode(&rest).unwrap().tx, 8);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_invalid_kind() {
    let mut node = sample_set();
    let mut bytes = encode(&mut node).to_vec();
    bytes[0] = 9;

    let err = Node::decode(&Bytes::from(bytes)).unwrap_err();

    assert!(matches!(err, TdbError::InvalidNodeKind(9)));
    assert!(err.is_corruption());
}

#[test]
fn test_checksum_mismatch() {
    let mut node = sample_set();
    let mut bytes = encode(&mut node).to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;

    let err = Node::decode(&Bytes::from(bytes)).unwrap_err();

    assert!(matches!(err, TdbError::InvalidChecksum { .. }));
    assert!(err.is_corruption());
}

#[test]
fn test_corrupt_length_field_fails_checksum_first() {
    // A bucket length claiming more bytes than the payload holds is caught
    // by the checksum, never by parsing
    let mut node = sample_set();
    let mut bytes = encode(&mut node).to_vec();
    bytes[HEADER_SIZE + 1] = 0x7f;

    let err = Node::decode(&Bytes::from(bytes)).unwrap_err();

    assert!(matches!(err, TdbError::InvalidChecksum { .. }));
}

#[test]
fn test_unparsed_payload_bytes_rejected() {
    let mut set = sample_set();
    let bytes = with_extra_payload(&encode(&mut set), &[0xab, 0xcd]);

    let err = Node::decode(&bytes).unwrap_err();

    assert!(matches!(err, TdbError::TrailingBytes { extra: 2 }));
    assert!(err.is_corruption());

    let mut delete = Node::delete(3, Bytes::from_static(b"b"), Bytes::from_static(b"k"));
    let bytes = with_extra_payload(&encode(&mut delete), &[0]);
    let err = Node::decode(&bytes).unwrap_err();
    assert!(matches!(err, TdbError::TrailingBytes { extra: 1 }));
}

#[test]
fn test_truncated_record_is_short_buffer() {
    let mut node = sample_set();
    let bytes = encode(&mut node);

    for cut in [1, 5, HEADER_SIZE, bytes.len() - 1] {
        let err = Node::decode(&bytes.slice(..cut)).unwrap_err();
        assert!(
            matches!(err, TdbError::ShortBuffer { .. }),
            "cut at {} gave {:?}",
            cut,
            err
        );
    }
}

#[test]
fn test_empty_buffer_is_short_buffer() {
    let err = Node::decode(&Bytes::new()).unwrap_err();
    assert!(matches!(err, TdbError::ShortBuffer { available: 0, .. }));
}

#[test]
fn test_decode_header_reports_record_len() {
    let mut node = sample_set();
    let bytes = encode(&mut node);

    let header = decode_header(&bytes).unwrap();

    assert_eq!(header.kind, NodeKind::Set);
    assert_eq!(header.record_len(), bytes.len());
}
