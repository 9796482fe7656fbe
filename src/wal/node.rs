//! Log record codec
//!
//! A `Node` is one Set or Delete operation as it is laid out in the WAL and
//! in the compacted snapshot file.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, TdbError};

use super::varint::{get_uvarint, put_uvarint, uvarint_len};

/// Kind (1) + payload length (4) + CRC32 of payload (4)
pub const HEADER_SIZE: usize = 9;

/// Operation recorded by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    Set = 1,
    Delete = 2,
}

impl TryFrom<u8> for NodeKind {
    type Error = TdbError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(NodeKind::Set),
            2 => Ok(NodeKind::Delete),
            other => Err(TdbError::InvalidNodeKind(other)),
        }
    }
}

/// A single log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,

    /// Payload length, stamped by `encode` / read by `decode`
    pub size: u32,

    /// CRC32 (IEEE) of the payload, stamped by `encode` / read by `decode`
    pub crc: u32,

    /// Transaction number
    pub tx: u64,

    pub bucket: Bytes,
    pub key: Bytes,

    /// Present for `Set` only
    pub value: Option<Bytes>,

    /// Offset of the value bytes. Relative to the record start after
    /// `encode`/`decode`; the WAL rewrites it to an absolute file offset.
    pub value_offset: u64,

    pub value_len: u64,
}

/// Header fields of an encoded record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub kind: NodeKind,
    pub size: u32,
    pub crc: u32,
}

impl RecordHeader {
    /// Full record length including the header
    pub fn record_len(&self) -> usize {
        HEADER_SIZE + self.size as usize
    }
}

/// Layout facts about a record just appended to a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded {
    /// Total bytes appended (header + payload)
    pub len: usize,
    pub size: u32,
    pub crc: u32,
    /// Value offset relative to the record start (0 for Delete)
    pub value_offset: u64,
    pub value_len: u64,
}

impl Node {
    /// Build a Set node
    pub fn set(tx: u64, bucket: impl Into<Bytes>, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        let value = value.into();
        Self {
            kind: NodeKind::Set,
            size: 0,
            crc: 0,
            tx,
            bucket: bucket.into(),
            key: key.into(),
            value_len: value.len() as u64,
            value: Some(value),
            value_offset: 0,
        }
    }

    /// Build a Delete node
    pub fn delete(tx: u64, bucket: impl Into<Bytes>, key: impl Into<Bytes>) -> Self {
        Self {
            kind: NodeKind::Delete,
            size: 0,
            crc: 0,
            tx,
            bucket: bucket.into(),
            key: key.into(),
            value: None,
            value_offset: 0,
            value_len: 0,
        }
    }

    /// Encoded length of this node (header + payload)
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + payload_len(self.tx, &self.bucket, &self.key, self.value_slice())
    }

    /// Append this node to `buf`, stamping `size`, `crc` and the value
    /// location. Returns the number of bytes written.
    pub fn encode(&mut self, buf: &mut BytesMut) -> usize {
        let enc = encode_record(
            self.kind,
            self.tx,
            &self.bucket,
            &self.key,
            self.value_slice(),
            buf,
        );

        self.size = enc.size;
        self.crc = enc.crc;
        self.value_offset = enc.value_offset;
        self.value_len = enc.value_len;
        enc.len
    }

    fn value_slice(&self) -> Option<&[u8]> {
        match self.kind {
            NodeKind::Set => Some(self.value.as_deref().unwrap_or(&[])),
            NodeKind::Delete => None,
        }
    }

    /// Decode the record at the front of `buf`.
    ///
    /// The checksum is verified before any payload field is parsed. Bucket,
    /// key and value are zero-copy slices of `buf`.
    pub fn decode(buf: &Bytes) -> Result<Node> {
        let header = decode_header(buf)?;
        let end = header.record_len();
        if buf.len() < end {
            return Err(TdbError::ShortBuffer {
                needed: end,
                available: buf.len(),
            });
        }

        let actual = crc32fast::hash(&buf[HEADER_SIZE..end]);
        if actual != header.crc {
            return Err(TdbError::InvalidChecksum {
                expected: header.crc,
                actual,
            });
        }

        let mut pos = HEADER_SIZE;
        let (tx, n) = get_uvarint(&buf[pos..end])?;
        pos += n;
        let bucket = take_prefixed(buf, &mut pos, end)?;
        let key = take_prefixed(buf, &mut pos, end)?;

        let (value, value_offset, value_len) = match header.kind {
            NodeKind::Set => {
                let value = take_prefixed(buf, &mut pos, end)?;
                let offset = (pos - value.len()) as u64;
                let len = value.len() as u64;
                (Some(value), offset, len)
            }
            NodeKind::Delete => (None, 0, 0),
        };
        if pos != end {
            return Err(TdbError::TrailingBytes { extra: end - pos });
        }

        Ok(Node {
            kind: header.kind,
            size: header.size,
            crc: header.crc,
            tx,
            bucket,
            key,
            value,
            value_offset,
            value_len,
        })
    }
}

/// Read and validate the fixed header at the front of `buf`
pub fn decode_header(buf: &[u8]) -> Result<RecordHeader> {
    let Some(&kind) = buf.first() else {
        return Err(TdbError::ShortBuffer {
            needed: HEADER_SIZE,
            available: 0,
        });
    };
    let kind = NodeKind::try_from(kind)?;

    if buf.len() < HEADER_SIZE {
        return Err(TdbError::ShortBuffer {
            needed: HEADER_SIZE,
            available: buf.len(),
        });
    }

    let size = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
    let crc = u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);

    Ok(RecordHeader { kind, size, crc })
}

/// Append one record to `buf` without building a `Node`.
///
/// `value` must be `Some` exactly when `kind` is `Set`.
pub fn encode_record(
    kind: NodeKind,
    tx: u64,
    bucket: &[u8],
    key: &[u8],
    value: Option<&[u8]>,
    buf: &mut BytesMut,
) -> Encoded {
    let start = buf.len();
    buf.reserve(HEADER_SIZE + payload_len(tx, bucket, key, value));

    buf.put_u8(kind as u8);
    buf.put_u32_le(0); // length, backpatched below
    buf.put_u32_le(0); // crc, backpatched below

    let payload_start = buf.len();
    put_uvarint(buf, tx);
    put_uvarint(buf, bucket.len() as u64);
    buf.put_slice(bucket);
    put_uvarint(buf, key.len() as u64);
    buf.put_slice(key);

    let (value_offset, value_len) = match (kind, value) {
        (NodeKind::Set, Some(value)) => {
            put_uvarint(buf, value.len() as u64);
            let offset = (buf.len() - start) as u64;
            buf.put_slice(value);
            (offset, value.len() as u64)
        }
        (NodeKind::Set, None) => {
            put_uvarint(buf, 0);
            ((buf.len() - start) as u64, 0)
        }
        (NodeKind::Delete, _) => (0, 0),
    };

    let size = (buf.len() - payload_start) as u32;
    let crc = crc32fast::hash(&buf[payload_start..]);
    buf[start + 1..start + 5].copy_from_slice(&size.to_le_bytes());
    buf[start + 5..start + 9].copy_from_slice(&crc.to_le_bytes());

    Encoded {
        len: buf.len() - start,
        size,
        crc,
        value_offset,
        value_len,
    }
}

fn payload_len(tx: u64, bucket: &[u8], key: &[u8], value: Option<&[u8]>) -> usize {
    let mut len = uvarint_len(tx)
        + uvarint_len(bucket.len() as u64)
        + bucket.len()
        + uvarint_len(key.len() as u64)
        + key.len();
    if let Some(value) = value {
        len += uvarint_len(value.len() as u64) + value.len();
    }
    len
}

/// Read a varint length prefix followed by that many bytes
fn take_prefixed(buf: &Bytes, pos: &mut usize, end: usize) -> Result<Bytes> {
    let (len, n) = get_uvarint(&buf[*pos..end])?;
    *pos += n;

    let len = usize::try_from(len).map_err(|_| TdbError::InvalidVarint)?;
    if len > end - *pos {
        return Err(TdbError::ShortBuffer {
            needed: len,
            available: end - *pos,
        });
    }

    let out = buf.slice(*pos..*pos + len);
    *pos += len;
    Ok(out)
}
