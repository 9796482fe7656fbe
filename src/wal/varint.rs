//! Unsigned varints
//!
//! LEB128: 7 bits per byte, least significant group first, high bit set on
//! every byte except the last. A u64 needs at most 10 bytes.

use bytes::BufMut;

use crate::error::{Result, TdbError};

/// Longest encoding of a u64
pub const MAX_VARINT_LEN: usize = 10;

/// Append `value` to `buf`
pub fn put_uvarint<B: BufMut>(buf: &mut B, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Decode a varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn get_uvarint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(TdbError::InvalidVarint);
        }
        if byte < 0x80 {
            // The tenth byte may only carry the top bit of a u64
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(TdbError::InvalidVarint);
            }
            return Ok((value | (byte as u64) << shift, i + 1));
        }
        value |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
    }

    Err(TdbError::ShortBuffer {
        needed: buf.len() + 1,
        available: buf.len(),
    })
}

/// Number of bytes `value` occupies when encoded
pub fn uvarint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}
