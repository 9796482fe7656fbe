//! Write-Ahead Log (WAL) Module
//!
//! Provides durability through append-only logging. The compacted snapshot
//! file uses the same record format and is read and written with the same
//! `Wal` type.
//!
//! ## Responsibilities
//! - Append Set/Delete records with a monotonically increasing tx number
//! - CRC32 checksums for corruption detection
//! - Hand out value pointers into already-written regions
//! - Full sequential replay for crash recovery
//!
//! ## Record Format (little-endian)
//! ```text
//! ┌──────────┬───────────────┬─────────────┬──────────────────────────────┐
//! │ Kind (1) │ PayloadLen (4)│ CRC32 (4)   │ Payload                      │
//! └──────────┴───────────────┴─────────────┴──────────────────────────────┘
//!
//! Payload:
//!   uvarint tx
//!   uvarint bucket_len, bucket
//!   uvarint key_len,    key
//!   uvarint value_len,  value      (Set only)
//! ```
//! Kind: 1 = Set, 2 = Delete. The CRC covers the payload only.

mod log;
mod node;
pub(crate) mod pio;
mod replay;
mod varint;

pub use log::Wal;
pub use node::{decode_header, encode_record, Encoded, Node, NodeKind, RecordHeader, HEADER_SIZE};
pub use replay::{RecoveryReport, Replay};
pub use varint::{get_uvarint, put_uvarint, uvarint_len, MAX_VARINT_LEN};
