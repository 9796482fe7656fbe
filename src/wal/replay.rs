//! WAL replay
//!
//! Forward scan over every record of a log. The scan stops at the first
//! record that fails to decode and yields that error once; everything before
//! it has already been yielded.

use bytes::Bytes;
use parking_lot::MutexGuard;

use crate::error::{Result, TdbError};

use super::log::Wal;
use super::node::{decode_header, Node, HEADER_SIZE};
use super::pio;

/// Outcome of a full scan
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Records decoded successfully
    pub records: u64,

    /// Byte length of the valid prefix
    pub valid_len: u64,

    /// Highest transaction number among valid records
    pub last_tx: u64,

    /// Why the scan stopped early, if it did
    pub error: Option<TdbError>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }

    /// A record that runs past end of file: an interrupted append
    pub fn is_torn_tail(&self) -> bool {
        matches!(self.error, Some(TdbError::ShortBuffer { .. }))
    }
}

/// Iterator returned by `Wal::all`
pub struct Replay<'a> {
    wal: &'a Wal,
    _guard: MutexGuard<'a, ()>,
    pos: u64,
    records: u64,
    last_tx: u64,
    error: Option<TdbError>,
    done: bool,
}

impl<'a> Replay<'a> {
    pub(super) fn new(wal: &'a Wal, guard: MutexGuard<'a, ()>) -> Self {
        Self {
            wal,
            _guard: guard,
            pos: 0,
            records: 0,
            last_tx: 0,
            error: None,
            done: false,
        }
    }

    /// Offset of the next record (end of the valid prefix so far)
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Summary of the scan so far
    pub fn report(self) -> RecoveryReport {
        RecoveryReport {
            records: self.records,
            valid_len: self.pos,
            last_tx: self.last_tx,
            error: self.error,
        }
    }

    fn read_next(&mut self, end: u64) -> Result<Node> {
        let file = self.wal.shared_file().file();
        let available = (end - self.pos) as usize;

        let mut header = [0u8; HEADER_SIZE];
        let head_len = available.min(HEADER_SIZE);
        pio::read_exact_at(file, &mut header[..head_len], self.pos)?;
        let header = decode_header(&header[..head_len])?;

        let record_len = header.record_len();
        if record_len > available {
            return Err(TdbError::ShortBuffer {
                needed: record_len,
                available,
            });
        }

        let mut record = vec![0u8; record_len];
        pio::read_exact_at(file, &mut record, self.pos)?;
        let mut node = Node::decode(&Bytes::from(record))?;
        node.value_offset += self.pos;

        self.pos += record_len as u64;
        Ok(node)
    }
}

impl Iterator for Replay<'_> {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let end = self.wal.size();
        if self.pos >= end {
            return None;
        }

        match self.read_next(end) {
            Ok(node) => {
                self.records += 1;
                self.last_tx = self.last_tx.max(node.tx);
                Some(Ok(node))
            }
            Err(err) => {
                self.done = true;
                let reported = clone_for_report(&err);
                self.error = Some(reported);
                Some(Err(err))
            }
        }
    }
}

/// Offset of the first checksum-valid record starting after `from`.
///
/// Tells an interrupted append (nothing valid follows) apart from damage in
/// the middle of the log. Tries every byte offset of the tail.
pub(super) fn find_record_after(wal: &Wal, from: u64) -> Result<Option<u64>> {
    let end = wal.size();
    if from.saturating_add(1) >= end {
        return Ok(None);
    }

    let mut tail = vec![0u8; (end - from) as usize];
    pio::read_exact_at(wal.shared_file().file(), &mut tail, from)?;
    let tail = Bytes::from(tail);

    let found = (1..tail.len()).find(|&start| Node::decode(&tail.slice(start..)).is_ok());
    Ok(found.map(|start| from + start as u64))
}

/// `TdbError` is not `Clone` (it wraps `io::Error`); keep an equivalent copy
/// for the report.
fn clone_for_report(err: &TdbError) -> TdbError {
    match err {
        TdbError::Io(e) => TdbError::Io(std::io::Error::new(e.kind(), e.to_string())),
        TdbError::InvalidNodeKind(k) => TdbError::InvalidNodeKind(*k),
        TdbError::InvalidChecksum { expected, actual } => TdbError::InvalidChecksum {
            expected: *expected,
            actual: *actual,
        },
        TdbError::ShortBuffer { needed, available } => TdbError::ShortBuffer {
            needed: *needed,
            available: *available,
        },
        TdbError::InvalidVarint => TdbError::InvalidVarint,
        TdbError::TrailingBytes { extra } => TdbError::TrailingBytes { extra: *extra },
        other => TdbError::Config(other.to_string()),
    }
}
