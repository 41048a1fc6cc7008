//! Record keys and the on-disk record layout.
//!
//! A record frame payload is:
//!
//! ```text
//! | record_type (1) | id (8, LE) | txid (8, LE) | payload (N) |
//! ```
//!
//! wrapped in a checksummed codec frame. The header lets `verify` check
//! that the key table points at the record it claims to.

use crate::error::{StorageError, StorageResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the record header inside a frame payload.
pub(crate) const RECORD_HEADER_SIZE: usize = 1 + 8 + 8;

/// Kind of a stored record. The engine assigns the meaning of each value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordType(pub u8);

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type:{}", self.0)
    }
}

/// Identity of a record within its type.
///
/// Named ids are compressed into numeric aliases when flushed, so the
/// key table only ever stores integers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyId {
    /// Integer id, e.g. a primary key. Must be non-negative.
    Numeric(i64),
    /// Non-integer original key.
    Named(String),
}

/// Key of a record: `(record type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Kind of record.
    pub record_type: RecordType,
    /// Id within the kind.
    pub id: KeyId,
}

impl RecordKey {
    /// Creates a key with a numeric id.
    #[must_use]
    pub const fn numeric(record_type: RecordType, id: i64) -> Self {
        Self {
            record_type,
            id: KeyId::Numeric(id),
        }
    }

    /// Creates a key with a named id.
    #[must_use]
    pub fn named(record_type: RecordType, name: impl Into<String>) -> Self {
        Self {
            record_type,
            id: KeyId::Named(name.into()),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            KeyId::Numeric(id) => write!(f, "{}/{id}", self.record_type),
            KeyId::Named(name) => write!(f, "{}/'{name}'", self.record_type),
        }
    }
}

/// Position of a frame in a storage file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    /// Offset of the first frame byte.
    pub offset: u64,
    /// Total frame length.
    pub length: u32,
}

impl FileLocation {
    /// Offset just past the frame.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// A record decoded from a frame payload.
#[derive(Debug)]
pub(crate) struct RecordView<'a> {
    pub record_type: RecordType,
    pub id: i64,
    pub txid: u64,
    pub payload: &'a [u8],
}

pub(crate) fn encode_record(record_type: RecordType, id: i64, txid: u64, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(RECORD_HEADER_SIZE + payload.len());
    buf.put_u8(record_type.0);
    buf.put_i64_le(id);
    buf.put_u64_le(txid);
    buf.put_slice(payload);
    catalogdb_codec::frame(&buf)
}

pub(crate) fn decode_record(frame: &[u8]) -> StorageResult<RecordView<'_>> {
    let body = catalogdb_codec::unframe(frame)?;
    if body.len() < RECORD_HEADER_SIZE {
        return Err(StorageError::Corrupted(format!(
            "record body of {} bytes is shorter than its header",
            body.len()
        )));
    }
    let mut header = &body[..RECORD_HEADER_SIZE];
    let record_type = RecordType(header.get_u8());
    let id = header.get_i64_le();
    let txid = header.get_u64_le();
    Ok(RecordView {
        record_type,
        id,
        txid,
        payload: &body[RECORD_HEADER_SIZE..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip() {
        let frame = encode_record(RecordType(3), 42, 9, b"body");
        let view = decode_record(&frame).unwrap();
        assert_eq!(view.record_type, RecordType(3));
        assert_eq!(view.id, 42);
        assert_eq!(view.txid, 9);
        assert_eq!(view.payload, b"body");
    }

    #[test]
    fn keys_order_by_type_then_id() {
        let a = RecordKey::numeric(RecordType(1), 10);
        let b = RecordKey::numeric(RecordType(2), 1);
        let c = RecordKey::named(RecordType(2), "schema");
        assert!(a < b);
        assert!(b < c);
        assert_eq!(c.to_string(), "type:2/'schema'");
    }

    #[test]
    fn location_end() {
        let location = FileLocation {
            offset: 100,
            length: 28,
        };
        assert_eq!(location.end(), 128);
    }
}
