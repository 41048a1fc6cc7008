//! Error types for storage operations.

use catalogdb_codec::CodecError;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A frame or key table failed to decode.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The record found at a location belongs to a different key.
    #[error("record key mismatch at offset {offset}")]
    KeyMismatch {
        /// Offset of the offending record.
        offset: u64,
    },

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}
