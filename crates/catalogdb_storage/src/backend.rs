//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store underneath a [`crate::RecordStore`].
///
/// Backends are **opaque byte stores**: they know nothing about frames,
/// record keys or key tables. The record store owns all interpretation.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - bytes are never rewritten in place; only `truncate` shortens the store
/// - after `sync` returns, every appended byte survives process termination
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if the range extends past the current size or on I/O errors.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Reads `len` bytes starting at `offset` into a caller-owned buffer.
    ///
    /// The buffer is cleared first. Backends able to avoid the intermediate
    /// allocation override this.
    ///
    /// # Errors
    ///
    /// Same as [`StorageBackend::read_at`].
    fn read_into(&self, offset: u64, len: usize, buf: &mut Vec<u8>) -> StorageResult<()> {
        let data = self.read_at(offset, len)?;
        buf.clear();
        buf.extend_from_slice(&data);
        Ok(())
    }

    /// Appends data and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the offset of the next append).
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Makes data and metadata durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the store to `new_size` bytes.
    ///
    /// Used on open to cut away frames written by a commit that never
    /// published its header.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` exceeds the current size or on I/O errors.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
