//! The durable medium underneath one log ledger.

use crate::error::StorageResult;

/// Append-only bytes that survive a process restart once flushed.
///
/// A ledger of the operation log is exactly one medium. The medium never
/// looks at what it stores: frame boundaries, checksums and sequence
/// numbers are the log's business. The only in-place change it allows is
/// cutting bytes off the end, which the log uses to drop a torn frame on
/// open and to undo a frame whose write failed.
///
/// After `flush` (or `sync`) returns, everything appended before the call
/// must be readable by the next process that opens the same ledger.
pub trait StorageBackend: Send + Sync {
    /// Number of bytes held; the next `append` lands here.
    ///
    /// # Errors
    ///
    /// Fails if the medium cannot be queried.
    fn size(&self) -> StorageResult<u64>;

    /// Adds `data` at the end and returns the offset it starts at.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors. Part of `data` may have been written.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns exactly `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd)
    /// if the range is not fully written.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Makes previous appends durable.
    ///
    /// # Errors
    ///
    /// Fails if the medium could not persist the data.
    fn flush(&mut self) -> StorageResult<()>;

    /// Like [`flush`](Self::flush), and also persists the medium's own
    /// metadata (file length and the like).
    ///
    /// # Errors
    ///
    /// Fails if the medium could not persist the data.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the medium back to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` is larger than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole medium.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`size`](Self::size) and
    /// [`read_at`](Self::read_at).
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            crate::StorageError::invalid_input(format!("{size} bytes do not fit in memory"))
        })?;
        self.read_at(0, len)
    }
}
