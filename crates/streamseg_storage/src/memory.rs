//! Ledger bytes held in process memory.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A medium whose bytes live in a shared buffer.
///
/// Handles made with [`share`](Self::share) (and the ones
/// [`InMemoryLedgerStore`](crate::InMemoryLedgerStore) hands out) all point
/// at one buffer, so a log can be dropped and reopened over the bytes it
/// left behind.
///
/// ```rust
/// use streamseg_storage::{InMemoryBackend, StorageBackend};
///
/// let mut ledger = InMemoryBackend::new();
/// let reopened = ledger.share();
/// ledger.append(b"frame").unwrap();
/// assert_eq!(reopened.read_all().unwrap(), b"frame");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// An empty medium.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A medium that already holds `bytes`, as if left by an earlier run.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    /// A second handle onto the same buffer.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            bytes: Arc::clone(&self.bytes),
        }
    }

    /// Snapshot of the buffer.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Replaces the byte at `offset`; out-of-range offsets are ignored.
    pub fn corrupt_byte(&self, offset: usize, value: u8) {
        if let Some(byte) = self.bytes.write().get_mut(offset) {
            *byte = value;
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.write();
        let at = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(at)
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        let size = bytes.len() as u64;
        usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(len)?))
            .and_then(|range| bytes.get(range))
            .map(<[u8]>::to_vec)
            .ok_or(StorageError::ReadPastEnd { offset, len, size })
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut bytes = self.bytes.write();
        match usize::try_from(new_size) {
            Ok(keep) if keep <= bytes.len() => {
                bytes.truncate(keep);
                Ok(())
            }
            _ => Err(StorageError::invalid_input(format!(
                "cannot grow a {}-byte ledger to {new_size} by truncation",
                bytes.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_are_laid_out_back_to_back() {
        let mut ledger = InMemoryBackend::new();
        assert_eq!(ledger.append(b"SSLG").unwrap(), 0);
        assert_eq!(ledger.append(b"frame").unwrap(), 4);
        assert_eq!(ledger.read_all().unwrap(), b"SSLGframe");
    }

    #[test]
    fn reads_must_stay_inside_written_bytes() {
        let ledger = InMemoryBackend::with_data(b"abcde".to_vec());
        assert_eq!(ledger.read_at(1, 4).unwrap(), b"bcde");
        assert!(matches!(
            ledger.read_at(2, 4),
            Err(StorageError::ReadPastEnd { size: 5, .. })
        ));
        assert!(ledger.read_at(u64::MAX, 1).is_err());
    }

    #[test]
    fn truncation_only_shrinks() {
        let mut ledger = InMemoryBackend::with_data(b"complete|torn".to_vec());
        ledger.truncate(8).unwrap();
        assert_eq!(ledger.data(), b"complete");
        assert!(ledger.truncate(9).is_err());
    }

    #[test]
    fn reopened_handle_keeps_bytes() {
        let mut writer = InMemoryBackend::new();
        let reader = writer.share();
        writer.append(b"durable").unwrap();
        drop(writer);
        assert_eq!(reader.size().unwrap(), 7);
    }

    #[test]
    fn corrupt_byte_ignores_out_of_range() {
        let ledger = InMemoryBackend::with_data(vec![1, 2, 3]);
        ledger.corrupt_byte(1, 0xFF);
        ledger.corrupt_byte(10, 0xFF);
        assert_eq!(ledger.data(), vec![1, 0xFF, 3]);
    }
}
