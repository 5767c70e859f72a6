//! Fault injection for the durable medium and the long-term tier.
//!
//! [`FaultyLedgerStore`] wraps an [`InMemoryLedgerStore`] and hands out
//! ledgers that obey a shared [`FaultControl`]. Two kinds of failure are
//! simulated:
//!
//! 1. **Medium failure** - appends are rejected outright, the process keeps
//!    running and the log must stay usable.
//! 2. **Crash** - an append writes only part of its bytes and the medium
//!    then refuses everything, including the rollback. Reopening the
//!    underlying store shows what a restarted process would find.
//!
//! [`FlakyTier`] does the same for tier reads and writes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use streamseg_testkit::crash::FaultyLedgerStore;
//!
//! let faulty = FaultyLedgerStore::new(InMemoryLedgerStore::new());
//! faulty.control().crash_after(10);
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use streamseg_storage::{
    InMemoryLedgerStore, InMemoryTier, LedgerId, LedgerStore, LongTermStorage, StorageBackend,
    StorageError, StorageResult,
};

/// Switches shared by every ledger a [`FaultyLedgerStore`] hands out.
#[derive(Debug)]
pub struct FaultControl {
    fail_appends: AtomicBool,
    fail_syncs: AtomicBool,
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
}

impl Default for FaultControl {
    fn default() -> Self {
        Self {
            fail_appends: AtomicBool::new(false),
            fail_syncs: AtomicBool::new(false),
            crash_after_bytes: AtomicU64::new(u64::MAX),
            bytes_written: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
        }
    }
}

impl FaultControl {
    /// Makes every append fail without writing anything.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Makes flush and sync fail.
    pub fn fail_syncs(&self, fail: bool) {
        self.fail_syncs.store(fail, Ordering::SeqCst);
    }

    /// Crashes once `bytes` more bytes have been written. The write that
    /// crosses the threshold lands partially.
    pub fn crash_after(&self, bytes: u64) {
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Clears every fault.
    pub fn reset(&self) {
        self.fail_appends.store(false, Ordering::SeqCst);
        self.fail_syncs.store(false, Ordering::SeqCst);
        self.crash_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Returns whether a simulated crash has happened.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(simulated("medium is gone after simulated crash"));
        }
        Ok(())
    }
}

fn simulated(message: &str) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, message))
}

/// A ledger that consults a [`FaultControl`] before touching its bytes.
pub struct FaultyBackend {
    inner: Box<dyn StorageBackend>,
    control: Arc<FaultControl>,
}

impl FaultyBackend {
    /// Wraps `inner`.
    pub fn new(inner: Box<dyn StorageBackend>, control: Arc<FaultControl>) -> Self {
        Self { inner, control }
    }
}

impl StorageBackend for FaultyBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.control.check_alive()?;
        if self.control.fail_appends.load(Ordering::SeqCst) {
            return Err(simulated("simulated append failure"));
        }

        let len = data.len() as u64;
        let written = self.control.bytes_written.fetch_add(len, Ordering::SeqCst);
        let threshold = self.control.crash_after_bytes.load(Ordering::SeqCst);
        if written + len > threshold {
            self.control.crashed.store(true, Ordering::SeqCst);
            let partial = threshold.saturating_sub(written) as usize;
            if partial > 0 {
                let _ = self.inner.append(&data[..partial]);
            }
            return Err(simulated("simulated crash during write"));
        }

        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.control.check_alive()?;
        if self.control.fail_syncs.load(Ordering::SeqCst) {
            return Err(simulated("simulated flush failure"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.control.check_alive()?;
        if self.control.fail_syncs.load(Ordering::SeqCst) {
            return Err(simulated("simulated sync failure"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.control.check_alive()?;
        self.inner.truncate(new_size)
    }
}

/// A ledger store whose ledgers can be made to fail.
#[derive(Debug, Clone)]
pub struct FaultyLedgerStore {
    inner: InMemoryLedgerStore,
    control: Arc<FaultControl>,
}

impl FaultyLedgerStore {
    /// Wraps `inner`. The wrapped store keeps the bytes, so it can be
    /// reopened without faults after a simulated crash.
    pub fn new(inner: InMemoryLedgerStore) -> Self {
        Self {
            inner,
            control: Arc::new(FaultControl::default()),
        }
    }

    /// The shared fault switches.
    pub fn control(&self) -> &FaultControl {
        &self.control
    }

    /// The wrapped store.
    pub fn inner(&self) -> &InMemoryLedgerStore {
        &self.inner
    }

    fn wrap(&self, backend: Box<dyn StorageBackend>) -> Box<dyn StorageBackend> {
        Box::new(FaultyBackend::new(backend, Arc::clone(&self.control)))
    }
}

impl LedgerStore for FaultyLedgerStore {
    fn create(&self, id: LedgerId) -> StorageResult<Box<dyn StorageBackend>> {
        self.control.check_alive()?;
        self.inner.create(id).map(|b| self.wrap(b))
    }

    fn open(&self, id: LedgerId) -> StorageResult<Box<dyn StorageBackend>> {
        self.inner.open(id).map(|b| self.wrap(b))
    }

    fn list(&self) -> StorageResult<Vec<LedgerId>> {
        self.inner.list()
    }

    fn delete(&self, id: LedgerId) -> StorageResult<()> {
        self.control.check_alive()?;
        self.inner.delete(id)
    }
}

/// A tier whose reads and writes can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyTier {
    inner: Arc<InMemoryTier>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    interrupt_concat: AtomicBool,
}

impl FlakyTier {
    /// Wraps `inner`.
    pub fn new(inner: Arc<InMemoryTier>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            interrupt_concat: AtomicBool::new(false),
        }
    }

    /// Makes reads fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes writes and concatenations fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes concatenations extend the target and then fail before the
    /// source is removed, as if the process died in between.
    pub fn interrupt_concat(&self, interrupt: bool) {
        self.interrupt_concat.store(interrupt, Ordering::SeqCst);
    }

    /// The wrapped tier.
    pub fn inner(&self) -> &InMemoryTier {
        &self.inner
    }
}

#[async_trait]
impl LongTermStorage for FlakyTier {
    async fn read(&self, name: &str, offset: u64, len: usize) -> StorageResult<Bytes> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(simulated("simulated tier read failure"));
        }
        self.inner.read(name, offset, len).await
    }

    async fn write(&self, name: &str, offset: u64, data: &[u8]) -> StorageResult<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(simulated("simulated tier write failure"));
        }
        self.inner.write(name, offset, data).await
    }

    async fn concat(&self, target: &str, source: &str) -> StorageResult<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(simulated("simulated tier concat failure"));
        }
        if self.interrupt_concat.load(Ordering::SeqCst) {
            let data = self
                .inner
                .contents(source)
                .ok_or_else(|| StorageError::not_found(source))?;
            let end = self.inner.length(target).await?.unwrap_or(0);
            self.inner.write(target, end, &data).await?;
            return Err(simulated("simulated crash inside tier concat"));
        }
        self.inner.concat(target, source).await
    }

    async fn length(&self, name: &str) -> StorageResult<Option<u64>> {
        self.inner.length(name).await
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        self.inner.delete(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_failure_writes_nothing() {
        let store = FaultyLedgerStore::new(InMemoryLedgerStore::new());
        let mut ledger = store.create(1).unwrap();
        store.control().fail_appends(true);
        assert!(ledger.append(b"abc").is_err());
        assert_eq!(ledger.size().unwrap(), 0);

        store.control().fail_appends(false);
        ledger.append(b"abc").unwrap();
        assert_eq!(ledger.size().unwrap(), 3);
    }

    #[test]
    fn crash_leaves_partial_write() {
        let store = FaultyLedgerStore::new(InMemoryLedgerStore::new());
        let mut ledger = store.create(1).unwrap();
        store.control().crash_after(5);
        ledger.append(b"abc").unwrap();
        assert!(ledger.append(b"defg").is_err());
        assert!(store.control().has_crashed());
        assert!(ledger.truncate(3).is_err());

        let survivor = store.inner().open(1).unwrap();
        assert_eq!(survivor.read_at(0, 5).unwrap(), b"abcde");
    }
}
