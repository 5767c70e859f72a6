//! Store fixtures and read helpers.
//!
//! A [`TestStore`] owns the ledger store and tier of an in-memory segment
//! store, so a test can drop the [`SegmentStore`] and open a new one over
//! the same bytes to exercise recovery.

use crate::crash::{FaultyLedgerStore, FlakyTier};
use std::sync::Arc;
use std::time::Duration;
use streamseg_core::{
    AppendContext, Config, CoreError, CoreResult, ReadResultEntryType, SegmentId, SegmentStore,
};
use streamseg_storage::{InMemoryLedgerStore, InMemoryTier};
use tempfile::TempDir;
use uuid::Uuid;

/// Configuration suited to tests: no fsync, short future-read timeout.
pub fn test_config() -> Config {
    Config::default()
        .sync_on_append(false)
        .future_read_timeout(Duration::from_secs(5))
}

/// An in-memory store that can be reopened.
pub struct TestStore {
    /// Ledgers holding the operation log.
    pub ledgers: FaultyLedgerStore,
    /// Long-term tier.
    pub tier: Arc<FlakyTier>,
    /// Configuration used on every open.
    pub config: Config,
}

impl TestStore {
    /// Creates empty backends with [`test_config`].
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Creates empty backends with the given configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            ledgers: FaultyLedgerStore::new(InMemoryLedgerStore::new()),
            tier: Arc::new(FlakyTier::new(Arc::new(InMemoryTier::new()))),
            config,
        }
    }

    /// Opens a store over the backends.
    pub async fn try_open(&self) -> CoreResult<SegmentStore> {
        SegmentStore::open_with_backends(
            self.config.clone(),
            Arc::new(self.ledgers.clone()),
            self.tier.clone(),
        )
        .await
    }

    /// Opens a store over the backends, panicking on failure.
    pub async fn open(&self) -> SegmentStore {
        self.try_open().await.expect("Failed to open test store")
    }

    /// Simulates a process restart after a crash: clears every injected
    /// fault and opens a new store over whatever bytes were left behind.
    pub async fn restart(&self) -> CoreResult<SegmentStore> {
        self.ledgers.control().reset();
        self.tier.fail_reads(false);
        self.tier.fail_writes(false);
        self.tier.interrupt_concat(false);
        self.try_open().await
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A file-backed store in a temporary directory.
pub struct FileTestStore {
    dir: TempDir,
    /// Configuration used on every open.
    pub config: Config,
}

impl FileTestStore {
    /// Creates an empty temporary directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
            config: test_config(),
        }
    }

    /// The store directory.
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Opens the store. Any previous store must have been dropped, since it
    /// holds the directory lock.
    pub async fn open(&self) -> SegmentStore {
        SegmentStore::open(self.dir.path(), self.config.clone())
            .await
            .expect("Failed to open file store")
    }
}

impl Default for FileTestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Append context for test client `client`.
pub fn context(client: u128, event: u64) -> AppendContext {
    AppendContext::new(Uuid::from_u128(client), event)
}

/// What a read returned before it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Concatenated content of every ready entry.
    pub data: Vec<u8>,
    /// Types of the entries produced, in order.
    pub entry_types: Vec<ReadResultEntryType>,
    /// Start offsets of the entries produced, in order.
    pub offsets: Vec<u64>,
    /// The error that ended the read, if any.
    pub error: Option<String>,
}

/// Reads everything currently available from `offset`, stopping at the
/// first future entry (which is dropped) or terminal entry.
pub async fn read_available(
    store: &SegmentStore,
    segment: SegmentId,
    offset: u64,
    max_length: usize,
) -> CoreResult<ReadOutcome> {
    let mut result = store.read(segment, offset, max_length)?;
    let mut outcome = ReadOutcome {
        data: Vec::new(),
        entry_types: Vec::new(),
        offsets: Vec::new(),
        error: None,
    };
    while let Some(mut entry) = result.next_entry()? {
        outcome.entry_types.push(entry.entry_type());
        outcome.offsets.push(entry.offset());
        if entry.entry_type() == ReadResultEntryType::Future {
            break;
        }
        match entry.content().await {
            Ok(data) => outcome.data.extend_from_slice(&data),
            Err(e) => {
                outcome.error = Some(e.to_string());
                break;
            }
        }
    }
    Ok(outcome)
}

/// Reads exactly `[offset, offset + length)`, failing on anything short.
pub async fn read_exact(
    store: &SegmentStore,
    segment: SegmentId,
    offset: u64,
    length: usize,
) -> CoreResult<Vec<u8>> {
    let outcome = read_available(store, segment, offset, length).await?;
    if outcome.data.len() != length {
        return Err(CoreError::invalid_operation(format!(
            "read {} of {length} bytes: {outcome:?}",
            outcome.data.len()
        )));
    }
    Ok(outcome.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reopen_sees_previous_writes() {
        let fixture = TestStore::new();
        let store = fixture.open().await;
        let id = store.create_segment("s").await.unwrap();
        store.append(id, &b"abc"[..], context(1, 1)).await.unwrap();
        drop(store);

        let store = fixture.open().await;
        assert_eq!(store.lookup("s"), Some(id));
        assert_eq!(read_exact(&store, id, 0, 3).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn file_store_reopens() {
        let fixture = FileTestStore::new();
        let id = {
            let store = fixture.open().await;
            let id = store.create_segment("s").await.unwrap();
            store.append(id, &b"abc"[..], context(1, 1)).await.unwrap();
            id
        };
        let store = fixture.open().await;
        assert_eq!(read_exact(&store, id, 0, 3).await.unwrap(), b"abc");
    }
}
