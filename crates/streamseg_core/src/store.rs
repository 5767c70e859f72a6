//! The segment store.
//!
//! [`SegmentStore`] ties the pieces together. Every mutation goes through
//! one sequencer:
//!
//! 1. validate against the current segment state,
//! 2. resolve late-bound fields (append offset, seal and merge lengths),
//! 3. append to the durable log,
//! 4. place appended bytes in the cache,
//! 5. apply to the segment state,
//! 6. wake future reads.
//!
//! A caller is answered only after step 5, so an acknowledged write is both
//! durable and visible to reads.

use crate::cache::{CacheStats, ReadCache};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::log::DurableLog;
use crate::operation::{
    AppendIntent, BatchMapOperation, MergeBatchIntent, MetadataCheckpointOperation, Operation,
    SealIntent, TruncateSegmentOperation,
};
use crate::read::{FutureReadRegistry, ReadIndex, ReadResult};
use crate::recovery::{self, RecoveryStats};
use crate::state::{segment_map, SegmentState, SegmentStateTable};
use crate::storage_writer::{FlushStats, StorageWriter};
use crate::types::{AppendContext, SegmentId, SequenceNumber};
use bytes::Bytes;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use streamseg_storage::{
    FileLedgerStore, FileTier, InMemoryLedgerStore, InMemoryTier, LedgerStore, LongTermStorage,
};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bookkeeping owned by the write sequencer.
#[derive(Debug, Default)]
struct Sequencer {
    ops_since_checkpoint: u64,
}

/// A container of stream segments backed by an operation log and a
/// long-term storage tier.
pub struct SegmentStore {
    config: Config,
    log: DurableLog,
    index: Arc<ReadIndex>,
    writer: StorageWriter,
    sequencer: Mutex<Sequencer>,
    admission: Semaphore,
    flush_lock: Mutex<()>,
    recovery: RecoveryStats,
}

impl SegmentStore {
    /// Opens a store in a directory, with the log under `log/` and the tier
    /// under `tier/`.
    ///
    /// # Errors
    ///
    /// Fails if the directory is locked by another process, or if recovery
    /// finds a corrupt log.
    pub async fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let ledgers = Arc::new(FileLedgerStore::open(&path.join("log"))?);
        let tier = Arc::new(FileTier::open(&path.join("tier"))?);
        Self::open_with_backends(config, ledgers, tier).await
    }

    /// Opens a store that keeps everything in memory.
    ///
    /// # Errors
    ///
    /// Fails only if called outside a Tokio runtime.
    pub async fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backends(
            Config::default(),
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryTier::new()),
        )
        .await
    }

    /// Opens a store over the given ledger store and tier, replaying the
    /// log.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped recovery, if any.
    pub async fn open_with_backends(
        config: Config,
        ledgers: Arc<dyn LedgerStore>,
        tier: Arc<dyn LongTermStorage>,
    ) -> CoreResult<Self> {
        let log = DurableLog::open(ledgers, &config)?;
        let cache = Arc::new(ReadCache::new(config.cache_max_size));
        let (table, recovery) = recovery::recover(&log, tier.as_ref(), &cache).await?;

        let state = Arc::new(RwLock::new(table));
        let index = Arc::new(ReadIndex::new(
            Arc::clone(&state),
            Arc::clone(&cache),
            Arc::clone(&tier),
            Arc::new(FutureReadRegistry::new()),
            config.future_read_timeout,
            config.max_storage_read_size,
        )?);
        let writer = StorageWriter::new(state, cache, tier);

        Ok(Self {
            admission: Semaphore::new(config.max_concurrent_appends.max(1)),
            config,
            log,
            index,
            writer,
            sequencer: Mutex::new(Sequencer::default()),
            flush_lock: Mutex::new(()),
            recovery,
        })
    }

    /// Creates a segment and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentExists`] if the name is taken.
    pub async fn create_segment(&self, name: &str) -> CoreResult<SegmentId> {
        let op = self
            .execute(|table| Ok(Operation::SegmentMap(segment_map(table, name))))
            .await?;
        let id = op.segment_id().ok_or(CoreError::Closed)?;
        info!(segment = %id, name, "segment created");
        Ok(id)
    }

    /// Creates a batch segment owned by `parent` and returns its id.
    ///
    /// The batch is named after its parent plus a random suffix.
    ///
    /// # Errors
    ///
    /// Fails if the parent is missing, sealed, merged, or itself a batch.
    pub async fn create_batch(&self, parent: SegmentId) -> CoreResult<SegmentId> {
        let op = self
            .execute(|table| {
                let parent_state = table.require(parent)?;
                Ok(Operation::BatchMap(BatchMapOperation {
                    batch_segment_id: table.next_segment_id(),
                    name: format!("{}#batch.{}", parent_state.name, Uuid::new_v4().simple()),
                    parent_segment_id: parent,
                }))
            })
            .await?;
        let id = op.segment_id().ok_or(CoreError::Closed)?;
        debug!(segment = %id, %parent, "batch created");
        Ok(id)
    }

    /// Appends `data` to the end of a segment and returns the offset it was
    /// written at.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SegmentSealed`] / [`CoreError::SegmentMerged`] if the
    ///   segment no longer accepts appends.
    /// - [`CoreError::DurableMediumFailure`] if the log could not persist the
    ///   append; nothing was applied and the call can be retried.
    pub async fn append(
        &self,
        segment: SegmentId,
        data: impl Into<Bytes>,
        context: AppendContext,
    ) -> CoreResult<u64> {
        let _permit = self.admission.acquire().await.map_err(|_| CoreError::Closed)?;
        let intent = AppendIntent::new(segment, data, context);
        let op = self
            .execute(|table| Ok(intent.resolve(table.require(segment)?.length).into()))
            .await?;
        match op {
            Operation::Append(append) => Ok(append.offset()),
            _ => Err(CoreError::Closed),
        }
    }

    /// Reads up to `max_length` bytes starting at `offset`.
    ///
    /// The returned [`ReadResult`] produces entries lazily; see its docs.
    /// Reading at exactly the segment length waits for the next append.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SegmentNotFound`] / [`CoreError::SegmentMerged`].
    /// - [`CoreError::InvalidOperation`] if `offset` is past the segment
    ///   length.
    pub fn read(&self, segment: SegmentId, offset: u64, max_length: usize) -> CoreResult<ReadResult> {
        {
            let table = self.index.state.read();
            let state = table.require(segment)?;
            if state.merged {
                return Err(CoreError::SegmentMerged(segment));
            }
            if offset > state.length {
                return Err(CoreError::invalid_operation(format!(
                    "read of {segment} at offset {offset} past length {}",
                    state.length
                )));
            }
        }
        Ok(ReadResult::new(
            Arc::clone(&self.index),
            segment,
            offset,
            max_length,
        ))
    }

    /// Seals a segment and returns its final length.
    ///
    /// Pending future reads at the end of the segment fail with
    /// [`CoreError::EndOfSegment`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentSealed`] if it is already sealed.
    pub async fn seal(&self, segment: SegmentId) -> CoreResult<u64> {
        let op = self
            .execute(|table| {
                Ok(SealIntent::new(segment)
                    .resolve(table.require(segment)?.length)
                    .into())
            })
            .await?;
        match op {
            Operation::Seal(seal) => {
                info!(%segment, length = seal.length(), "segment sealed");
                Ok(seal.length())
            }
            _ => Err(CoreError::Closed),
        }
    }

    /// Merges a sealed batch into the end of its parent and returns the
    /// parent offset the batch now starts at.
    ///
    /// The merged bytes are readable through the parent immediately. The
    /// batch stops accepting reads.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SegmentNotSealed`] if the batch is still open.
    /// - [`CoreError::SegmentSealed`] if the parent is sealed.
    /// - [`CoreError::SegmentMerged`] if the batch was already merged.
    pub async fn merge_batch(&self, batch: SegmentId, parent: SegmentId) -> CoreResult<u64> {
        let op = self
            .execute(|table| {
                let length = table.require(batch)?.length;
                let parent_offset = table.require(parent)?.length;
                Ok(MergeBatchIntent::new(batch, parent)
                    .resolve(length, parent_offset)
                    .into())
            })
            .await?;
        match op {
            Operation::MergeBatch(merge) => {
                info!(
                    %batch,
                    %parent,
                    offset = merge.parent_offset(),
                    length = merge.length(),
                    "batch merged"
                );
                Ok(merge.parent_offset())
            }
            _ => Err(CoreError::Closed),
        }
    }

    /// Makes every offset before `offset` unreadable.
    ///
    /// # Errors
    ///
    /// Fails if `offset` is before the current start offset or past the
    /// segment length.
    pub async fn truncate_segment(&self, segment: SegmentId, offset: u64) -> CoreResult<()> {
        self.execute(|_| {
            Ok(Operation::TruncateSegment(TruncateSegmentOperation {
                segment_id: segment,
                offset,
            }))
        })
        .await?;
        debug!(%segment, offset, "segment truncated");
        Ok(())
    }

    /// Returns a snapshot of a segment's state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentNotFound`] for unknown ids, including
    /// batches whose merge has been finished in the tier.
    pub fn segment_info(&self, segment: SegmentId) -> CoreResult<SegmentState> {
        self.index.state.read().require(segment).cloned()
    }

    /// Finds a segment by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<SegmentId> {
        self.index.state.read().lookup(name)
    }

    /// Last event number appended to `segment` by `client`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentNotFound`] for unknown ids.
    pub fn last_event_number(&self, segment: SegmentId, client: &Uuid) -> CoreResult<Option<u64>> {
        Ok(self
            .index
            .state
            .read()
            .require(segment)?
            .last_event_number(client))
    }

    /// Writes all unflushed data to the tier and finishes ready merges.
    ///
    /// # Errors
    ///
    /// Returns the tier error that stopped the flush. Progress made before
    /// the error is kept.
    pub async fn flush_to_storage(&self) -> CoreResult<FlushStats> {
        let _flush = self.flush_lock.lock().await;
        self.writer.flush().await
    }

    /// Flushes to the tier and logs a checkpoint of the segment state.
    ///
    /// Returns the checkpoint's sequence number. Records before it can then
    /// be dropped with [`truncate_log`](Self::truncate_log).
    ///
    /// # Errors
    ///
    /// Fails if the flush or the log append fails, or if the flush left
    /// any segment with unflushed bytes or an unfinished merge.
    pub async fn checkpoint(&self) -> CoreResult<SequenceNumber> {
        let mut sequencer = self.sequencer.lock().await;
        self.checkpoint_locked(&mut sequencer).await
    }

    /// Drops every log record before the newest checkpoint.
    ///
    /// Returns the last dropped sequence number, or `None` if there was
    /// nothing to drop.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a ledger cannot be deleted.
    pub async fn truncate_log(&self) -> CoreResult<Option<SequenceNumber>> {
        let _sequencer = self.sequencer.lock().await;
        let Some(checkpoint) = self.log.latest_checkpoint() else {
            return Ok(None);
        };
        let first = self.log.ledgers().iter().find_map(|l| l.first);
        if first.map_or(true, |first| first >= checkpoint) {
            return Ok(None);
        }
        let upto = checkpoint.prev();
        self.log.truncate(upto)?;
        Ok(Some(upto))
    }

    /// The store's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying operation log.
    #[must_use]
    pub fn log(&self) -> &DurableLog {
        &self.log
    }

    /// What recovery did when the store was opened.
    #[must_use]
    pub fn recovery_stats(&self) -> RecoveryStats {
        self.recovery
    }

    /// Current cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.index.cache.stats()
    }

    /// Number of reads waiting for data that has not been appended yet.
    #[must_use]
    pub fn pending_future_reads(&self) -> usize {
        self.index.futures.len()
    }

    /// Runs one mutation through the sequencer.
    async fn execute<F>(&self, build: F) -> CoreResult<Operation>
    where
        F: FnOnce(&SegmentStateTable) -> CoreResult<Operation>,
    {
        let mut sequencer = self.sequencer.lock().await;
        let op = {
            let table = self.index.state.read();
            let op = build(&table)?;
            table.validate(&op)?;
            op
        };

        let seq = self.log.append(&op)?;
        if let Operation::Append(append) = &op {
            self.index
                .cache
                .put(append.segment_id(), append.offset(), append.data().clone());
        }
        self.index.state.write().apply(&op)?;
        self.after_apply(&op);
        debug!(sequence = seq.as_u64(), operation = op.operation_type().name(), "applied");

        sequencer.ops_since_checkpoint += 1;
        let every = self.config.checkpoint_every_ops;
        if every > 0 && sequencer.ops_since_checkpoint >= every {
            // The operation is already durable and applied; a failed
            // checkpoint is retried after the next operation.
            if let Err(e) = self.checkpoint_locked(&mut sequencer).await {
                warn!(error = %e, "automatic checkpoint failed");
            }
        }
        Ok(op)
    }

    fn after_apply(&self, op: &Operation) {
        let futures = &self.index.futures;
        match op {
            Operation::Append(append) => {
                futures.notify_append(append.segment_id(), append.offset() + append.len());
            }
            Operation::Seal(seal) => futures.notify_sealed(seal.segment_id()),
            Operation::MergeBatch(merge) => {
                futures.notify_append(
                    merge.parent_segment_id(),
                    merge.parent_offset() + merge.length(),
                );
                futures.notify_merged(merge.batch_segment_id());
            }
            Operation::TruncateSegment(truncate) => {
                let table = self.index.state.read();
                if let Some(state) = table.get(truncate.segment_id) {
                    self.index.cache.truncate_before(
                        truncate.segment_id,
                        truncate.offset.min(state.storage_length),
                    );
                }
            }
            Operation::MetadataCheckpoint(_) | Operation::SegmentMap(_) | Operation::BatchMap(_) => {}
        }
    }

    async fn checkpoint_locked(&self, sequencer: &mut Sequencer) -> CoreResult<SequenceNumber> {
        let stats = {
            let _flush = self.flush_lock.lock().await;
            self.writer.flush().await?
        };
        let table = self.index.state.read().clone();
        ensure_flushed(&table)?;
        let segments = table.len();
        let seq = self
            .log
            .append(&Operation::MetadataCheckpoint(MetadataCheckpointOperation { table }))?;
        sequencer.ops_since_checkpoint = 0;
        info!(
            sequence = seq.as_u64(),
            segments,
            flushed = stats.bytes_written,
            "checkpoint written"
        );
        Ok(seq)
    }
}

/// The log before a checkpoint may be truncated, so every byte the
/// checkpoint covers has to be in the tier already.
fn ensure_flushed(table: &SegmentStateTable) -> CoreResult<()> {
    let Some(s) = table
        .iter()
        .find(|s| !s.pending_merges.is_empty() || s.storage_length < s.length)
    else {
        return Ok(());
    };
    warn!(
        segment = %s.id,
        length = s.length,
        storage_length = s.storage_length,
        pending_merges = s.pending_merges.len(),
        "checkpoint refused"
    );
    Err(CoreError::invalid_operation(format!(
        "cannot checkpoint: {} has {} of {} bytes in storage and {} pending merges",
        s.id,
        s.storage_length,
        s.length,
        s.pending_merges.len()
    )))
}

impl std::fmt::Debug for SegmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("config", &self.config)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::{EntryState, ReadResultEntryType};
    use std::time::Duration;

    fn ctx(n: u64) -> AppendContext {
        AppendContext::new(Uuid::from_u128(42), n)
    }

    async fn read_all(store: &SegmentStore, id: SegmentId, offset: u64, len: usize) -> Vec<u8> {
        let mut result = store.read(id, offset, len).unwrap();
        let mut out = Vec::new();
        while let Some(mut entry) = result.next_entry().unwrap() {
            if entry.entry_type() == ReadResultEntryType::Future {
                break;
            }
            match entry.content().await {
                Ok(data) => out.extend_from_slice(&data),
                Err(_) => break,
            }
        }
        out
    }

    #[tokio::test]
    async fn append_then_read() {
        let store = SegmentStore::open_in_memory().await.unwrap();
        let id = store.create_segment("s").await.unwrap();
        assert_eq!(store.append(id, &b"hello "[..], ctx(1)).await.unwrap(), 0);
        assert_eq!(store.append(id, &b"world"[..], ctx(2)).await.unwrap(), 6);

        assert_eq!(read_all(&store, id, 0, 11).await, b"hello world");
        assert_eq!(store.segment_info(id).unwrap().length, 11);
        assert_eq!(store.last_event_number(id, &Uuid::from_u128(42)).unwrap(), Some(2));
        assert_eq!(store.lookup("s"), Some(id));
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let store = SegmentStore::open_in_memory().await.unwrap();
        store.create_segment("s").await.unwrap();
        assert!(matches!(
            store.create_segment("s").await,
            Err(CoreError::SegmentExists { .. })
        ));
    }

    #[tokio::test]
    async fn sealed_segment_rejects_appends_and_ends_reads() {
        let store = SegmentStore::open_in_memory().await.unwrap();
        let id = store.create_segment("s").await.unwrap();
        store.append(id, &b"abc"[..], ctx(1)).await.unwrap();
        assert_eq!(store.seal(id).await.unwrap(), 3);

        assert!(matches!(
            store.append(id, &b"x"[..], ctx(2)).await,
            Err(CoreError::SegmentSealed(_))
        ));

        let mut result = store.read(id, 3, 10).unwrap();
        let entry = result.next_entry().unwrap().unwrap();
        assert_eq!(entry.entry_type(), ReadResultEntryType::EndOfStreamSegment);
        assert!(result.next_entry().unwrap().is_none());
    }

    #[tokio::test]
    async fn future_read_resolves_on_append() {
        let store = Arc::new(SegmentStore::open_in_memory().await.unwrap());
        let id = store.create_segment("s").await.unwrap();

        let mut result = store.read(id, 0, 100).unwrap();
        let mut entry = result.next_entry().unwrap().unwrap();
        assert_eq!(entry.entry_type(), ReadResultEntryType::Future);
        assert_eq!(entry.state(), EntryState::Pending);
        assert_eq!(store.pending_future_reads(), 1);

        let writer = Arc::clone(&store);
        tokio::spawn(async move {
            writer.append(id, &b"late"[..], ctx(1)).await.unwrap();
        });
        assert_eq!(entry.content().await.unwrap(), Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn future_read_fails_when_sealed() {
        let store = SegmentStore::open_in_memory().await.unwrap();
        let id = store.create_segment("s").await.unwrap();
        let mut result = store.read(id, 0, 10).unwrap();
        let mut entry = result.next_entry().unwrap().unwrap();
        store.seal(id).await.unwrap();
        assert!(matches!(
            entry.content().await,
            Err(CoreError::EndOfSegment { offset: 0, .. })
        ));
    }

    #[tokio::test]
    async fn future_read_times_out() {
        let config = Config::default().future_read_timeout(Duration::from_millis(20));
        let store = SegmentStore::open_with_backends(
            config,
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryTier::new()),
        )
        .await
        .unwrap();
        let id = store.create_segment("s").await.unwrap();
        let mut result = store.read(id, 0, 10).unwrap();
        let mut entry = result.next_entry().unwrap().unwrap();
        assert!(matches!(
            entry.content().await,
            Err(CoreError::ReadTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn read_past_length_is_rejected() {
        let store = SegmentStore::open_in_memory().await.unwrap();
        let id = store.create_segment("s").await.unwrap();
        assert!(matches!(
            store.read(id, 1, 10),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[tokio::test]
    async fn merge_is_readable_through_parent() {
        let store = SegmentStore::open_in_memory().await.unwrap();
        let parent = store.create_segment("p").await.unwrap();
        store.append(parent, &b"ab"[..], ctx(1)).await.unwrap();
        let batch = store.create_batch(parent).await.unwrap();
        store.append(batch, &b"cd"[..], ctx(2)).await.unwrap();

        assert!(matches!(
            store.merge_batch(batch, parent).await,
            Err(CoreError::SegmentNotSealed(_))
        ));
        store.seal(batch).await.unwrap();
        assert_eq!(store.merge_batch(batch, parent).await.unwrap(), 2);
        assert!(matches!(store.read(batch, 0, 2), Err(CoreError::SegmentMerged(_))));
        assert_eq!(read_all(&store, parent, 0, 4).await, b"abcd");

        store.flush_to_storage().await.unwrap();
        assert!(matches!(
            store.segment_info(batch),
            Err(CoreError::SegmentNotFound(_))
        ));
        assert_eq!(read_all(&store, parent, 0, 4).await, b"abcd");
    }

    #[tokio::test]
    async fn truncated_offsets_are_unreadable() {
        let store = SegmentStore::open_in_memory().await.unwrap();
        let id = store.create_segment("s").await.unwrap();
        store.append(id, &b"0123456789"[..], ctx(1)).await.unwrap();
        store.truncate_segment(id, 4).await.unwrap();

        let mut result = store.read(id, 0, 10).unwrap();
        let entry = result.next_entry().unwrap().unwrap();
        assert_eq!(entry.entry_type(), ReadResultEntryType::Truncated);
        assert_eq!(read_all(&store, id, 4, 10).await, b"456789");
        assert!(store.truncate_segment(id, 2).await.is_err());
    }

    #[tokio::test]
    async fn checkpoint_then_truncate_log() {
        let store = SegmentStore::open_in_memory().await.unwrap();
        let id = store.create_segment("s").await.unwrap();
        store.append(id, &b"abc"[..], ctx(1)).await.unwrap();
        assert_eq!(store.truncate_log().await.unwrap(), None);

        let checkpoint = store.checkpoint().await.unwrap();
        assert_eq!(store.segment_info(id).unwrap().storage_length, 3);
        assert_eq!(store.truncate_log().await.unwrap(), Some(checkpoint.prev()));
        assert_eq!(store.truncate_log().await.unwrap(), None);

        assert_eq!(read_all(&store, id, 0, 3).await, b"abc");
    }

    #[test]
    fn checkpoint_needs_everything_in_storage() {
        let mut table = SegmentStateTable::new();
        let create = segment_map(&table, "p");
        let parent = create.segment_id;
        table.apply(&Operation::SegmentMap(create)).unwrap();
        table
            .apply(&AppendIntent::new(parent, &b"ab"[..], ctx(1)).resolve(0).into())
            .unwrap();
        assert!(matches!(
            ensure_flushed(&table),
            Err(CoreError::InvalidOperation { .. })
        ));

        table.set_storage_length(parent, 2);
        ensure_flushed(&table).unwrap();

        let batch = table.next_segment_id();
        table
            .apply(&Operation::BatchMap(BatchMapOperation {
                batch_segment_id: batch,
                name: "p#b".into(),
                parent_segment_id: parent,
            }))
            .unwrap();
        table.apply(&SealIntent::new(batch).resolve(0).into()).unwrap();
        table
            .apply(&MergeBatchIntent::new(batch, parent).resolve(0, 2).into())
            .unwrap();
        assert!(ensure_flushed(&table).is_err());
    }

    #[tokio::test]
    async fn automatic_checkpoint() {
        let config = Config::default().checkpoint_every_ops(3);
        let store = SegmentStore::open_with_backends(
            config,
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryTier::new()),
        )
        .await
        .unwrap();
        let id = store.create_segment("s").await.unwrap();
        assert!(store.log().latest_checkpoint().is_none());
        store.append(id, &b"a"[..], ctx(1)).await.unwrap();
        store.append(id, &b"b"[..], ctx(2)).await.unwrap();
        assert_eq!(store.log().latest_checkpoint(), Some(SequenceNumber::new(4)));
    }
}
