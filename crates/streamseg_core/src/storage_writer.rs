//! Moves logged data from the cache into the long-term tier.
//!
//! A flush copies, for every segment, the bytes between its storage length
//! and the start of its first pending merge (or its length) from the cache
//! into the tier. Once a parent has been flushed up to a pending merge and
//! the batch has been flushed in full, the tier concatenates the batch into
//! the parent and the merge is finished in memory: the redirect is dropped,
//! the batch's cached blocks move to the parent, and the batch leaves the
//! state table.
//!
//! None of this is logged. Checkpoints capture the resulting storage
//! lengths and recovery reconciles them against the tier.

use crate::cache::ReadCache;
use crate::error::{CoreError, CoreResult};
use crate::state::{PendingMerge, SegmentStateTable};
use crate::types::SegmentId;
use parking_lot::RwLock;
use std::sync::Arc;
use streamseg_storage::LongTermStorage;
use tracing::{debug, info};

/// What one flush did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Bytes written to the tier.
    pub bytes_written: u64,
    /// Segments that had data written.
    pub segments_flushed: usize,
    /// Merges concatenated and finished.
    pub merges_completed: usize,
}

/// Flushes segment data and finishes merges.
pub(crate) struct StorageWriter {
    state: Arc<RwLock<SegmentStateTable>>,
    cache: Arc<ReadCache>,
    tier: Arc<dyn LongTermStorage>,
}

struct FlushTarget {
    id: SegmentId,
    name: String,
    from: u64,
    to: u64,
}

struct MergeTarget {
    parent: SegmentId,
    parent_name: String,
    batch_name: String,
    merge: PendingMerge,
}

impl StorageWriter {
    pub(crate) fn new(
        state: Arc<RwLock<SegmentStateTable>>,
        cache: Arc<ReadCache>,
        tier: Arc<dyn LongTermStorage>,
    ) -> Self {
        Self { state, cache, tier }
    }

    /// Flushes everything flushable and finishes every ready merge.
    ///
    /// Callers must not run two flushes at once.
    pub(crate) async fn flush(&self) -> CoreResult<FlushStats> {
        let mut stats = FlushStats::default();
        loop {
            let mut progressed = false;

            for target in self.flush_targets() {
                let written = self.flush_segment(&target).await?;
                if written > 0 {
                    stats.bytes_written += written;
                    stats.segments_flushed += 1;
                    progressed = true;
                }
            }

            for target in self.merge_targets() {
                self.complete_merge(&target).await?;
                stats.merges_completed += 1;
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
        if stats != FlushStats::default() {
            info!(
                bytes = stats.bytes_written,
                segments = stats.segments_flushed,
                merges = stats.merges_completed,
                "flushed to storage"
            );
        }
        Ok(stats)
    }

    fn flush_targets(&self) -> Vec<FlushTarget> {
        self.state
            .read()
            .iter()
            .filter_map(|s| {
                let to = s.pending_merges.first().map_or(s.length, |m| m.offset);
                (to > s.storage_length).then(|| FlushTarget {
                    id: s.id,
                    name: s.name.clone(),
                    from: s.storage_length,
                    to,
                })
            })
            .collect()
    }

    fn merge_targets(&self) -> Vec<MergeTarget> {
        let table = self.state.read();
        table
            .iter()
            .filter_map(|parent| {
                let merge = *parent.pending_merges.first()?;
                let batch = table.get(merge.batch)?;
                let ready = parent.storage_length == merge.offset
                    && batch.storage_length == batch.length;
                ready.then(|| MergeTarget {
                    parent: parent.id,
                    parent_name: parent.name.clone(),
                    batch_name: batch.name.clone(),
                    merge,
                })
            })
            .collect()
    }

    async fn flush_segment(&self, target: &FlushTarget) -> CoreResult<u64> {
        let mut offset = target.from;
        if offset == 0 && self.tier.length(&target.name).await?.is_none() {
            self.tier.write(&target.name, 0, &[]).await?;
        }
        while offset < target.to {
            let want = usize::try_from(target.to - offset).unwrap_or(usize::MAX);
            let chunk = self.cache.get(target.id, offset, want).ok_or_else(|| {
                CoreError::invalid_operation(format!(
                    "unflushed data of {} at offset {offset} is not cached",
                    target.id
                ))
            })?;
            offset = self.tier.write(&target.name, offset, &chunk).await?;
        }

        let start_offset = {
            let mut table = self.state.write();
            table.set_storage_length(target.id, offset);
            table.get(target.id).map_or(0, |s| s.start_offset)
        };
        self.cache.mark_flushed(target.id, offset);
        self.cache
            .truncate_before(target.id, start_offset.min(offset));
        debug!(segment = %target.id, from = target.from, to = offset, "segment flushed");
        Ok(offset - target.from)
    }

    async fn complete_merge(&self, target: &MergeTarget) -> CoreResult<()> {
        let batch_present = self.tier.length(&target.batch_name).await?.is_some();
        let new_length = match self.tier.length(&target.parent_name).await? {
            // An earlier concat extended the parent but did not remove the batch.
            Some(length) if length >= target.merge.end() => {
                if batch_present {
                    self.tier.delete(&target.batch_name).await?;
                }
                length
            }
            _ => {
                if !batch_present {
                    self.tier.write(&target.batch_name, 0, &[]).await?;
                }
                self.tier
                    .concat(&target.parent_name, &target.batch_name)
                    .await?
            }
        };
        if new_length != target.merge.end() {
            return Err(CoreError::invalid_operation(format!(
                "concatenating {} into {} produced length {new_length}, expected {}",
                target.batch_name,
                target.parent_name,
                target.merge.end()
            )));
        }
        finish_merge(&mut self.state.write(), &self.cache, target.parent, target.merge);
        debug!(
            parent = %target.parent,
            batch = %target.merge.batch,
            "merge concatenated"
        );
        Ok(())
    }
}

/// Finishes a merge in memory once the tier holds the batch inside the
/// parent.
pub(crate) fn finish_merge(
    table: &mut SegmentStateTable,
    cache: &ReadCache,
    parent: SegmentId,
    merge: PendingMerge,
) {
    if table.complete_merge(parent, merge.batch).is_some() {
        cache.move_segment(merge.batch, parent, merge.offset);
        cache.mark_flushed(parent, merge.end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{AppendIntent, BatchMapOperation, MergeBatchIntent, Operation, SealIntent};
    use crate::state::segment_map;
    use crate::types::AppendContext;
    use bytes::Bytes;
    use streamseg_storage::InMemoryTier;
    use uuid::Uuid;

    struct Fixture {
        state: Arc<RwLock<SegmentStateTable>>,
        cache: Arc<ReadCache>,
        tier: Arc<InMemoryTier>,
        writer: StorageWriter,
    }

    fn fixture() -> Fixture {
        let state = Arc::new(RwLock::new(SegmentStateTable::new()));
        let cache = Arc::new(ReadCache::new(1024 * 1024));
        let tier = Arc::new(InMemoryTier::new());
        let writer = StorageWriter::new(Arc::clone(&state), Arc::clone(&cache), tier.clone());
        Fixture {
            state,
            cache,
            tier,
            writer,
        }
    }

    impl Fixture {
        fn create(&self, name: &str) -> SegmentId {
            let mut table = self.state.write();
            let op = segment_map(&table, name);
            let id = op.segment_id;
            table.apply(&Operation::SegmentMap(op)).unwrap();
            id
        }

        fn create_batch(&self, parent: SegmentId, name: &str) -> SegmentId {
            let mut table = self.state.write();
            let id = table.next_segment_id();
            table
                .apply(&Operation::BatchMap(BatchMapOperation {
                    batch_segment_id: id,
                    name: name.into(),
                    parent_segment_id: parent,
                }))
                .unwrap();
            id
        }

        fn append(&self, id: SegmentId, data: &'static [u8]) {
            let mut table = self.state.write();
            let offset = table.get(id).unwrap().length;
            let op = AppendIntent::new(id, data, AppendContext::new(Uuid::nil(), 0)).resolve(offset);
            table.apply(&op.into()).unwrap();
            self.cache.put(id, offset, Bytes::from_static(data));
        }

        fn seal_and_merge(&self, batch: SegmentId, parent: SegmentId) {
            let mut table = self.state.write();
            let len = table.get(batch).unwrap().length;
            table.apply(&SealIntent::new(batch).resolve(len).into()).unwrap();
            let parent_len = table.get(parent).unwrap().length;
            table
                .apply(&MergeBatchIntent::new(batch, parent).resolve(len, parent_len).into())
                .unwrap();
        }
    }

    #[tokio::test]
    async fn flush_copies_cached_data_to_tier() {
        let f = fixture();
        let id = f.create("a");
        f.append(id, b"hello ");
        f.append(id, b"world");

        let stats = f.writer.flush().await.unwrap();
        assert_eq!(stats.bytes_written, 11);
        assert_eq!(f.tier.contents("a").unwrap(), b"hello world");
        assert_eq!(f.state.read().get(id).unwrap().storage_length, 11);

        let again = f.writer.flush().await.unwrap();
        assert_eq!(again, FlushStats::default());
    }

    #[tokio::test]
    async fn merge_is_concatenated_after_parent_catches_up() {
        let f = fixture();
        let parent = f.create("p");
        f.append(parent, b"head-");
        let batch = f.create_batch(parent, "p#tx");
        f.append(batch, b"batch");
        f.seal_and_merge(batch, parent);
        f.append(parent, b"-tail");

        let stats = f.writer.flush().await.unwrap();
        assert_eq!(stats.merges_completed, 1);
        assert_eq!(f.tier.contents("p").unwrap(), b"head-batch-tail");
        assert!(f.tier.contents("p#tx").is_none());

        let table = f.state.read();
        assert!(table.get(batch).is_none());
        let p = table.get(parent).unwrap();
        assert!(p.pending_merges.is_empty());
        assert_eq!(p.storage_length, 15);
        assert_eq!(
            f.cache.get(parent, 5, 100).unwrap(),
            Bytes::from_static(b"batch")
        );
    }

    #[tokio::test]
    async fn empty_batch_merges_cleanly() {
        let f = fixture();
        let parent = f.create("p");
        let batch = f.create_batch(parent, "p#empty");
        f.seal_and_merge(batch, parent);

        f.writer.flush().await.unwrap();
        assert!(f.state.read().get(batch).is_none());
        assert_eq!(f.tier.contents("p").unwrap(), b"");
    }
}
