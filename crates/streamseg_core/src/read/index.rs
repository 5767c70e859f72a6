//! Locates the bytes behind a segment offset.
//!
//! A readable offset is served from one of three places, checked in order:
//! the cache, the long-term tier, or (at the end of an open segment) a
//! future append. Ranges of a parent that belong to a merged batch not yet
//! concatenated in the tier are redirected to the batch.

use crate::cache::ReadCache;
use crate::error::{CoreError, CoreResult};
use crate::read::entry::{ReadResultEntry, ReadResultEntryType};
use crate::read::future_reads::FutureReadRegistry;
use crate::state::{SegmentState, SegmentStateTable};
use crate::types::SegmentId;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use streamseg_storage::{LongTermStorage, StorageError};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::trace;

/// Where the bytes at an offset live right now.
pub(crate) enum Lookup {
    /// Served from the cache.
    Cached(Bytes),
    /// Must be fetched from the tier.
    Storage(StorageRequest),
}

/// A tier read for part of a segment.
#[derive(Debug, Clone)]
pub(crate) struct StorageRequest {
    /// Segment the caller is reading.
    pub segment: SegmentId,
    /// Offset in `segment`.
    pub offset: u64,
    /// Segment whose tier object holds the bytes.
    pub source: SegmentId,
    /// Name of that object.
    pub source_name: String,
    /// Offset in that object.
    pub source_offset: u64,
    /// Bytes to read.
    pub length: usize,
    /// Parent object and offset to try if the batch object has already been
    /// concatenated away.
    pub fallback: Option<(String, u64)>,
}

/// Shared state behind every read of a store.
pub(crate) struct ReadIndex {
    pub(crate) state: Arc<RwLock<SegmentStateTable>>,
    pub(crate) cache: Arc<ReadCache>,
    pub(crate) tier: Arc<dyn LongTermStorage>,
    pub(crate) futures: Arc<FutureReadRegistry>,
    runtime: Handle,
    future_read_timeout: Duration,
    max_storage_read_size: usize,
}

impl ReadIndex {
    pub(crate) fn new(
        state: Arc<RwLock<SegmentStateTable>>,
        cache: Arc<ReadCache>,
        tier: Arc<dyn LongTermStorage>,
        futures: Arc<FutureReadRegistry>,
        future_read_timeout: Duration,
        max_storage_read_size: usize,
    ) -> CoreResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| CoreError::invalid_operation("the store must run inside a Tokio runtime"))?;
        Ok(Self {
            state,
            cache,
            tier,
            futures,
            runtime,
            future_read_timeout,
            max_storage_read_size: max_storage_read_size.max(1),
        })
    }

    /// Builds the entry that serves `offset` of `segment`, capped at
    /// `remaining` bytes.
    pub(crate) fn entry_at(
        self: &Arc<Self>,
        segment: SegmentId,
        offset: u64,
        remaining: usize,
    ) -> CoreResult<ReadResultEntry> {
        let table = self.state.read();
        let state = table.require(segment)?;
        if state.merged {
            return Err(CoreError::SegmentMerged(segment));
        }

        if offset < state.start_offset {
            return Ok(ReadResultEntry::terminal(
                ReadResultEntryType::Truncated,
                offset,
                remaining,
                CoreError::Truncated {
                    segment,
                    offset,
                    start_offset: state.start_offset,
                },
            ));
        }

        if offset >= state.length {
            if state.sealed {
                return Ok(ReadResultEntry::terminal(
                    ReadResultEntryType::EndOfStreamSegment,
                    offset,
                    remaining,
                    CoreError::EndOfSegment { segment, offset },
                ));
            }
            let (guard, rx) = self.futures.register(segment, offset);
            let deadline = Instant::now() + self.future_read_timeout;
            trace!(%segment, offset, "registered future read");
            return Ok(ReadResultEntry::future(
                Arc::clone(self),
                segment,
                offset,
                remaining,
                guard,
                rx,
                deadline,
            ));
        }

        match self.lookup(&table, state, offset, remaining)? {
            Lookup::Cached(data) => Ok(ReadResultEntry::cached(offset, remaining, data)),
            Lookup::Storage(request) => {
                let rx = self.spawn_fetch(request);
                Ok(ReadResultEntry::storage(offset, remaining, rx))
            }
        }
    }

    /// Finds the bytes for `offset` (which must be below the segment length).
    ///
    /// Must be called with the state lock held so that the cache and the
    /// storage length are observed together.
    pub(crate) fn lookup(
        &self,
        table: &SegmentStateTable,
        state: &SegmentState,
        offset: u64,
        want: usize,
    ) -> CoreResult<Lookup> {
        let (source, source_offset, limit, fallback) = match state.pending_merge_at(offset) {
            Some(merge) => {
                let batch = table.require(merge.batch)?;
                (
                    batch,
                    offset - merge.offset,
                    merge.end() - offset,
                    Some((state.name.clone(), offset)),
                )
            }
            None => {
                let end = state
                    .next_pending_merge_after(offset)
                    .map_or(state.length, |m| m.offset);
                (state, offset, end - offset, None)
            }
        };
        let want = clamp(want, limit);

        if let Some(data) = self.cache.get(source.id, source_offset, want) {
            return Ok(Lookup::Cached(data));
        }

        if source_offset >= source.storage_length {
            return Err(CoreError::invalid_operation(format!(
                "{} offset {offset} is neither cached nor in storage",
                state.id
            )));
        }
        let length = want
            .min(self.max_storage_read_size)
            .min(clamp(usize::MAX, source.storage_length - source_offset));
        Ok(Lookup::Storage(StorageRequest {
            segment: state.id,
            offset,
            source: source.id,
            source_name: source.name.clone(),
            source_offset,
            length,
            fallback,
        }))
    }

    /// Starts a tier fetch in the background.
    pub(crate) fn spawn_fetch(
        self: &Arc<Self>,
        request: StorageRequest,
    ) -> oneshot::Receiver<CoreResult<Bytes>> {
        let (tx, rx) = oneshot::channel();
        let index = Arc::clone(self);
        self.runtime.spawn(async move {
            let result = index.fetch(request).await;
            let _ = tx.send(result);
        });
        rx
    }

    /// Reads a range from the tier, checks it was not truncated meanwhile,
    /// and caches it.
    pub(crate) async fn fetch(&self, request: StorageRequest) -> CoreResult<Bytes> {
        let data = match self
            .tier
            .read(&request.source_name, request.source_offset, request.length)
            .await
        {
            Ok(data) => data,
            Err(StorageError::NotFound(name)) => match &request.fallback {
                Some((parent, offset)) => {
                    self.tier.read(parent, *offset, request.length).await?
                }
                None => return Err(StorageError::NotFound(name).into()),
            },
            Err(e) => return Err(e.into()),
        };

        let table = self.state.read();
        if let Some(state) = table.get(request.segment) {
            if request.offset < state.start_offset {
                return Err(CoreError::Truncated {
                    segment: request.segment,
                    offset: request.offset,
                    start_offset: state.start_offset,
                });
            }
        }
        if table.get(request.source).is_some() {
            self.cache
                .put(request.source, request.source_offset, data.clone());
        }
        trace!(
            segment = %request.segment,
            offset = request.offset,
            len = data.len(),
            "fetched from storage"
        );
        Ok(data)
    }

    /// Resolves data for a woken future read at `offset`.
    pub(crate) async fn read_available(
        &self,
        segment: SegmentId,
        offset: u64,
        want: usize,
    ) -> CoreResult<Bytes> {
        match self.lookup_available(segment, offset, want)? {
            Lookup::Cached(data) => Ok(data),
            Lookup::Storage(request) => self.fetch(request).await,
        }
    }

    pub(crate) fn lookup_available(
        &self,
        segment: SegmentId,
        offset: u64,
        want: usize,
    ) -> CoreResult<Lookup> {
        let table = self.state.read();
        let state = table.require(segment)?;
        if offset < state.start_offset {
            return Err(CoreError::Truncated {
                segment,
                offset,
                start_offset: state.start_offset,
            });
        }
        self.lookup(&table, state, offset, want)
    }
}

impl std::fmt::Debug for ReadIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadIndex")
            .field("future_read_timeout", &self.future_read_timeout)
            .field("max_storage_read_size", &self.max_storage_read_size)
            .finish_non_exhaustive()
    }
}

fn clamp(want: usize, limit: u64) -> usize {
    usize::try_from(limit).map_or(want, |limit| want.min(limit))
}
