//! Read result entries.

use crate::error::{CoreError, CoreResult};
use crate::read::future_reads::{FutureReadGuard, Wakeup};
use crate::read::index::{Lookup, ReadIndex};
use crate::types::SegmentId;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;

/// Where an entry's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadResultEntryType {
    /// Already in memory.
    Cache,
    /// Fetched from the long-term tier.
    Storage,
    /// Waiting for an append that has not happened yet.
    Future,
    /// The segment is sealed and fully read. Terminal.
    EndOfStreamSegment,
    /// The offset is before the segment's start offset. Terminal.
    Truncated,
}

impl ReadResultEntryType {
    /// Returns true if no entries follow this one.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::EndOfStreamSegment | Self::Truncated)
    }
}

/// Observable state of an entry's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Not available yet.
    Pending,
    /// Available.
    Ready,
    /// Will never be available.
    Failed,
}

/// Status shared with the owning read result so it can tell when the
/// entry has been resolved and by how much to advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryStatus {
    Pending,
    Ready(usize),
    Failed,
}

enum Pending {
    Storage {
        rx: oneshot::Receiver<CoreResult<Bytes>>,
    },
    Future {
        index: Arc<ReadIndex>,
        segment: SegmentId,
        rx: oneshot::Receiver<Wakeup>,
        deadline: Instant,
        _guard: FutureReadGuard,
    },
}

/// One contiguous piece of a read result.
///
/// Content is resolved lazily. [`content`](Self::content) waits for it;
/// [`try_content`](Self::try_content) polls. A failure is reported once;
/// later calls return [`CoreError::InvalidOperation`]. Dropping an
/// unresolved entry cancels its wait without side effects.
pub struct ReadResultEntry {
    offset: u64,
    entry_type: ReadResultEntryType,
    requested_length: usize,
    status: Arc<Mutex<EntryStatus>>,
    content: Option<Bytes>,
    failure: Option<CoreError>,
    pending: Option<Pending>,
}

impl ReadResultEntry {
    fn new(offset: u64, entry_type: ReadResultEntryType, requested_length: usize) -> Self {
        Self {
            offset,
            entry_type,
            requested_length,
            status: Arc::new(Mutex::new(EntryStatus::Pending)),
            content: None,
            failure: None,
            pending: None,
        }
    }

    pub(crate) fn cached(offset: u64, requested_length: usize, data: Bytes) -> Self {
        let mut entry = Self::new(offset, ReadResultEntryType::Cache, requested_length);
        entry.complete(Ok(data));
        entry
    }

    pub(crate) fn storage(
        offset: u64,
        requested_length: usize,
        rx: oneshot::Receiver<CoreResult<Bytes>>,
    ) -> Self {
        let mut entry = Self::new(offset, ReadResultEntryType::Storage, requested_length);
        entry.pending = Some(Pending::Storage { rx });
        entry
    }

    pub(crate) fn future(
        index: Arc<ReadIndex>,
        segment: SegmentId,
        offset: u64,
        requested_length: usize,
        guard: FutureReadGuard,
        rx: oneshot::Receiver<Wakeup>,
        deadline: Instant,
    ) -> Self {
        let mut entry = Self::new(offset, ReadResultEntryType::Future, requested_length);
        entry.pending = Some(Pending::Future {
            index,
            segment,
            rx,
            deadline,
            _guard: guard,
        });
        entry
    }

    pub(crate) fn terminal(
        entry_type: ReadResultEntryType,
        offset: u64,
        requested_length: usize,
        error: CoreError,
    ) -> Self {
        let mut entry = Self::new(offset, entry_type, requested_length);
        entry.complete(Err(error));
        entry
    }

    pub(crate) fn status(&self) -> Arc<Mutex<EntryStatus>> {
        Arc::clone(&self.status)
    }

    /// Segment offset this entry starts at.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Where the content comes from.
    #[must_use]
    pub fn entry_type(&self) -> ReadResultEntryType {
        self.entry_type
    }

    /// Bytes requested; the content may be shorter.
    #[must_use]
    pub fn requested_length(&self) -> usize {
        self.requested_length
    }

    /// Length of the resolved content, once ready.
    #[must_use]
    pub fn actual_length(&self) -> Option<usize> {
        self.content.as_ref().map(Bytes::len)
    }

    /// Current state of the content.
    #[must_use]
    pub fn state(&self) -> EntryState {
        match *self.status.lock() {
            EntryStatus::Pending => EntryState::Pending,
            EntryStatus::Ready(_) => EntryState::Ready,
            EntryStatus::Failed => EntryState::Failed,
        }
    }

    /// Waits for the content.
    ///
    /// # Errors
    ///
    /// - [`CoreError::EndOfSegment`] / [`CoreError::Truncated`] for terminal
    ///   entries, or when the segment is sealed or truncated while waiting.
    /// - [`CoreError::ReadTimeout`] if a future read outlives its timeout.
    /// - [`CoreError::SegmentMerged`] if the segment is merged while waiting.
    /// - Tier errors for storage fetches.
    pub async fn content(&mut self) -> CoreResult<Bytes> {
        if let Some(pending) = self.pending.take() {
            let result = match pending {
                Pending::Storage { rx } => rx.await.unwrap_or(Err(CoreError::Closed)),
                Pending::Future {
                    index,
                    segment,
                    rx,
                    deadline,
                    _guard,
                } => match tokio::time::timeout_at(deadline, rx).await {
                    Err(_) => Err(CoreError::ReadTimeout {
                        segment,
                        offset: self.offset,
                    }),
                    Ok(Err(_)) => Err(CoreError::Closed),
                    Ok(Ok(wakeup)) => match self.wakeup_result(segment, wakeup) {
                        Ok(()) => {
                            index
                                .read_available(segment, self.offset, self.requested_length)
                                .await
                        }
                        Err(e) => Err(e),
                    },
                },
            };
            self.complete(result);
        }
        self.current()
    }

    /// Returns the content if it is available, without waiting.
    ///
    /// `Ok(None)` means the content is still pending.
    ///
    /// # Errors
    ///
    /// Same as [`content`](Self::content).
    pub fn try_content(&mut self) -> CoreResult<Option<Bytes>> {
        let Some(pending) = self.pending.take() else {
            return self.current().map(Some);
        };
        match pending {
            Pending::Storage { mut rx } => match rx.try_recv() {
                Ok(result) => self.complete(result),
                Err(TryRecvError::Empty) => {
                    self.pending = Some(Pending::Storage { rx });
                    return Ok(None);
                }
                Err(TryRecvError::Closed) => self.complete(Err(CoreError::Closed)),
            },
            Pending::Future {
                index,
                segment,
                mut rx,
                deadline,
                _guard,
            } => match rx.try_recv() {
                Ok(wakeup) => {
                    if let Err(e) = self.wakeup_result(segment, wakeup) {
                        self.complete(Err(e));
                    } else {
                        match index.lookup_available(segment, self.offset, self.requested_length) {
                            Ok(Lookup::Cached(data)) => self.complete(Ok(data)),
                            Ok(Lookup::Storage(request)) => {
                                let rx = index.spawn_fetch(request);
                                self.pending = Some(Pending::Storage { rx });
                                return Ok(None);
                            }
                            Err(e) => self.complete(Err(e)),
                        }
                    }
                }
                Err(TryRecvError::Empty) if Instant::now() >= deadline => {
                    self.complete(Err(CoreError::ReadTimeout {
                        segment,
                        offset: self.offset,
                    }));
                }
                Err(TryRecvError::Empty) => {
                    self.pending = Some(Pending::Future {
                        index,
                        segment,
                        rx,
                        deadline,
                        _guard,
                    });
                    return Ok(None);
                }
                Err(TryRecvError::Closed) => self.complete(Err(CoreError::Closed)),
            },
        }
        self.current().map(Some)
    }

    fn wakeup_result(&self, segment: SegmentId, wakeup: Wakeup) -> CoreResult<()> {
        match wakeup {
            Wakeup::Appended { .. } => Ok(()),
            Wakeup::Sealed => Err(CoreError::EndOfSegment {
                segment,
                offset: self.offset,
            }),
            Wakeup::Merged => Err(CoreError::SegmentMerged(segment)),
        }
    }

    fn complete(&mut self, result: CoreResult<Bytes>) {
        let status = match result {
            Ok(data) => {
                let status = EntryStatus::Ready(data.len());
                self.content = Some(data);
                status
            }
            Err(e) => {
                self.failure = Some(e);
                EntryStatus::Failed
            }
        };
        *self.status.lock() = status;
    }

    fn current(&mut self) -> CoreResult<Bytes> {
        if let Some(data) = &self.content {
            return Ok(data.clone());
        }
        Err(self
            .failure
            .take()
            .unwrap_or_else(|| CoreError::invalid_operation("entry failure already reported")))
    }
}

impl std::fmt::Debug for ReadResultEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadResultEntry")
            .field("offset", &self.offset)
            .field("entry_type", &self.entry_type)
            .field("requested_length", &self.requested_length)
            .field("state", &self.state())
            .finish()
    }
}
