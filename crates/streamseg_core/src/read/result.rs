//! Read results.

use crate::error::{CoreError, CoreResult};
use crate::read::entry::{EntryStatus, ReadResultEntry};
use crate::read::index::ReadIndex;
use crate::types::SegmentId;
use parking_lot::Mutex;
use std::sync::Arc;

/// The lazy sequence of entries answering one read request.
///
/// Entries are produced one at a time with [`next_entry`](Self::next_entry)
/// and are contiguous, non-overlapping and increasing in offset. The
/// sequence ends when `max_length` bytes have been served, after a terminal
/// entry, or after an entry fails. It is single pass: to re-read, issue a
/// new read.
///
/// The next entry can only be requested once the previous one has been
/// resolved, because its actual length decides where the next one starts.
#[derive(Debug)]
pub struct ReadResult {
    index: Arc<ReadIndex>,
    segment: SegmentId,
    start_offset: u64,
    max_length: usize,
    consumed: usize,
    last: Option<Arc<Mutex<EntryStatus>>>,
    finished: bool,
}

impl ReadResult {
    pub(crate) fn new(
        index: Arc<ReadIndex>,
        segment: SegmentId,
        start_offset: u64,
        max_length: usize,
    ) -> Self {
        Self {
            index,
            segment,
            start_offset,
            max_length,
            consumed: 0,
            last: None,
            finished: max_length == 0,
        }
    }

    /// The segment being read.
    #[must_use]
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// Offset the read started at.
    #[must_use]
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Upper bound on bytes served.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Bytes served by resolved entries so far.
    #[must_use]
    pub fn consumed_length(&self) -> usize {
        self.consumed
    }

    /// Returns true once no further entries will be produced.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.finished
    }

    /// Produces the next entry, or `None` when the read is complete.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidOperation`] if the previous entry's content has
    ///   not been resolved yet.
    /// - [`CoreError::SegmentNotFound`] / [`CoreError::SegmentMerged`] if the
    ///   segment disappeared since the read began.
    pub fn next_entry(&mut self) -> CoreResult<Option<ReadResultEntry>> {
        if self.finished {
            return Ok(None);
        }

        if let Some(last) = &self.last {
            let status = *last.lock();
            match status {
                EntryStatus::Pending => {
                    return Err(CoreError::invalid_operation(
                        "previous read result entry has not been resolved",
                    ));
                }
                EntryStatus::Ready(len) => {
                    self.consumed += len;
                    self.last = None;
                }
                EntryStatus::Failed => {
                    self.finished = true;
                    self.last = None;
                    return Ok(None);
                }
            }
        }

        if self.consumed >= self.max_length {
            self.finished = true;
            return Ok(None);
        }

        let offset = self.start_offset + self.consumed as u64;
        let entry = self
            .index
            .entry_at(self.segment, offset, self.max_length - self.consumed)?;
        if entry.entry_type().is_terminal() {
            self.finished = true;
        }
        self.last = Some(entry.status());
        Ok(Some(entry))
    }
}
