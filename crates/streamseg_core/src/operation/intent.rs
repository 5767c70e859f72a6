//! Two-phase construction of operations with late-bound fields.
//!
//! Appends, seals and merges are requested before the store knows where
//! they land. The request is an *intent*; the store resolves it under the
//! write sequencer, which yields the operation that gets logged. Only
//! resolved operations can be serialized.

use crate::operation::record::{AppendOperation, MergeBatchOperation, SealOperation};
use crate::types::{AppendContext, SegmentId};
use bytes::Bytes;

/// An append whose offset is not known yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendIntent {
    segment_id: SegmentId,
    context: AppendContext,
    data: Bytes,
}

impl AppendIntent {
    /// Creates an append intent.
    #[must_use]
    pub fn new(segment_id: SegmentId, data: impl Into<Bytes>, context: AppendContext) -> Self {
        Self {
            segment_id,
            context,
            data: data.into(),
        }
    }

    /// Target segment.
    #[must_use]
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Number of bytes to append.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns true if there is nothing to append.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Binds the offset the data lands at.
    #[must_use]
    pub fn resolve(self, offset: u64) -> AppendOperation {
        AppendOperation {
            segment_id: self.segment_id,
            offset,
            context: self.context,
            data: self.data,
        }
    }
}

/// A seal whose final length is not known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealIntent {
    segment_id: SegmentId,
}

impl SealIntent {
    /// Creates a seal intent.
    #[must_use]
    pub const fn new(segment_id: SegmentId) -> Self {
        Self { segment_id }
    }

    /// Target segment.
    #[must_use]
    pub const fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Binds the length the segment is sealed at.
    #[must_use]
    pub const fn resolve(self, length: u64) -> SealOperation {
        SealOperation {
            segment_id: self.segment_id,
            length,
        }
    }
}

/// A merge whose batch length and parent offset are not known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeBatchIntent {
    parent_segment_id: SegmentId,
    batch_segment_id: SegmentId,
}

impl MergeBatchIntent {
    /// Creates a merge intent.
    #[must_use]
    pub const fn new(batch_segment_id: SegmentId, parent_segment_id: SegmentId) -> Self {
        Self {
            parent_segment_id,
            batch_segment_id,
        }
    }

    /// The segment merged into.
    #[must_use]
    pub const fn parent_segment_id(&self) -> SegmentId {
        self.parent_segment_id
    }

    /// The batch being merged.
    #[must_use]
    pub const fn batch_segment_id(&self) -> SegmentId {
        self.batch_segment_id
    }

    /// Binds the batch length and the parent offset it lands at.
    #[must_use]
    pub const fn resolve(self, length: u64, parent_offset: u64) -> MergeBatchOperation {
        MergeBatchOperation {
            parent_segment_id: self.parent_segment_id,
            batch_segment_id: self.batch_segment_id,
            length,
            parent_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn append_intent_resolves_offset() {
        let ctx = AppendContext::new(Uuid::nil(), 3);
        let op = AppendIntent::new(SegmentId::new(1), &b"abc"[..], ctx).resolve(40);
        assert_eq!(op.offset(), 40);
        assert_eq!(op.len(), 3);
        assert_eq!(op.context(), ctx);
    }

    #[test]
    fn merge_intent_resolves_both_fields() {
        let op = MergeBatchIntent::new(SegmentId::new(2), SegmentId::new(1)).resolve(10, 100);
        assert_eq!(op.batch_segment_id(), SegmentId::new(2));
        assert_eq!(op.parent_segment_id(), SegmentId::new(1));
        assert_eq!(op.length(), 10);
        assert_eq!(op.parent_offset(), 100);
    }

    #[test]
    fn seal_intent_resolves_length() {
        let op = SealIntent::new(SegmentId::new(9)).resolve(77);
        assert_eq!(op.segment_id(), SegmentId::new(9));
        assert_eq!(op.length(), 77);
    }
}
