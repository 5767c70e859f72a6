//! Operation types.

use crate::state::SegmentStateTable;
use crate::types::{AppendContext, SegmentId, SequenceNumber};
use bytes::Bytes;

/// Type tag of an operation, the first byte of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationType {
    /// Bytes appended to a segment.
    Append = 1,
    /// Segment sealed at a length.
    Seal = 2,
    /// Batch segment merged into its parent.
    MergeBatch = 3,
    /// Full snapshot of the segment state table.
    MetadataCheckpoint = 4,
    /// Segment created.
    SegmentMap = 5,
    /// Batch segment created under a parent.
    BatchMap = 6,
    /// Segment truncated at an offset.
    TruncateSegment = 7,
}

impl OperationType {
    /// Converts a byte to an operation type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Append),
            2 => Some(Self::Seal),
            3 => Some(Self::MergeBatch),
            4 => Some(Self::MetadataCheckpoint),
            5 => Some(Self::SegmentMap),
            6 => Some(Self::BatchMap),
            7 => Some(Self::TruncateSegment),
            _ => None,
        }
    }

    /// Converts the operation type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Format version written for this type.
    #[must_use]
    pub const fn current_version(self) -> u8 {
        match self {
            Self::MetadataCheckpoint => 1,
            _ => 0,
        }
    }

    /// Human-readable name, used by tooling.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Append => "Append",
            Self::Seal => "Seal",
            Self::MergeBatch => "MergeBatch",
            Self::MetadataCheckpoint => "MetadataCheckpoint",
            Self::SegmentMap => "SegmentMap",
            Self::BatchMap => "BatchMap",
            Self::TruncateSegment => "TruncateSegment",
        }
    }
}

/// The on-disk prefix of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationHeader {
    /// Operation type tag.
    pub operation_type: OperationType,
    /// Type-specific format version.
    pub version: u8,
    /// Sequence number assigned by the log.
    pub sequence_number: SequenceNumber,
}

/// Bytes appended to a segment at a resolved offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOperation {
    pub(crate) segment_id: SegmentId,
    pub(crate) offset: u64,
    pub(crate) context: AppendContext,
    pub(crate) data: Bytes,
}

impl AppendOperation {
    /// Target segment.
    #[must_use]
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Offset the data lands at.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The writer context.
    #[must_use]
    pub fn context(&self) -> AppendContext {
        self.context
    }

    /// The appended bytes.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Number of appended bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns true for an empty append.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Segment sealed at a resolved length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealOperation {
    pub(crate) segment_id: SegmentId,
    pub(crate) length: u64,
}

impl SealOperation {
    /// Target segment.
    #[must_use]
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Final length of the segment.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }
}

/// Batch segment merged into its parent.
///
/// `length` is the batch length and `parent_offset` the parent length at
/// the moment the merge was sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeBatchOperation {
    pub(crate) parent_segment_id: SegmentId,
    pub(crate) batch_segment_id: SegmentId,
    pub(crate) length: u64,
    pub(crate) parent_offset: u64,
}

impl MergeBatchOperation {
    /// The segment merged into.
    #[must_use]
    pub fn parent_segment_id(&self) -> SegmentId {
        self.parent_segment_id
    }

    /// The batch being merged.
    #[must_use]
    pub fn batch_segment_id(&self) -> SegmentId {
        self.batch_segment_id
    }

    /// Length of the batch.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Offset in the parent where the batch lands.
    #[must_use]
    pub fn parent_offset(&self) -> u64 {
        self.parent_offset
    }
}

/// Snapshot of all segment state, used as a replay starting point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataCheckpointOperation {
    /// The captured table.
    pub table: SegmentStateTable,
}

/// Segment created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMapOperation {
    /// Id assigned to the new segment.
    pub segment_id: SegmentId,
    /// Segment name.
    pub name: String,
}

/// Batch segment created under a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMapOperation {
    /// Id assigned to the batch.
    pub batch_segment_id: SegmentId,
    /// Batch name.
    pub name: String,
    /// Segment the batch will be merged into.
    pub parent_segment_id: SegmentId,
}

/// Segment truncated: bytes before `offset` are no longer readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncateSegmentOperation {
    /// Target segment.
    pub segment_id: SegmentId,
    /// New start offset.
    pub offset: u64,
}

/// A single durable mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// See [`AppendOperation`].
    Append(AppendOperation),
    /// See [`SealOperation`].
    Seal(SealOperation),
    /// See [`MergeBatchOperation`].
    MergeBatch(MergeBatchOperation),
    /// See [`MetadataCheckpointOperation`].
    MetadataCheckpoint(MetadataCheckpointOperation),
    /// See [`SegmentMapOperation`].
    SegmentMap(SegmentMapOperation),
    /// See [`BatchMapOperation`].
    BatchMap(BatchMapOperation),
    /// See [`TruncateSegmentOperation`].
    TruncateSegment(TruncateSegmentOperation),
}

impl Operation {
    /// Returns the operation type.
    #[must_use]
    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::Append(_) => OperationType::Append,
            Self::Seal(_) => OperationType::Seal,
            Self::MergeBatch(_) => OperationType::MergeBatch,
            Self::MetadataCheckpoint(_) => OperationType::MetadataCheckpoint,
            Self::SegmentMap(_) => OperationType::SegmentMap,
            Self::BatchMap(_) => OperationType::BatchMap,
            Self::TruncateSegment(_) => OperationType::TruncateSegment,
        }
    }

    /// Returns the segment this operation targets, if it targets one.
    ///
    /// For merges this is the parent.
    #[must_use]
    pub fn segment_id(&self) -> Option<SegmentId> {
        match self {
            Self::Append(op) => Some(op.segment_id),
            Self::Seal(op) => Some(op.segment_id),
            Self::MergeBatch(op) => Some(op.parent_segment_id),
            Self::SegmentMap(op) => Some(op.segment_id),
            Self::BatchMap(op) => Some(op.batch_segment_id),
            Self::TruncateSegment(op) => Some(op.segment_id),
            Self::MetadataCheckpoint(_) => None,
        }
    }

    /// Returns true for checkpoint records.
    #[must_use]
    pub fn is_checkpoint(&self) -> bool {
        matches!(self, Self::MetadataCheckpoint(_))
    }
}

impl From<AppendOperation> for Operation {
    fn from(op: AppendOperation) -> Self {
        Self::Append(op)
    }
}

impl From<SealOperation> for Operation {
    fn from(op: SealOperation) -> Self {
        Self::Seal(op)
    }
}

impl From<MergeBatchOperation> for Operation {
    fn from(op: MergeBatchOperation) -> Self {
        Self::MergeBatch(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_type_roundtrip() {
        for t in [
            OperationType::Append,
            OperationType::Seal,
            OperationType::MergeBatch,
            OperationType::MetadataCheckpoint,
            OperationType::SegmentMap,
            OperationType::BatchMap,
            OperationType::TruncateSegment,
        ] {
            assert_eq!(OperationType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(OperationType::from_byte(0), None);
        assert_eq!(OperationType::from_byte(200), None);
    }

    #[test]
    fn merge_batch_keeps_its_tag() {
        assert_eq!(OperationType::MergeBatch.as_byte(), 3);
    }
}
