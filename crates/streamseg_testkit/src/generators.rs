//! proptest strategies for operations, segment names and workloads.
//!
//! Provides strategies for generating random operations and store
//! workloads that stay within the limits the log can encode.

use proptest::prelude::*;
use streamseg_core::operation::{
    AppendIntent, BatchMapOperation, MergeBatchIntent, Operation, SealIntent, SegmentMapOperation,
    TruncateSegmentOperation,
};
use streamseg_core::{AppendContext, SegmentId};
use uuid::Uuid;

const MAX_WIRE: u64 = i64::MAX as u64;

/// Strategy for generating assigned segment ids.
pub fn segment_id_strategy() -> impl Strategy<Value = SegmentId> {
    (1..=MAX_WIRE).prop_map(SegmentId::new)
}

/// Strategy for generating offsets and lengths that fit the wire format.
pub fn wire_value_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![
        3 => 0u64..1 << 20,
        1 => 0..=MAX_WIRE,
    ]
}

/// Strategy for generating valid segment names.
pub fn segment_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_./-]{0,31}").expect("Invalid regex")
}

/// Strategy for generating append payloads.
pub fn append_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for generating append contexts.
pub fn append_context_strategy() -> impl Strategy<Value = AppendContext> {
    (any::<u128>(), 0..=MAX_WIRE)
        .prop_map(|(client, event)| AppendContext::new(Uuid::from_u128(client), event))
}

/// Strategy for generating logged (resolved) operations, excluding
/// checkpoints.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => (
            segment_id_strategy(),
            wire_value_strategy(),
            append_data_strategy(),
            append_context_strategy()
        )
            .prop_map(|(id, offset, data, ctx)| {
                AppendIntent::new(id, data, ctx).resolve(offset).into()
            }),
        1 => (segment_id_strategy(), wire_value_strategy())
            .prop_map(|(id, length)| SealIntent::new(id).resolve(length).into()),
        1 => (segment_id_strategy(), segment_id_strategy(), 0u64..1 << 30, 0u64..1 << 30)
            .prop_filter("batch must differ from parent", |(b, p, _, _)| b != p)
            .prop_map(|(batch, parent, length, offset)| {
                MergeBatchIntent::new(batch, parent).resolve(length, offset).into()
            }),
        1 => (segment_id_strategy(), segment_name_strategy())
            .prop_map(|(segment_id, name)| {
                Operation::SegmentMap(SegmentMapOperation { segment_id, name })
            }),
        1 => (segment_id_strategy(), segment_name_strategy(), segment_id_strategy())
            .prop_map(|(batch_segment_id, name, parent_segment_id)| {
                Operation::BatchMap(BatchMapOperation {
                    batch_segment_id,
                    name,
                    parent_segment_id,
                })
            }),
        1 => (segment_id_strategy(), wire_value_strategy())
            .prop_map(|(segment_id, offset)| {
                Operation::TruncateSegment(TruncateSegmentOperation { segment_id, offset })
            }),
    ]
}

/// One step of a store workload.
///
/// Segments are referred to by index into the list of segments the
/// workload has created so far (taken modulo its length), so every
/// generated workload can be replayed against any store.
#[derive(Debug, Clone)]
pub enum WorkloadOp {
    /// Create a new top-level segment
    Create,
    /// Create a batch of a segment
    CreateBatch {
        /// Parent index
        parent: usize,
    },
    /// Append to a segment
    Append {
        /// Segment index
        segment: usize,
        /// Payload
        data: Vec<u8>,
    },
    /// Seal a batch and merge it into its parent
    Merge {
        /// Batch index
        batch: usize,
    },
    /// Seal a segment
    Seal {
        /// Segment index
        segment: usize,
    },
    /// Truncate a segment at a fraction of its length
    Truncate {
        /// Segment index
        segment: usize,
        /// Percentage of the current length
        percent: u8,
    },
    /// Flush to the tier
    Flush,
    /// Take a checkpoint
    Checkpoint,
}

/// Strategy for generating workload steps.
pub fn workload_op_strategy() -> impl Strategy<Value = WorkloadOp> {
    prop_oneof![
        2 => Just(WorkloadOp::Create),
        1 => any::<usize>().prop_map(|parent| WorkloadOp::CreateBatch { parent }),
        8 => (any::<usize>(), prop::collection::vec(any::<u8>(), 1..64))
            .prop_map(|(segment, data)| WorkloadOp::Append { segment, data }),
        1 => any::<usize>().prop_map(|batch| WorkloadOp::Merge { batch }),
        1 => any::<usize>().prop_map(|segment| WorkloadOp::Seal { segment }),
        1 => (any::<usize>(), 0u8..=100)
            .prop_map(|(segment, percent)| WorkloadOp::Truncate { segment, percent }),
        1 => Just(WorkloadOp::Flush),
        1 => Just(WorkloadOp::Checkpoint),
    ]
}

/// Strategy for generating a workload.
pub fn workload_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<WorkloadOp>> {
    prop::collection::vec(workload_op_strategy(), min_ops..max_ops)
}

/// How hard a property test searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Depth {
    /// A few dozen cases. Used for workloads that open stores per case.
    Smoke,
    /// Proptest's usual case count.
    #[default]
    Standard,
    /// Long runs for soak testing.
    Soak,
}

impl Depth {
    /// Proptest configuration for this depth.
    #[must_use]
    pub fn config(self) -> ProptestConfig {
        let (cases, max_shrink_iters) = match self {
            Depth::Smoke => (32, 128),
            Depth::Standard => (256, 1024),
            Depth::Soak => (2048, 8192),
        };
        ProptestConfig {
            cases,
            max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
