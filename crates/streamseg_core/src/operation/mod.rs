//! Operations: the typed mutation records stored in the durable log.
//!
//! An [`Operation`] is a closed enum with one variant per record type. The
//! variants whose numeric fields depend on where the write lands (appends,
//! seals, merges) are built through an intent in [`intent`] and only exist
//! once those fields are resolved. [`serializer`] turns operations into
//! the versioned binary record format and back.

pub mod intent;
mod record;
pub mod serializer;

pub use intent::{AppendIntent, MergeBatchIntent, SealIntent};
pub use record::{
    AppendOperation, BatchMapOperation, MergeBatchOperation, MetadataCheckpointOperation,
    Operation, OperationHeader, OperationType, SealOperation, SegmentMapOperation,
    TruncateSegmentOperation,
};
pub use serializer::{deserialize, serialize};
