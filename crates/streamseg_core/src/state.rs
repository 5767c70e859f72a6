//! In-memory segment state.
//!
//! The [`SegmentStateTable`] is derived entirely from the operation log:
//! every logged operation is folded into it through [`SegmentStateTable::apply`],
//! both while the store is running and when the log is replayed on open.
//! `apply` depends only on the table and the operation, so replaying the
//! same records from the same checkpoint always produces the same table.
//!
//! The storage writer keeps two extra pieces of bookkeeping here that are
//! not logged: how much of each segment has reached the long-term tier, and
//! which pending merges have been concatenated there. Checkpoints capture
//! both; recovery reconciles them against the tier.

use crate::error::{CoreError, CoreResult};
use crate::operation::{
    AppendOperation, BatchMapOperation, MergeBatchOperation, Operation, SealOperation,
    SegmentMapOperation, TruncateSegmentOperation,
};
use crate::operation::serializer::ends_in_range;
use crate::types::SegmentId;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A merged batch range inside a parent segment whose bytes still live
/// under the batch, because the tier has not concatenated it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMerge {
    /// The merged batch.
    pub batch: SegmentId,
    /// Offset in the parent where the batch starts.
    pub offset: u64,
    /// Length of the batch.
    pub length: u64,
}

impl PendingMerge {
    /// End offset (exclusive) of the range in the parent.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Returns true if `offset` falls inside the range.
    #[must_use]
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.offset && offset < self.end()
    }
}

/// State of a single segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentState {
    /// Segment id.
    pub id: SegmentId,
    /// Segment name, unique within the container.
    pub name: String,
    /// Highest confirmed offset.
    pub length: u64,
    /// Prefix already written to the long-term tier.
    pub storage_length: u64,
    /// First readable offset.
    pub start_offset: u64,
    /// No further appends are accepted.
    pub sealed: bool,
    /// This batch has been merged into its parent.
    pub merged: bool,
    /// Parent segment, for batches.
    pub parent: Option<SegmentId>,
    /// Merged ranges not yet concatenated in the tier, in offset order.
    pub pending_merges: Vec<PendingMerge>,
    /// Last event number applied per append client.
    pub client_events: BTreeMap<Uuid, u64>,
}

impl SegmentState {
    /// Creates an empty, open segment.
    #[must_use]
    pub fn new(id: SegmentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            length: 0,
            storage_length: 0,
            start_offset: 0,
            sealed: false,
            merged: false,
            parent: None,
            pending_merges: Vec::new(),
            client_events: BTreeMap::new(),
        }
    }

    /// Creates an empty batch segment owned by `parent`.
    #[must_use]
    pub fn new_batch(id: SegmentId, name: impl Into<String>, parent: SegmentId) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new(id, name)
        }
    }

    /// Returns true for batch segments.
    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.parent.is_some()
    }

    /// Returns the pending merge covering `offset`, if any.
    #[must_use]
    pub fn pending_merge_at(&self, offset: u64) -> Option<&PendingMerge> {
        self.pending_merges.iter().find(|m| m.contains(offset))
    }

    /// Returns the first pending merge that starts after `offset`.
    #[must_use]
    pub fn next_pending_merge_after(&self, offset: u64) -> Option<&PendingMerge> {
        self.pending_merges.iter().find(|m| m.offset > offset)
    }

    /// Last event number applied for `client`.
    #[must_use]
    pub fn last_event_number(&self, client: &Uuid) -> Option<u64> {
        self.client_events.get(client).copied()
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        if self.merged {
            return Err(CoreError::SegmentMerged(self.id));
        }
        if self.sealed {
            return Err(CoreError::SegmentSealed(self.id));
        }
        Ok(())
    }
}

/// The table of all segments in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentStateTable {
    segments: BTreeMap<SegmentId, SegmentState>,
    names: BTreeMap<String, SegmentId>,
    next_segment_id: u64,
}

impl Default for SegmentStateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentStateTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            segments: BTreeMap::new(),
            names: BTreeMap::new(),
            next_segment_id: 1,
        }
    }

    /// Rebuilds a table from its parts, as decoded from a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if ids or names repeat, or if `next_segment_id`
    /// does not exceed every id in use.
    pub fn from_parts(
        segments: impl IntoIterator<Item = SegmentState>,
        next_segment_id: u64,
    ) -> CoreResult<Self> {
        let mut table = Self {
            segments: BTreeMap::new(),
            names: BTreeMap::new(),
            next_segment_id,
        };
        for segment in segments {
            if segment.id.as_u64() >= next_segment_id {
                return Err(CoreError::serialization(format!(
                    "checkpoint segment {} not below next id {next_segment_id}",
                    segment.id
                )));
            }
            if table.names.contains_key(&segment.name) || table.segments.contains_key(&segment.id)
            {
                return Err(CoreError::serialization(format!(
                    "duplicate checkpoint segment {} ({})",
                    segment.id, segment.name
                )));
            }
            table.names.insert(segment.name.clone(), segment.id);
            table.segments.insert(segment.id, segment);
        }
        Ok(table)
    }

    /// Returns the segment with the given id.
    #[must_use]
    pub fn get(&self, id: SegmentId) -> Option<&SegmentState> {
        self.segments.get(&id)
    }

    /// Returns the segment with the given id or a `SegmentNotFound` error.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentNotFound`] if there is no such segment.
    pub fn require(&self, id: SegmentId) -> CoreResult<&SegmentState> {
        self.segments.get(&id).ok_or(CoreError::SegmentNotFound(id))
    }

    /// Resolves a segment name to its id.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<SegmentId> {
        self.names.get(name).copied()
    }

    /// Iterates all segments in id order.
    pub fn iter(&self) -> impl Iterator<Item = &SegmentState> {
        self.segments.values()
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if there are no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Id the next created segment will get.
    #[must_use]
    pub fn next_segment_id(&self) -> SegmentId {
        SegmentId::new(self.next_segment_id)
    }

    /// Checks whether `op` can be applied, without changing anything.
    ///
    /// # Errors
    ///
    /// Returns the error `apply` would fail with.
    pub fn validate(&self, op: &Operation) -> CoreResult<()> {
        match op {
            Operation::Append(op) => self.validate_append(op),
            Operation::Seal(op) => self.validate_seal(op),
            Operation::MergeBatch(op) => self.validate_merge(op),
            Operation::MetadataCheckpoint(_) => Ok(()),
            Operation::SegmentMap(op) => self.validate_new(op.segment_id, &op.name),
            Operation::BatchMap(op) => self.validate_batch(op),
            Operation::TruncateSegment(op) => self.validate_truncate(op),
        }
    }

    /// Applies a logged operation.
    ///
    /// The operation is validated first; on error the table is unchanged.
    ///
    /// # Errors
    ///
    /// Returns the validation error. [`CoreError::MergeOrderingViolation`]
    /// means the log order itself is broken.
    pub fn apply(&mut self, op: &Operation) -> CoreResult<()> {
        self.validate(op)?;
        match op {
            Operation::Append(op) => {
                if let Some(segment) = self.segments.get_mut(&op.segment_id) {
                    segment.length += op.len();
                    segment
                        .client_events
                        .insert(op.context.client_id, op.context.event_number);
                }
            }
            Operation::Seal(op) => {
                if let Some(segment) = self.segments.get_mut(&op.segment_id) {
                    segment.sealed = true;
                }
            }
            Operation::MergeBatch(op) => {
                if let Some(batch) = self.segments.get_mut(&op.batch_segment_id) {
                    batch.merged = true;
                }
                if let Some(parent) = self.segments.get_mut(&op.parent_segment_id) {
                    parent.pending_merges.push(PendingMerge {
                        batch: op.batch_segment_id,
                        offset: op.parent_offset,
                        length: op.length,
                    });
                    parent.length += op.length;
                }
            }
            Operation::MetadataCheckpoint(op) => {
                *self = op.table.clone();
            }
            Operation::SegmentMap(op) => {
                self.insert(SegmentState::new(op.segment_id, op.name.clone()));
            }
            Operation::BatchMap(op) => {
                self.insert(SegmentState::new_batch(
                    op.batch_segment_id,
                    op.name.clone(),
                    op.parent_segment_id,
                ));
            }
            Operation::TruncateSegment(op) => {
                if let Some(segment) = self.segments.get_mut(&op.segment_id) {
                    segment.start_offset = op.offset;
                }
            }
        }
        Ok(())
    }

    /// Records that the tier holds the first `length` bytes of `id`.
    pub fn set_storage_length(&mut self, id: SegmentId, length: u64) {
        if let Some(segment) = self.segments.get_mut(&id) {
            segment.storage_length = segment.storage_length.max(length.min(segment.length));
        }
    }

    /// Finishes a merge once the tier has concatenated the batch into the
    /// parent: drops the redirect, extends the parent's storage length, and
    /// removes the batch from the table.
    pub fn complete_merge(&mut self, parent: SegmentId, batch: SegmentId) -> Option<PendingMerge> {
        let parent_state = self.segments.get_mut(&parent)?;
        let index = parent_state
            .pending_merges
            .iter()
            .position(|m| m.batch == batch)?;
        let merge = parent_state.pending_merges.remove(index);
        parent_state.storage_length = parent_state.storage_length.max(merge.end());
        if let Some(removed) = self.segments.remove(&batch) {
            self.names.remove(&removed.name);
        }
        Some(merge)
    }

    fn insert(&mut self, segment: SegmentState) {
        self.next_segment_id = self.next_segment_id.max(segment.id.as_u64() + 1);
        self.names.insert(segment.name.clone(), segment.id);
        self.segments.insert(segment.id, segment);
    }

    fn validate_append(&self, op: &AppendOperation) -> CoreResult<()> {
        let segment = self.require(op.segment_id)?;
        segment.ensure_writable()?;
        if op.offset != segment.length {
            return Err(CoreError::invalid_operation(format!(
                "append to {} at offset {} but length is {}",
                op.segment_id, op.offset, segment.length
            )));
        }
        if !ends_in_range(op.offset, op.len()) {
            return Err(CoreError::invalid_operation(format!(
                "append of {} bytes to {} overflows its length",
                op.len(),
                op.segment_id
            )));
        }
        Ok(())
    }

    fn validate_seal(&self, op: &SealOperation) -> CoreResult<()> {
        let segment = self.require(op.segment_id)?;
        segment.ensure_writable()?;
        if op.length != segment.length {
            return Err(CoreError::invalid_operation(format!(
                "seal of {} at length {} but length is {}",
                op.segment_id, op.length, segment.length
            )));
        }
        Ok(())
    }

    fn validate_merge(&self, op: &MergeBatchOperation) -> CoreResult<()> {
        let parent = self.require(op.parent_segment_id)?;
        let batch = self.require(op.batch_segment_id)?;
        parent.ensure_writable()?;
        if batch.merged {
            return Err(CoreError::SegmentMerged(batch.id));
        }
        if batch.parent != Some(parent.id) {
            return Err(CoreError::invalid_operation(format!(
                "{} is not a batch of {}",
                batch.id, parent.id
            )));
        }
        if !batch.sealed {
            return Err(CoreError::SegmentNotSealed(batch.id));
        }
        if op.length != batch.length {
            return Err(CoreError::invalid_operation(format!(
                "merge of {} with length {} but batch length is {}",
                batch.id, op.length, batch.length
            )));
        }
        if op.parent_offset != parent.length {
            return Err(CoreError::MergeOrderingViolation {
                parent: parent.id,
                recorded: op.parent_offset,
                actual: parent.length,
            });
        }
        if !ends_in_range(op.parent_offset, op.length) {
            return Err(CoreError::invalid_operation(format!(
                "merge of {} overflows the length of {}",
                batch.id, parent.id
            )));
        }
        Ok(())
    }

    fn validate_new(&self, id: SegmentId, name: &str) -> CoreResult<()> {
        if name.is_empty() {
            return Err(CoreError::invalid_operation("segment name is empty"));
        }
        if self.names.contains_key(name) {
            return Err(CoreError::segment_exists(name));
        }
        if self.segments.contains_key(&id) {
            return Err(CoreError::invalid_operation(format!(
                "segment id {id} already in use"
            )));
        }
        Ok(())
    }

    fn validate_batch(&self, op: &BatchMapOperation) -> CoreResult<()> {
        let parent = self.require(op.parent_segment_id)?;
        parent.ensure_writable()?;
        if parent.is_batch() {
            return Err(CoreError::invalid_operation(format!(
                "{} is itself a batch",
                parent.id
            )));
        }
        self.validate_new(op.batch_segment_id, &op.name)
    }

    fn validate_truncate(&self, op: &TruncateSegmentOperation) -> CoreResult<()> {
        let segment = self.require(op.segment_id)?;
        if segment.merged {
            return Err(CoreError::SegmentMerged(segment.id));
        }
        if op.offset < segment.start_offset || op.offset > segment.length {
            return Err(CoreError::invalid_operation(format!(
                "truncate {} at {} outside [{}, {}]",
                segment.id, op.offset, segment.start_offset, segment.length
            )));
        }
        Ok(())
    }
}

/// Builds the creation record for a new segment.
#[must_use]
pub fn segment_map(table: &SegmentStateTable, name: &str) -> SegmentMapOperation {
    SegmentMapOperation {
        segment_id: table.next_segment_id(),
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{AppendIntent, MergeBatchIntent, SealIntent};
    use crate::types::AppendContext;

    fn ctx(n: u64) -> AppendContext {
        AppendContext::new(Uuid::from_u128(7), n)
    }

    fn create(table: &mut SegmentStateTable, name: &str) -> SegmentId {
        let op = segment_map(table, name);
        let id = op.segment_id;
        table.apply(&Operation::SegmentMap(op)).unwrap();
        id
    }

    fn create_batch(table: &mut SegmentStateTable, parent: SegmentId, name: &str) -> SegmentId {
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

    fn append(table: &mut SegmentStateTable, id: SegmentId, data: &[u8]) -> CoreResult<()> {
        let offset = table.require(id)?.length;
        let op = AppendIntent::new(id, data.to_vec(), ctx(offset)).resolve(offset);
        table.apply(&op.into())
    }

    fn seal(table: &mut SegmentStateTable, id: SegmentId) -> CoreResult<()> {
        let length = table.require(id)?.length;
        table.apply(&SealIntent::new(id).resolve(length).into())
    }

    #[test]
    fn append_extends_length_and_records_event() {
        let mut table = SegmentStateTable::new();
        let id = create(&mut table, "s");
        append(&mut table, id, b"hello").unwrap();
        append(&mut table, id, b"!").unwrap();

        let seg = table.get(id).unwrap();
        assert_eq!(seg.length, 6);
        assert_eq!(seg.last_event_number(&Uuid::from_u128(7)), Some(5));
    }

    #[test]
    fn append_at_wrong_offset_rejected() {
        let mut table = SegmentStateTable::new();
        let id = create(&mut table, "s");
        let op = AppendIntent::new(id, &b"x"[..], ctx(0)).resolve(3);
        assert!(matches!(
            table.apply(&op.into()),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert_eq!(table.get(id).unwrap().length, 0);
    }

    #[test]
    fn sealed_segment_rejects_appends() {
        let mut table = SegmentStateTable::new();
        let id = create(&mut table, "s");
        append(&mut table, id, b"abc").unwrap();
        seal(&mut table, id).unwrap();

        assert!(matches!(
            append(&mut table, id, b"d"),
            Err(CoreError::SegmentSealed(_))
        ));
        assert!(matches!(seal(&mut table, id), Err(CoreError::SegmentSealed(_))));
        assert_eq!(table.get(id).unwrap().length, 3);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut table = SegmentStateTable::new();
        create(&mut table, "s");
        let op = segment_map(&table, "s");
        assert!(matches!(
            table.apply(&Operation::SegmentMap(op)),
            Err(CoreError::SegmentExists { .. })
        ));
    }

    #[test]
    fn merge_folds_batch_into_parent() {
        let mut table = SegmentStateTable::new();
        let parent = create(&mut table, "p");
        append(&mut table, parent, b"0123").unwrap();
        let batch = create_batch(&mut table, parent, "p#b");
        append(&mut table, batch, b"abcdef").unwrap();
        seal(&mut table, batch).unwrap();

        let op = MergeBatchIntent::new(batch, parent).resolve(6, 4);
        table.apply(&op.into()).unwrap();

        let p = table.get(parent).unwrap();
        assert_eq!(p.length, 10);
        assert_eq!(
            p.pending_merges,
            vec![PendingMerge {
                batch,
                offset: 4,
                length: 6
            }]
        );
        assert!(table.get(batch).unwrap().merged);
        assert!(matches!(
            append(&mut table, batch, b"z"),
            Err(CoreError::SegmentMerged(_))
        ));
    }

    #[test]
    fn merge_with_stale_parent_offset_is_ordering_violation() {
        let mut table = SegmentStateTable::new();
        let parent = create(&mut table, "p");
        let batch = create_batch(&mut table, parent, "p#b");
        append(&mut table, batch, b"abc").unwrap();
        seal(&mut table, batch).unwrap();
        append(&mut table, parent, b"01").unwrap();

        let op = MergeBatchIntent::new(batch, parent).resolve(3, 0);
        let err = table.apply(&op.into()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(table.get(parent).unwrap().length, 2);
        assert!(!table.get(batch).unwrap().merged);
    }

    #[test]
    fn merge_requires_sealed_batch() {
        let mut table = SegmentStateTable::new();
        let parent = create(&mut table, "p");
        let batch = create_batch(&mut table, parent, "p#b");
        let op = MergeBatchIntent::new(batch, parent).resolve(0, 0);
        assert!(matches!(
            table.validate(&op.into()),
            Err(CoreError::SegmentNotSealed(_))
        ));
    }

    #[test]
    fn complete_merge_removes_batch() {
        let mut table = SegmentStateTable::new();
        let parent = create(&mut table, "p");
        let batch = create_batch(&mut table, parent, "p#b");
        append(&mut table, batch, b"abc").unwrap();
        seal(&mut table, batch).unwrap();
        table
            .apply(&MergeBatchIntent::new(batch, parent).resolve(3, 0).into())
            .unwrap();

        let merge = table.complete_merge(parent, batch).unwrap();
        assert_eq!(merge.end(), 3);
        assert!(table.get(batch).is_none());
        assert!(table.lookup("p#b").is_none());
        let p = table.get(parent).unwrap();
        assert!(p.pending_merges.is_empty());
        assert_eq!(p.storage_length, 3);
    }

    #[test]
    fn truncate_bounds() {
        let mut table = SegmentStateTable::new();
        let id = create(&mut table, "s");
        append(&mut table, id, b"0123456789").unwrap();
        let op = |offset| {
            Operation::TruncateSegment(TruncateSegmentOperation {
                segment_id: id,
                offset,
            })
        };
        table.apply(&op(4)).unwrap();
        assert_eq!(table.get(id).unwrap().start_offset, 4);
        assert!(table.apply(&op(2)).is_err());
        assert!(table.apply(&op(11)).is_err());
    }

    #[test]
    fn checkpoint_replaces_table() {
        let mut table = SegmentStateTable::new();
        let a = create(&mut table, "a");
        append(&mut table, a, b"xyz").unwrap();
        let snapshot = table.clone();

        create(&mut table, "b");
        table
            .apply(&Operation::MetadataCheckpoint(
                crate::operation::MetadataCheckpointOperation { table: snapshot.clone() },
            ))
            .unwrap();
        assert_eq!(table, snapshot);
        assert!(table.lookup("b").is_none());
    }

    #[test]
    fn ids_are_never_reused() {
        let mut table = SegmentStateTable::new();
        let parent = create(&mut table, "p");
        let batch = create_batch(&mut table, parent, "p#b");
        seal(&mut table, batch).unwrap();
        table
            .apply(&MergeBatchIntent::new(batch, parent).resolve(0, 0).into())
            .unwrap();
        table.complete_merge(parent, batch);
        assert!(table.next_segment_id() > batch);
    }

    #[test]
    fn append_overflowing_length_rejected() {
        let mut segment = SegmentState::new(SegmentId::new(1), "s");
        segment.length = i64::MAX as u64 - 1;
        let mut table = SegmentStateTable::from_parts([segment], 2).unwrap();

        let op = AppendIntent::new(SegmentId::new(1), &b"abc"[..], ctx(1))
            .resolve(i64::MAX as u64 - 1);
        assert!(matches!(
            table.apply(&op.into()),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert_eq!(table.get(SegmentId::new(1)).unwrap().length, i64::MAX as u64 - 1);
    }
}
