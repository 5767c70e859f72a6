//! Binary encoding of operations.
//!
//! Every record is:
//!
//! ```text
//! | type (1) | version (1) | sequence_number (8) | payload ... |
//! ```
//!
//! Integers are big-endian, and sequence numbers, ids, offsets and lengths
//! are signed 64-bit on the wire. Strings are a `u16` length followed by
//! UTF-8. Byte arrays are a `u32` length followed by the bytes. UUIDs are
//! 16 raw bytes.
//!
//! Encoding checks every field first and writes nothing if one is out of
//! range. Decoding never panics: short input, an unknown tag, a version
//! newer than the decoder knows, or leftover bytes all produce
//! [`CoreError::Serialization`].

use crate::error::{CoreError, CoreResult};
use crate::operation::record::{
    AppendOperation, BatchMapOperation, MergeBatchOperation, MetadataCheckpointOperation,
    Operation, OperationHeader, OperationType, SealOperation, SegmentMapOperation,
    TruncateSegmentOperation,
};
use crate::state::{PendingMerge, SegmentState, SegmentStateTable};
use crate::types::{AppendContext, SegmentId, SequenceNumber};
use bytes::{Buf, BufMut, Bytes};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Size of the record header in bytes.
pub const HEADER_SIZE: usize = 10;

/// Longest segment name that can be encoded.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Largest append payload that can be encoded.
pub const MAX_DATA_LEN: usize = u32::MAX as usize;

const FLAG_SEALED: u8 = 0b01;
const FLAG_MERGED: u8 = 0b10;
const NO_PARENT: i64 = -1;

/// Serializes `op` with the given sequence number into a new buffer.
///
/// # Errors
///
/// Returns [`CoreError::SerializationPrecondition`] naming the first field
/// that cannot be encoded.
pub fn serialize(sequence_number: SequenceNumber, op: &Operation) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    serialize_into(sequence_number, op, &mut buf)?;
    Ok(buf)
}

/// Serializes `op` onto the end of `buf`.
///
/// `buf` is untouched if a precondition fails.
///
/// # Errors
///
/// Returns [`CoreError::SerializationPrecondition`] naming the first field
/// that cannot be encoded.
pub fn serialize_into(
    sequence_number: SequenceNumber,
    op: &Operation,
    buf: &mut Vec<u8>,
) -> CoreResult<()> {
    check_preconditions(sequence_number, op)?;

    let op_type = op.operation_type();
    buf.put_u8(op_type.as_byte());
    buf.put_u8(op_type.current_version());
    buf.put_i64(wire(sequence_number.as_u64()));

    match op {
        Operation::Append(op) => {
            buf.put_i64(wire(op.segment_id.as_u64()));
            buf.put_i64(wire(op.offset));
            buf.put_slice(op.context.client_id.as_bytes());
            buf.put_i64(wire(op.context.event_number));
            put_bytes(buf, &op.data);
        }
        Operation::Seal(op) => {
            buf.put_i64(wire(op.segment_id.as_u64()));
            buf.put_i64(wire(op.length));
        }
        Operation::MergeBatch(op) => {
            buf.put_i64(wire(op.parent_segment_id.as_u64()));
            buf.put_i64(wire(op.batch_segment_id.as_u64()));
            buf.put_i64(wire(op.length));
            buf.put_i64(wire(op.parent_offset));
        }
        Operation::MetadataCheckpoint(op) => put_table(buf, &op.table),
        Operation::SegmentMap(op) => {
            buf.put_i64(wire(op.segment_id.as_u64()));
            put_str(buf, &op.name);
        }
        Operation::BatchMap(op) => {
            buf.put_i64(wire(op.batch_segment_id.as_u64()));
            put_str(buf, &op.name);
            buf.put_i64(wire(op.parent_segment_id.as_u64()));
        }
        Operation::TruncateSegment(op) => {
            buf.put_i64(wire(op.segment_id.as_u64()));
            buf.put_i64(wire(op.offset));
        }
    }
    Ok(())
}

/// Decodes one complete record.
///
/// # Errors
///
/// Returns [`CoreError::Serialization`] for any malformed input.
pub fn deserialize(bytes: &[u8]) -> CoreResult<(OperationHeader, Operation)> {
    let mut reader = RecordReader::new(bytes);
    let header = read_header(&mut reader)?;
    let op = deserialize_body(&header, &mut reader)?;
    reader.finish(header.operation_type)?;
    Ok((header, op))
}

/// Reads and validates a record header.
///
/// # Errors
///
/// Returns [`CoreError::Serialization`] for short input, an unknown type
/// tag, or a version newer than this decoder understands.
pub fn read_header(reader: &mut RecordReader<'_>) -> CoreResult<OperationHeader> {
    let tag = reader.u8("type")?;
    let operation_type = OperationType::from_byte(tag)
        .ok_or_else(|| CoreError::serialization(format!("unknown operation type: {tag}")))?;
    let version = reader.u8("version")?;
    if version > operation_type.current_version() {
        return Err(CoreError::serialization(format!(
            "{} version {version} is newer than supported version {}",
            operation_type.name(),
            operation_type.current_version()
        )));
    }
    let sequence_number = SequenceNumber::new(reader.non_negative("sequence_number")?);
    Ok(OperationHeader {
        operation_type,
        version,
        sequence_number,
    })
}

/// Decodes the payload that follows `header`.
///
/// # Errors
///
/// Returns [`CoreError::Serialization`] for any malformed input.
pub fn deserialize_body(
    header: &OperationHeader,
    reader: &mut RecordReader<'_>,
) -> CoreResult<Operation> {
    let op = match header.operation_type {
        OperationType::Append => Operation::Append(AppendOperation {
            segment_id: reader.segment_id("segment_id")?,
            offset: reader.non_negative("offset")?,
            context: AppendContext {
                client_id: reader.uuid("client_id")?,
                event_number: reader.non_negative("event_number")?,
            },
            data: reader.bytes("data")?,
        }),
        OperationType::Seal => Operation::Seal(SealOperation {
            segment_id: reader.segment_id("segment_id")?,
            length: reader.non_negative("length")?,
        }),
        OperationType::MergeBatch => Operation::MergeBatch(MergeBatchOperation {
            parent_segment_id: reader.segment_id("parent_segment_id")?,
            batch_segment_id: reader.segment_id("batch_segment_id")?,
            length: reader.non_negative("length")?,
            parent_offset: reader.non_negative("parent_offset")?,
        }),
        OperationType::MetadataCheckpoint => {
            Operation::MetadataCheckpoint(MetadataCheckpointOperation {
                table: read_table(reader, header.version)?,
            })
        }
        OperationType::SegmentMap => Operation::SegmentMap(SegmentMapOperation {
            segment_id: reader.segment_id("segment_id")?,
            name: reader.string("name")?,
        }),
        OperationType::BatchMap => Operation::BatchMap(BatchMapOperation {
            batch_segment_id: reader.segment_id("batch_segment_id")?,
            name: reader.string("name")?,
            parent_segment_id: reader.segment_id("parent_segment_id")?,
        }),
        OperationType::TruncateSegment => {
            Operation::TruncateSegment(TruncateSegmentOperation {
                segment_id: reader.segment_id("segment_id")?,
                offset: reader.non_negative("offset")?,
            })
        }
    };
    let extent = match &op {
        Operation::Append(op) => Some(("data", op.offset, op.len())),
        Operation::MergeBatch(op) => Some(("length", op.parent_offset, op.length)),
        _ => None,
    };
    if let Some((field, start, len)) = extent {
        if !ends_in_range(start, len) {
            return Err(CoreError::serialization(format!(
                "{field} of {len} bytes at offset {start} ends past i64::MAX"
            )));
        }
    }
    Ok(op)
}

/// Whether `start + len` is still a valid wire offset.
pub(crate) fn ends_in_range(start: u64, len: u64) -> bool {
    start.checked_add(len).is_some_and(|end| end <= i64::MAX as u64)
}

fn check_preconditions(sequence_number: SequenceNumber, op: &Operation) -> CoreResult<()> {
    if sequence_number.as_u64() == 0 {
        return Err(CoreError::precondition(
            "sequence_number",
            "not assigned",
        ));
    }
    check_i64("sequence_number", sequence_number.as_u64())?;

    match op {
        Operation::Append(op) => {
            check_id("segment_id", op.segment_id)?;
            check_i64("offset", op.offset)?;
            check_i64("event_number", op.context.event_number)?;
            if op.data.len() > MAX_DATA_LEN {
                return Err(CoreError::precondition(
                    "data",
                    format!("{} bytes exceeds {MAX_DATA_LEN}", op.data.len()),
                ));
            }
            if !ends_in_range(op.offset, op.len()) {
                return Err(CoreError::precondition(
                    "data",
                    "offset + length exceeds i64::MAX",
                ));
            }
        }
        Operation::Seal(op) => {
            check_id("segment_id", op.segment_id)?;
            check_i64("length", op.length)?;
        }
        Operation::MergeBatch(op) => {
            check_id("parent_segment_id", op.parent_segment_id)?;
            check_id("batch_segment_id", op.batch_segment_id)?;
            if op.parent_segment_id == op.batch_segment_id {
                return Err(CoreError::precondition(
                    "batch_segment_id",
                    "equals parent_segment_id",
                ));
            }
            check_i64("length", op.length)?;
            check_i64("parent_offset", op.parent_offset)?;
            if !ends_in_range(op.parent_offset, op.length) {
                return Err(CoreError::precondition(
                    "length",
                    "parent_offset + length exceeds i64::MAX",
                ));
            }
        }
        Operation::MetadataCheckpoint(op) => check_table(&op.table)?,
        Operation::SegmentMap(op) => {
            check_id("segment_id", op.segment_id)?;
            check_name(&op.name)?;
        }
        Operation::BatchMap(op) => {
            check_id("batch_segment_id", op.batch_segment_id)?;
            check_name(&op.name)?;
            check_id("parent_segment_id", op.parent_segment_id)?;
        }
        Operation::TruncateSegment(op) => {
            check_id("segment_id", op.segment_id)?;
            check_i64("offset", op.offset)?;
        }
    }
    Ok(())
}

fn check_table(table: &SegmentStateTable) -> CoreResult<()> {
    check_i64("next_segment_id", table.next_segment_id().as_u64())?;
    if table.len() > u32::MAX as usize {
        return Err(CoreError::precondition("segments", "too many segments"));
    }
    for segment in table.iter() {
        check_id("segment_id", segment.id)?;
        check_name(&segment.name)?;
        check_i64("length", segment.length)?;
        check_i64("storage_length", segment.storage_length)?;
        check_i64("start_offset", segment.start_offset)?;
        if let Some(parent) = segment.parent {
            check_id("parent", parent)?;
        }
        for merge in &segment.pending_merges {
            check_id("pending_merge.batch", merge.batch)?;
            check_i64("pending_merge.offset", merge.offset)?;
            check_i64("pending_merge.length", merge.length)?;
        }
        for event in segment.client_events.values() {
            check_i64("event_number", *event)?;
        }
    }
    Ok(())
}

fn check_i64(field: &'static str, value: u64) -> CoreResult<()> {
    if value > i64::MAX as u64 {
        return Err(CoreError::precondition(
            field,
            format!("{value} exceeds i64::MAX"),
        ));
    }
    Ok(())
}

fn check_id(field: &'static str, id: SegmentId) -> CoreResult<()> {
    if id.as_u64() == 0 {
        return Err(CoreError::precondition(field, "not assigned"));
    }
    check_i64(field, id.as_u64())
}

fn check_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::precondition("name", "empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::precondition(
            "name",
            format!("{} bytes exceeds {MAX_NAME_LEN}", name.len()),
        ));
    }
    Ok(())
}

// Only called after `check_preconditions`, so the value fits.
fn wire(value: u64) -> i64 {
    value as i64
}

// Lengths below are bounded by `check_preconditions`.
fn put_str(buf: &mut Vec<u8>, value: &str) {
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, value: &[u8]) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

fn put_table(buf: &mut Vec<u8>, table: &SegmentStateTable) {
    buf.put_i64(wire(table.next_segment_id().as_u64()));
    buf.put_u32(table.len() as u32);
    for segment in table.iter() {
        buf.put_i64(wire(segment.id.as_u64()));
        put_str(buf, &segment.name);
        buf.put_i64(wire(segment.length));
        buf.put_i64(wire(segment.storage_length));
        buf.put_i64(wire(segment.start_offset));
        let mut flags = 0;
        if segment.sealed {
            flags |= FLAG_SEALED;
        }
        if segment.merged {
            flags |= FLAG_MERGED;
        }
        buf.put_u8(flags);
        buf.put_i64(segment.parent.map_or(NO_PARENT, |p| wire(p.as_u64())));
        buf.put_u32(segment.pending_merges.len() as u32);
        for merge in &segment.pending_merges {
            buf.put_i64(wire(merge.batch.as_u64()));
            buf.put_i64(wire(merge.offset));
            buf.put_i64(wire(merge.length));
        }
        buf.put_u32(segment.client_events.len() as u32);
        for (client, event) in &segment.client_events {
            buf.put_slice(client.as_bytes());
            buf.put_i64(wire(*event));
        }
    }
}

// Version 0 checkpoints predate per-client event tracking.
fn read_table(reader: &mut RecordReader<'_>, version: u8) -> CoreResult<SegmentStateTable> {
    let next_segment_id = reader.non_negative("next_segment_id")?;
    let count = reader.u32("segment_count")?;
    let mut segments = Vec::new();
    for _ in 0..count {
        let id = reader.segment_id("segment_id")?;
        let name = reader.string("name")?;
        let mut segment = SegmentState::new(id, name);
        segment.length = reader.non_negative("length")?;
        segment.storage_length = reader.non_negative("storage_length")?;
        segment.start_offset = reader.non_negative("start_offset")?;
        let flags = reader.u8("flags")?;
        if flags & !(FLAG_SEALED | FLAG_MERGED) != 0 {
            return Err(CoreError::serialization(format!(
                "unknown segment flags: {flags:#04x}"
            )));
        }
        segment.sealed = flags & FLAG_SEALED != 0;
        segment.merged = flags & FLAG_MERGED != 0;
        segment.parent = match reader.i64("parent")? {
            NO_PARENT => None,
            raw => Some(SegmentId::new(non_negative("parent", raw)?)),
        };
        let merges = reader.u32("pending_merge_count")?;
        for _ in 0..merges {
            segment.pending_merges.push(PendingMerge {
                batch: reader.segment_id("pending_merge.batch")?,
                offset: reader.non_negative("pending_merge.offset")?,
                length: reader.non_negative("pending_merge.length")?,
            });
        }
        if version >= 1 {
            let events = reader.u32("client_event_count")?;
            let mut client_events = BTreeMap::new();
            for _ in 0..events {
                let client = reader.uuid("client_id")?;
                client_events.insert(client, reader.non_negative("event_number")?);
            }
            segment.client_events = client_events;
        }
        segments.push(segment);
    }
    SegmentStateTable::from_parts(segments, next_segment_id)
}

fn non_negative(field: &str, raw: i64) -> CoreResult<u64> {
    u64::try_from(raw)
        .map_err(|_| CoreError::serialization(format!("negative {field}: {raw}")))
}

/// Bounds-checked reader over one record's bytes.
#[derive(Debug)]
pub struct RecordReader<'a> {
    buf: &'a [u8],
}

impl<'a> RecordReader<'a> {
    /// Creates a reader over `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not consumed yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, n: usize, field: &str) -> CoreResult<()> {
        if self.buf.len() < n {
            return Err(CoreError::serialization(format!(
                "unexpected end of record reading {field}: need {n} bytes, have {}",
                self.buf.len()
            )));
        }
        Ok(())
    }

    fn finish(&self, op_type: OperationType) -> CoreResult<()> {
        if !self.buf.is_empty() {
            return Err(CoreError::serialization(format!(
                "{} bytes trailing {} record",
                self.buf.len(),
                op_type.name()
            )));
        }
        Ok(())
    }

    fn u8(&mut self, field: &str) -> CoreResult<u8> {
        self.need(1, field)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, field: &str) -> CoreResult<u16> {
        self.need(2, field)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self, field: &str) -> CoreResult<u32> {
        self.need(4, field)?;
        Ok(self.buf.get_u32())
    }

    fn i64(&mut self, field: &str) -> CoreResult<i64> {
        self.need(8, field)?;
        Ok(self.buf.get_i64())
    }

    fn non_negative(&mut self, field: &str) -> CoreResult<u64> {
        let raw = self.i64(field)?;
        non_negative(field, raw)
    }

    fn segment_id(&mut self, field: &str) -> CoreResult<SegmentId> {
        Ok(SegmentId::new(self.non_negative(field)?))
    }

    fn uuid(&mut self, field: &str) -> CoreResult<Uuid> {
        self.need(16, field)?;
        let mut raw = [0u8; 16];
        self.buf.copy_to_slice(&mut raw);
        Ok(Uuid::from_bytes(raw))
    }

    fn take(&mut self, len: usize, field: &str) -> CoreResult<&'a [u8]> {
        self.need(len, field)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn string(&mut self, field: &str) -> CoreResult<String> {
        let len = self.u16(field)? as usize;
        let raw = self.take(len, field)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| CoreError::serialization(format!("invalid UTF-8 in {field}: {e}")))
    }

    fn bytes(&mut self, field: &str) -> CoreResult<Bytes> {
        let len = self.u32(field)? as usize;
        Ok(Bytes::copy_from_slice(self.take(len, field)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{AppendIntent, MergeBatchIntent, SealIntent};
    use proptest::prelude::*;

    fn seq(n: u64) -> SequenceNumber {
        SequenceNumber::new(n)
    }

    fn sample_table() -> SegmentStateTable {
        let mut parent = SegmentState::new(SegmentId::new(1), "stream/0");
        parent.length = 100;
        parent.storage_length = 40;
        parent.start_offset = 10;
        parent.pending_merges.push(PendingMerge {
            batch: SegmentId::new(2),
            offset: 80,
            length: 20,
        });
        parent.client_events.insert(Uuid::from_u128(9), 12);
        let mut batch = SegmentState::new_batch(SegmentId::new(2), "stream/0#tx", SegmentId::new(1));
        batch.length = 20;
        batch.sealed = true;
        batch.merged = true;
        SegmentStateTable::from_parts([parent, batch], 3).unwrap()
    }

    fn all_variants() -> Vec<Operation> {
        let ctx = AppendContext::new(Uuid::from_u128(0xabc), 4);
        vec![
            AppendIntent::new(SegmentId::new(1), &b"payload"[..], ctx)
                .resolve(17)
                .into(),
            SealIntent::new(SegmentId::new(1)).resolve(24).into(),
            MergeBatchIntent::new(SegmentId::new(2), SegmentId::new(1))
                .resolve(20, 80)
                .into(),
            Operation::MetadataCheckpoint(MetadataCheckpointOperation {
                table: sample_table(),
            }),
            Operation::SegmentMap(SegmentMapOperation {
                segment_id: SegmentId::new(5),
                name: "scope/stream/segment-5".into(),
            }),
            Operation::BatchMap(BatchMapOperation {
                batch_segment_id: SegmentId::new(6),
                name: "scope/stream/segment-5#batch.1".into(),
                parent_segment_id: SegmentId::new(5),
            }),
            Operation::TruncateSegment(TruncateSegmentOperation {
                segment_id: SegmentId::new(5),
                offset: 12,
            }),
        ]
    }

    #[test]
    fn every_variant_roundtrips() {
        for (i, op) in all_variants().into_iter().enumerate() {
            let bytes = serialize(seq(i as u64 + 1), &op).unwrap();
            let (header, decoded) = deserialize(&bytes).unwrap();
            assert_eq!(header.operation_type, op.operation_type());
            assert_eq!(header.sequence_number, seq(i as u64 + 1));
            assert_eq!(decoded, op);
        }
    }

    #[test]
    fn merge_batch_layout_is_bit_exact() {
        let op: Operation = MergeBatchIntent::new(SegmentId::new(2), SegmentId::new(1))
            .resolve(3, 4)
            .into();
        let bytes = serialize(seq(5), &op).unwrap();
        let mut expected = vec![3u8, 0];
        expected.extend_from_slice(&5i64.to_be_bytes());
        expected.extend_from_slice(&1i64.to_be_bytes());
        expected.extend_from_slice(&2i64.to_be_bytes());
        expected.extend_from_slice(&3i64.to_be_bytes());
        expected.extend_from_slice(&4i64.to_be_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn precondition_fails_before_writing() {
        let op: Operation = SealIntent::new(SegmentId::new(1)).resolve(u64::MAX).into();
        let mut buf = vec![0xee];
        let err = serialize_into(seq(1), &op, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            CoreError::SerializationPrecondition { field: "length", .. }
        ));
        assert_eq!(buf, vec![0xee]);
    }

    #[test]
    fn unassigned_sequence_number_rejected() {
        let op: Operation = SealIntent::new(SegmentId::new(1)).resolve(0).into();
        assert!(matches!(
            serialize(SequenceNumber::new(0), &op),
            Err(CoreError::SerializationPrecondition {
                field: "sequence_number",
                ..
            })
        ));
    }

    #[test]
    fn self_merge_rejected() {
        let op: Operation = MergeBatchIntent::new(SegmentId::new(1), SegmentId::new(1))
            .resolve(0, 0)
            .into();
        assert!(matches!(
            serialize(seq(1), &op),
            Err(CoreError::SerializationPrecondition { .. })
        ));
    }

    #[test]
    fn newer_version_rejected() {
        let op: Operation = SealIntent::new(SegmentId::new(1)).resolve(3).into();
        let mut bytes = serialize(seq(1), &op).unwrap();
        bytes[1] = 9;
        let err = deserialize(&bytes).unwrap_err();
        assert!(matches!(err, CoreError::Serialization { .. }));
        assert!(err.to_string().contains("newer"));
    }

    #[test]
    fn unknown_type_rejected() {
        let err = deserialize(&[0x7f, 0, 0, 0, 0, 0, 0, 0, 0, 1]).unwrap_err();
        assert!(err.to_string().contains("unknown operation type"));
    }

    #[test]
    fn every_truncation_is_a_decode_error() {
        for op in all_variants() {
            let bytes = serialize(seq(1), &op).unwrap();
            for cut in 0..bytes.len() {
                assert!(matches!(
                    deserialize(&bytes[..cut]),
                    Err(CoreError::Serialization { .. })
                ));
            }
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let op: Operation = SealIntent::new(SegmentId::new(1)).resolve(3).into();
        let mut bytes = serialize(seq(1), &op).unwrap();
        bytes.push(0);
        assert!(deserialize(&bytes).unwrap_err().to_string().contains("trailing"));
    }

    #[test]
    fn version_zero_checkpoint_still_decodes() {
        let mut bytes = vec![OperationType::MetadataCheckpoint.as_byte(), 0];
        bytes.put_i64(8);
        bytes.put_i64(3); // next_segment_id
        bytes.put_u32(1);
        bytes.put_i64(1);
        put_str(&mut bytes, "s");
        bytes.put_i64(50); // length
        bytes.put_i64(20); // storage_length
        bytes.put_i64(0); // start_offset
        bytes.put_u8(FLAG_SEALED);
        bytes.put_i64(NO_PARENT);
        bytes.put_u32(0);

        let (header, decoded) = deserialize(&bytes).unwrap();
        assert_eq!(header.version, 0);
        assert_eq!(header.sequence_number, seq(8));
        let Operation::MetadataCheckpoint(op) = decoded else {
            panic!("expected checkpoint");
        };
        let segment = op.table.get(SegmentId::new(1)).unwrap();
        assert_eq!(segment.length, 50);
        assert_eq!(segment.storage_length, 20);
        assert!(segment.sealed);
        assert!(segment.client_events.is_empty());
        assert_eq!(op.table.next_segment_id(), SegmentId::new(3));
    }

    #[test]
    fn negative_fields_rejected() {
        let mut bytes = vec![OperationType::Seal.as_byte(), 0];
        bytes.put_i64(1);
        bytes.put_i64(1);
        bytes.put_i64(-5);
        assert!(deserialize(&bytes).unwrap_err().to_string().contains("negative length"));
    }

    #[test]
    fn append_ending_past_i64_max_rejected() {
        let ctx = AppendContext::new(Uuid::nil(), 0);
        let near_max = i64::MAX as u64 - 1;
        let op: Operation = AppendIntent::new(SegmentId::new(1), &b"abc"[..], ctx)
            .resolve(near_max)
            .into();
        assert!(matches!(
            serialize(seq(1), &op),
            Err(CoreError::SerializationPrecondition { .. })
        ));

        let ok: Operation = AppendIntent::new(SegmentId::new(1), &b"abc"[..], ctx)
            .resolve(0)
            .into();
        let mut bytes = serialize(seq(1), &ok).unwrap();
        let offset_field = HEADER_SIZE + 8..HEADER_SIZE + 16;
        bytes[offset_field].copy_from_slice(&(near_max as i64).to_be_bytes());
        let err = deserialize(&bytes).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("past i64::MAX"), "{err}");
    }

    fn op_strategy() -> impl Strategy<Value = Operation> {
        let id = (1..=i64::MAX as u64).prop_map(SegmentId::new);
        let offset = 0..(1u64 << 48);
        prop_oneof![
            (
                id.clone(),
                offset.clone(),
                any::<u128>(),
                0..=i64::MAX as u64,
                prop::collection::vec(any::<u8>(), 0..128),
            )
                .prop_map(|(id, offset, client, event, data)| {
                    let ctx = AppendContext::new(Uuid::from_u128(client), event);
                    Operation::Append(AppendIntent::new(id, data, ctx).resolve(offset))
                }),
            (id.clone(), offset.clone())
                .prop_map(|(id, length)| Operation::Seal(SealIntent::new(id).resolve(length))),
            (id.clone(), "[a-z0-9/#._-]{1,40}").prop_map(|(segment_id, name)| {
                Operation::SegmentMap(SegmentMapOperation { segment_id, name })
            }),
            (id, offset).prop_map(|(segment_id, offset)| {
                Operation::TruncateSegment(TruncateSegmentOperation { segment_id, offset })
            }),
        ]
    }

    proptest! {
        #[test]
        fn encoded_operations_decode_unchanged(op in op_strategy(), n in 1..=i64::MAX as u64) {
            let bytes = serialize(seq(n), &op).unwrap();
            let (header, decoded) = deserialize(&bytes).unwrap();
            prop_assert_eq!(header.sequence_number, seq(n));
            prop_assert_eq!(header.operation_type, op.operation_type());
            prop_assert_eq!(decoded, op);
        }

        #[test]
        fn every_strict_prefix_is_rejected(op in op_strategy()) {
            let bytes = serialize(seq(1), &op).unwrap();
            for cut in 0..bytes.len() {
                prop_assert!(deserialize(&bytes[..cut]).is_err());
            }
        }

        #[test]
        fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = deserialize(&bytes);
        }
    }
}
