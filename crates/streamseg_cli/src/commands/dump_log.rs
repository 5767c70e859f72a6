//! Dump-log command implementation.

use serde::Serialize;
use super::OutputFormat;
use std::path::Path;
use streamseg_core::log::{FrameItem, FrameIterator};
use streamseg_core::operation::{self, Operation};
use streamseg_storage::LedgerStore;

/// Log record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Ledger holding the record.
    pub ledger: u64,
    /// Offset of the frame in the ledger.
    pub offset: u64,
    /// Sequence number.
    pub sequence: u64,
    /// Record type.
    pub record_type: String,
    /// Format version of the record.
    pub version: u8,
    /// Segment the record targets (the parent, for merges).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<u64>,
    /// Type-specific fields.
    pub details: String,
    /// Appended bytes, for appends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<u64>,
}

/// Runs the dump-log command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    from: u64,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_ledgers(path)?;
    let records = read_records(&store, from, limit)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text => print_text_output(&records),
    }

    Ok(())
}

/// Decodes every record with sequence number `>= from`, up to `limit`.
pub fn read_records(
    store: &dyn LedgerStore,
    from: u64,
    limit: Option<usize>,
) -> Result<Vec<RecordInfo>, Box<dyn std::error::Error>> {
    let max_records = limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();

    'ledgers: for ledger in store.list()? {
        for item in FrameIterator::whole(store.open(ledger)?)? {
            let (offset, record) = match item? {
                FrameItem::Frame { offset, record } => (offset, record),
                FrameItem::Torn { offset } => {
                    tracing::warn!(ledger, offset, "ledger ends with an incomplete frame");
                    break;
                }
            };
            let (header, op) = operation::deserialize(&record)?;
            if header.sequence_number.as_u64() < from {
                continue;
            }
            if records.len() >= max_records {
                break 'ledgers;
            }
            records.push(RecordInfo {
                ledger,
                offset,
                sequence: header.sequence_number.as_u64(),
                record_type: header.operation_type.name().to_string(),
                version: header.version,
                segment: op.segment_id().map(|id| id.as_u64()),
                details: describe(&op),
                payload_size: match &op {
                    Operation::Append(append) => Some(append.len()),
                    _ => None,
                },
            });
        }
    }

    Ok(records)
}

fn describe(op: &Operation) -> String {
    match op {
        Operation::Append(append) => format!(
            "offset={} client={} event={}",
            append.offset(),
            append.context().client_id,
            append.context().event_number
        ),
        Operation::Seal(seal) => format!("length={}", seal.length()),
        Operation::MergeBatch(merge) => format!(
            "batch={} parent_offset={} length={}",
            merge.batch_segment_id().as_u64(),
            merge.parent_offset(),
            merge.length()
        ),
        Operation::MetadataCheckpoint(checkpoint) => format!(
            "segments={} next_id={}",
            checkpoint.table.len(),
            checkpoint.table.next_segment_id().as_u64()
        ),
        Operation::SegmentMap(map) => format!("name={}", map.name),
        Operation::BatchMap(map) => format!(
            "name={} parent={}",
            map.name,
            map.parent_segment_id.as_u64()
        ),
        Operation::TruncateSegment(truncate) => format!("start_offset={}", truncate.offset),
    }
}

fn print_text_output(records: &[RecordInfo]) {
    println!("Log Records ({} total)", records.len());
    println!("================");
    println!();

    for record in records {
        print!(
            "[{:>8}] ledger={} @{:<8} {:18} v{}",
            record.sequence, record.ledger, record.offset, record.record_type, record.version
        );
        if let Some(segment) = record.segment {
            print!(" segment={segment}");
        }
        print!(" {}", record.details);
        if let Some(size) = record.payload_size {
            print!(" payload={size} bytes");
        }
        println!();
    }
}
