//! Inspect command implementation.

use serde::Serialize;
use super::OutputFormat;
use std::collections::BTreeMap;
use std::path::Path;
use streamseg_core::log::LedgerScan;
use streamseg_storage::LedgerStore;

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Total size of all ledgers in bytes.
    pub total_size: u64,
    /// Total number of complete records.
    pub record_count: u64,
    /// First retained sequence number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_sequence: Option<u64>,
    /// Last written sequence number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sequence: Option<u64>,
    /// Per-ledger details.
    pub ledgers: Vec<LedgerStats>,
    /// Replayed segment table (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentStats>>,
}

/// Statistics for a single ledger.
#[derive(Debug, Serialize)]
pub struct LedgerStats {
    /// Ledger id.
    pub id: u64,
    /// Size in bytes.
    pub size: u64,
    /// Number of complete records.
    pub records: u64,
    /// First sequence number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<u64>,
    /// Last sequence number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<u64>,
    /// Whether the ledger opens with a checkpoint.
    pub checkpoint: bool,
    /// Offset of an incomplete trailing frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torn_at: Option<u64>,
    /// Record count per operation type.
    pub by_type: BTreeMap<String, u64>,
}

/// State of a single segment after replay.
#[derive(Debug, Serialize)]
pub struct SegmentStats {
    /// Segment id.
    pub id: u64,
    /// Segment name.
    pub name: String,
    /// Length in bytes.
    pub length: u64,
    /// Bytes recorded as flushed to the tier at the last checkpoint or later.
    pub storage_length: u64,
    /// First readable offset.
    pub start_offset: u64,
    /// Sealed flag.
    pub sealed: bool,
    /// Merged flag (batches only).
    pub merged: bool,
    /// Parent segment (batches only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
    /// Merges not yet concatenated in the tier.
    pub pending_merges: usize,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    show_segments: bool,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_ledgers(path)?;
    let mut result = inspect(&store)?;
    result.path = path.display().to_string();

    if show_segments {
        let (table, _) = super::verify::replay(&store)?;
        result.segments = Some(
            table
                .iter()
                .map(|s| SegmentStats {
                    id: s.id.as_u64(),
                    name: s.name.clone(),
                    length: s.length,
                    storage_length: s.storage_length,
                    start_offset: s.start_offset,
                    sealed: s.sealed,
                    merged: s.merged,
                    parent: s.parent.map(|p| p.as_u64()),
                    pending_merges: s.pending_merges.len(),
                })
                .collect(),
        );
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text_output(&result),
    }

    Ok(())
}

/// Scans every ledger of `store`.
pub fn inspect(store: &dyn LedgerStore) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut result = InspectResult {
        path: String::new(),
        total_size: 0,
        record_count: 0,
        first_sequence: None,
        last_sequence: None,
        ledgers: Vec::new(),
        segments: None,
    };

    for id in store.list()? {
        let size = store.open(id)?.size()?;
        let scan = LedgerScan::scan(id, store.open(id)?)?;

        result.total_size += size;
        result.record_count += scan.records;
        if result.first_sequence.is_none() {
            result.first_sequence = scan.first.map(|s| s.as_u64());
        }
        if let Some(last) = scan.last {
            result.last_sequence = Some(last.as_u64());
        }
        result.ledgers.push(LedgerStats {
            id,
            size,
            records: scan.records,
            first: scan.first.map(|s| s.as_u64()),
            last: scan.last.map(|s| s.as_u64()),
            checkpoint: scan.starts_with_checkpoint,
            torn_at: scan.torn_at,
            by_type: scan
                .by_type
                .iter()
                .map(|(t, n)| (t.name().to_string(), *n))
                .collect(),
        });
    }

    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("StreamSeg Log Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!("Total Size: {}", format_bytes(result.total_size));
    println!("Records: {}", result.record_count);
    if let (Some(first), Some(last)) = (result.first_sequence, result.last_sequence) {
        println!("Sequence Range: {first}..={last}");
    }
    println!();

    println!("Ledgers:");
    for ledger in &result.ledgers {
        print!(
            "  {:>6}  {:>10}  {:>6} records",
            ledger.id,
            format_bytes(ledger.size),
            ledger.records
        );
        if ledger.checkpoint {
            print!("  [checkpoint]");
        }
        if let Some(offset) = ledger.torn_at {
            print!("  torn at {offset}");
        }
        println!();
        for (kind, count) in &ledger.by_type {
            println!("          {kind}: {count}");
        }
    }

    if let Some(segments) = &result.segments {
        println!();
        println!("Segments:");
        for s in segments {
            let mut flags = Vec::new();
            if s.sealed {
                flags.push("sealed");
            }
            if s.merged {
                flags.push("merged");
            }
            println!(
                "  {:>6}  {:<32} length={} flushed={} start={} {}",
                s.id,
                s.name,
                s.length,
                s.storage_length,
                s.start_offset,
                flags.join(",")
            );
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamseg_core::{AppendContext, Config, SegmentStore};

    #[tokio::test]
    async fn counts_records_per_ledger() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SegmentStore::open(dir.path(), Config::default().sync_on_append(false))
                .await
                .unwrap();
            let id = store.create_segment("s").await.unwrap();
            store
                .append(id, &b"abc"[..], AppendContext::new(uuid::Uuid::nil(), 1))
                .await
                .unwrap();
            store.checkpoint().await.unwrap();
        }

        let store = super::super::open_ledgers(dir.path()).unwrap();
        let result = inspect(&store).unwrap();
        assert_eq!(result.record_count, 3);
        assert_eq!(result.first_sequence, Some(1));
        assert_eq!(result.last_sequence, Some(3));
        assert_eq!(result.ledgers.len(), 2);
        assert!(result.ledgers[1].checkpoint);
        assert_eq!(result.ledgers[0].by_type.get("Append"), Some(&1));
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KB");
    }
}
