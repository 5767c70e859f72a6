//! Verify command implementation.

use std::path::Path;
use streamseg_core::log::{FrameItem, FrameIterator, LedgerScan};
use streamseg_core::operation;
use streamseg_core::{SegmentStateTable, SequenceNumber};
use streamseg_storage::LedgerStore;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of ledgers checked.
    pub ledgers_checked: usize,
    /// Number of records that decoded cleanly.
    pub valid_records: u64,
    /// Number of records replayed into a segment table.
    pub replayed_records: u64,
    /// Problems that make the log unusable.
    pub errors: Vec<String>,
    /// Problems that recovery repairs on its own.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, replay_records: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying operation log at {}", path.display());
    println!();

    let store = super::open_ledgers(path)?;
    let result = verify(&store, replay_records)?;

    println!("Ledgers checked:  {}", result.ledgers_checked);
    println!("Valid records:    {}", result.valid_records);
    if replay_records {
        println!("Replayed records: {}", result.replayed_records);
    }
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    for error in &result.errors {
        println!("  error: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every ledger of `store` without modifying it.
pub fn verify(
    store: &dyn LedgerStore,
    replay_records: bool,
) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    let ledgers = store.list()?;
    let mut previous_last: Option<SequenceNumber> = None;

    for (index, &id) in ledgers.iter().enumerate() {
        result.ledgers_checked += 1;
        let scan = match LedgerScan::scan(id, store.open(id)?) {
            Ok(scan) => scan,
            Err(e) => {
                result.errors.push(format!("ledger {id}: {e}"));
                continue;
            }
        };

        if let Some(offset) = scan.torn_at {
            let message = format!("ledger {id}: incomplete frame at offset {offset}");
            if index + 1 == ledgers.len() {
                result.warnings.push(message);
            } else {
                result.errors.push(message);
            }
        }

        if let (Some(last), Some(first)) = (previous_last, scan.first) {
            if first != last.next() {
                result
                    .errors
                    .push(format!("ledger {id}: starts at {first} after {last}"));
            }
        }
        previous_last = scan.last.or(previous_last);

        for item in FrameIterator::whole(store.open(id)?)? {
            let FrameItem::Frame { offset, record } = item? else {
                break;
            };
            match operation::deserialize(&record) {
                Ok(_) => result.valid_records += 1,
                Err(e) => result
                    .errors
                    .push(format!("ledger {id} offset {offset}: {e}")),
            }
        }
    }

    if replay_records && result.is_ok() {
        match replay(store) {
            Ok((_, applied)) => result.replayed_records = applied,
            Err(e) => result.errors.push(format!("replay: {e}")),
        }
    }

    Ok(result)
}

/// Folds every retained record into a segment table, in log order.
pub fn replay(
    store: &dyn LedgerStore,
) -> Result<(SegmentStateTable, u64), Box<dyn std::error::Error>> {
    let mut table = SegmentStateTable::new();
    let mut applied = 0;
    for id in store.list()? {
        for item in FrameIterator::whole(store.open(id)?)? {
            let FrameItem::Frame { record, .. } = item? else {
                break;
            };
            let (header, op) = operation::deserialize(&record)?;
            table
                .apply(&op)
                .map_err(|e| format!("{} cannot be applied: {e}", header.sequence_number))?;
            applied += 1;
        }
    }
    Ok((table, applied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamseg_core::{AppendContext, Config, SegmentStore};
    use streamseg_storage::StorageBackend;

    async fn populate(path: &Path) {
        let store = SegmentStore::open(path, Config::default().max_ledger_size(128))
            .await
            .unwrap();
        let id = store.create_segment("s").await.unwrap();
        for n in 0u8..10 {
            store
                .append(id, vec![n; 40], AppendContext::new(uuid::Uuid::nil(), u64::from(n)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn clean_log_passes() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path()).await;

        let store = super::super::open_ledgers(dir.path()).unwrap();
        let result = verify(&store, true).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert!(result.ledgers_checked > 1);
        assert_eq!(result.valid_records, 11);
        assert_eq!(result.replayed_records, 11);
    }

    #[tokio::test]
    async fn flipped_byte_fails() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path()).await;

        let store = super::super::open_ledgers(dir.path()).unwrap();
        let first = store.list().unwrap()[0];
        let mut ledger = store.open(first).unwrap();
        let mut bytes = ledger.read_all().unwrap();
        bytes[12] ^= 0xFF;
        ledger.truncate(0).unwrap();
        ledger.append(&bytes).unwrap();
        ledger.flush().unwrap();

        let result = verify(&store, true).unwrap();
        assert!(!result.is_ok());
    }
}
