//! The durable log.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::log::frame::encode_frame;
use crate::log::iterator::{LedgerScan, LogReader};
use crate::operation::{serializer, Operation};
use crate::types::SequenceNumber;
use parking_lot::Mutex;
use std::sync::Arc;
use streamseg_storage::{LedgerId, LedgerStore, StorageBackend, StorageError};
use tracing::{debug, error, info, warn};

/// What the log knows about one of its ledgers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerInfo {
    /// Ledger id.
    pub id: LedgerId,
    /// First record in the ledger.
    pub first: Option<SequenceNumber>,
    /// Last record in the ledger.
    pub last: Option<SequenceNumber>,
    /// Whether the ledger opens with a checkpoint.
    pub starts_with_checkpoint: bool,
    /// Committed size in bytes.
    pub size: u64,
}

impl From<&LedgerScan> for LedgerInfo {
    fn from(scan: &LedgerScan) -> Self {
        Self {
            id: scan.id,
            first: scan.first,
            last: scan.last,
            starts_with_checkpoint: scan.starts_with_checkpoint,
            size: scan.valid_size,
        }
    }
}

struct LogState {
    ledgers: Vec<LedgerInfo>,
    writer: Option<Box<dyn StorageBackend>>,
    next_seq: SequenceNumber,
    /// Set when a failed append could not be rolled back. The newest ledger
    /// then ends in a partial frame, which only a reopen can cut off.
    poisoned: bool,
}

impl LogState {
    fn current(&self) -> Option<&LedgerInfo> {
        self.ledgers.last()
    }
}

/// Append-only, crash-recoverable log of operations.
///
/// The log is a run of ledgers from a [`LedgerStore`]. Each append frames
/// one serialized operation onto the newest ledger; a new ledger is started
/// when the current one grows past `max_ledger_size` and always right
/// before a checkpoint, so that truncation can drop whole ledgers.
///
/// Appends are serialized by an internal mutex. A sequence number is only
/// handed out once its frame has been written (and flushed, when
/// `sync_on_append` is set).
pub struct DurableLog {
    store: Arc<dyn LedgerStore>,
    state: Mutex<LogState>,
    max_ledger_size: u64,
    sync_on_append: bool,
}

impl DurableLog {
    /// Opens the log held by `store`.
    ///
    /// Every ledger is scanned. An incomplete frame at the end of the newest
    /// ledger is left over from a crash mid-append and is cut off; anywhere
    /// else it is corruption.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] or [`CoreError::ChecksumMismatch`]
    /// if any ledger is damaged, or a storage error if a ledger cannot be
    /// read.
    pub fn open(store: Arc<dyn LedgerStore>, config: &Config) -> CoreResult<Self> {
        let ids = store.list()?;
        let mut ledgers: Vec<LedgerInfo> = Vec::with_capacity(ids.len());
        let mut writer = None;

        for (index, id) in ids.iter().copied().enumerate() {
            let is_newest = index + 1 == ids.len();
            let scan = LedgerScan::scan(id, store.open(id)?)?;

            if let Some(torn_at) = scan.torn_at {
                if !is_newest {
                    return Err(CoreError::log_corruption(format!(
                        "ledger {id} has an incomplete frame at offset {torn_at} but is not the newest ledger"
                    )));
                }
                warn!(
                    ledger = id,
                    offset = torn_at,
                    "discarding incomplete trailing frame"
                );
                let mut backend = store.open(id)?;
                backend.truncate(scan.valid_size)?;
                backend.flush()?;
            }

            let previous_last = ledgers.iter().rev().find_map(|l| l.last);
            if let (Some(prev), Some(first)) = (previous_last, scan.first) {
                if first != prev.next() {
                    return Err(CoreError::log_corruption(format!(
                        "ledger {id} starts at {first} but the previous record is {prev}"
                    )));
                }
            }

            if is_newest {
                writer = Some(store.open(id)?);
            }
            ledgers.push(LedgerInfo::from(&scan));
        }

        let next_seq = ledgers
            .iter()
            .rev()
            .find_map(|l| l.last)
            .map_or(SequenceNumber::FIRST, SequenceNumber::next);

        info!(
            ledgers = ledgers.len(),
            next_sequence = next_seq.as_u64(),
            "durable log opened"
        );

        Ok(Self {
            store,
            state: Mutex::new(LogState {
                ledgers,
                writer,
                next_seq,
                poisoned: false,
            }),
            max_ledger_size: config.max_ledger_size,
            sync_on_append: config.sync_on_append,
        })
    }

    /// Appends an operation and returns the sequence number assigned to it.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SerializationPrecondition`] if the operation cannot be
    ///   encoded; nothing is written.
    /// - [`CoreError::DurableMediumFailure`] if the medium rejects the write.
    ///   The partial frame is rolled back and the sequence number is not
    ///   consumed, so the log stays usable. If the rollback fails too, every
    ///   later append fails until the log is reopened.
    pub fn append(&self, op: &Operation) -> CoreResult<SequenceNumber> {
        let mut state = self.state.lock();
        if state.poisoned {
            return Err(CoreError::DurableMediumFailure {
                source: StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "newest ledger ends in a partial frame; reopen the log",
                )),
            });
        }
        let seq = state.next_seq;
        let record = serializer::serialize(seq, op)?;
        let frame = encode_frame(&record)?;

        if self.needs_new_ledger(&state, op.is_checkpoint(), frame.len() as u64) {
            self.start_ledger(&mut state)
                .map_err(|source| CoreError::DurableMediumFailure { source })?;
        }

        let before = state.current().map_or(0, |l| l.size);
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| CoreError::invalid_operation("log has no writable ledger"))?;

        if let Err(source) = write_frame(&mut **writer, &frame, self.sync_on_append) {
            if let Err(rollback) = writer.truncate(before) {
                error!(
                    error = %rollback,
                    offset = before,
                    "failed to roll back partial frame; appends disabled until reopen"
                );
                state.poisoned = true;
            }
            warn!(sequence = seq.as_u64(), error = %source, "append failed");
            return Err(CoreError::DurableMediumFailure { source });
        }

        if let Some(ledger) = state.ledgers.last_mut() {
            ledger.size = before + frame.len() as u64;
            if ledger.first.is_none() {
                ledger.first = Some(seq);
                ledger.starts_with_checkpoint = op.is_checkpoint();
            }
            ledger.last = Some(seq);
        }
        state.next_seq = seq.next();
        Ok(seq)
    }

    /// Returns a reader over all records with sequence number `>= from`.
    ///
    /// A `from` older than the oldest retained record starts at that record.
    ///
    /// # Errors
    ///
    /// Currently infallible; ledgers are opened lazily by the reader.
    pub fn read_from(&self, from: SequenceNumber) -> CoreResult<LogReader> {
        let state = self.state.lock();
        let ledgers = state
            .ledgers
            .iter()
            .filter(|l| l.size > 0 && l.last.is_some_and(|last| last >= from))
            .map(|l| (l.id, l.size))
            .collect();
        Ok(LogReader::new(Arc::clone(&self.store), ledgers, from))
    }

    /// Discards every record up to and including `upto`.
    ///
    /// `upto + 1` must be the first record of a ledger that starts with a
    /// checkpoint; all earlier ledgers are deleted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `upto` is not directly
    /// before a checkpoint ledger.
    pub fn truncate(&self, upto: SequenceNumber) -> CoreResult<()> {
        let mut state = self.state.lock();
        let boundary = upto.next();
        let index = state
            .ledgers
            .iter()
            .position(|l| l.first == Some(boundary) && l.starts_with_checkpoint)
            .ok_or_else(|| {
                CoreError::invalid_operation(format!(
                    "{upto} is not immediately before a checkpoint ledger"
                ))
            })?;

        let doomed: Vec<LedgerId> = state.ledgers[..index].iter().map(|l| l.id).collect();
        for id in &doomed {
            self.store.delete(*id)?;
            state.ledgers.remove(0);
            debug!(ledger = id, "deleted ledger");
        }
        info!(
            upto = upto.as_u64(),
            ledgers_deleted = doomed.len(),
            "log truncated"
        );
        Ok(())
    }

    /// Flushes the active ledger.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flush fails.
    pub fn flush(&self) -> CoreResult<()> {
        if let Some(writer) = self.state.lock().writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Sequence number the next append will get.
    #[must_use]
    pub fn next_sequence_number(&self) -> SequenceNumber {
        self.state.lock().next_seq
    }

    /// Last sequence number written, if any.
    #[must_use]
    pub fn last_sequence_number(&self) -> Option<SequenceNumber> {
        self.state.lock().ledgers.iter().rev().find_map(|l| l.last)
    }

    /// Sequence number of the newest record that starts a checkpoint ledger.
    #[must_use]
    pub fn latest_checkpoint(&self) -> Option<SequenceNumber> {
        self.state
            .lock()
            .ledgers
            .iter()
            .rev()
            .find(|l| l.starts_with_checkpoint)
            .and_then(|l| l.first)
    }

    /// Snapshot of the ledgers that make up the log.
    #[must_use]
    pub fn ledgers(&self) -> Vec<LedgerInfo> {
        self.state.lock().ledgers.clone()
    }

    fn needs_new_ledger(&self, state: &LogState, checkpoint: bool, frame_len: u64) -> bool {
        match state.current() {
            None => true,
            Some(_) if state.writer.is_none() => true,
            Some(ledger) if ledger.size == 0 => false,
            Some(_) if checkpoint => true,
            Some(ledger) => ledger.size + frame_len > self.max_ledger_size,
        }
    }

    fn start_ledger(&self, state: &mut LogState) -> Result<(), StorageError> {
        if let Some(writer) = state.writer.as_mut() {
            writer.flush()?;
        }
        let id = state.current().map_or(1, |l| l.id + 1);
        let writer = self.store.create(id)?;
        state.writer = Some(writer);
        state.ledgers.push(LedgerInfo {
            id,
            first: None,
            last: None,
            starts_with_checkpoint: false,
            size: 0,
        });
        debug!(ledger = id, "started ledger");
        Ok(())
    }
}

fn write_frame(
    writer: &mut dyn StorageBackend,
    frame: &[u8],
    sync: bool,
) -> Result<(), StorageError> {
    writer.append(frame)?;
    if sync {
        writer.flush()?;
    }
    Ok(())
}

impl std::fmt::Debug for DurableLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DurableLog")
            .field("ledgers", &state.ledgers.len())
            .field("next_seq", &state.next_seq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{AppendIntent, MetadataCheckpointOperation, SealIntent};
    use crate::state::SegmentStateTable;
    use crate::types::{AppendContext, SegmentId};
    use streamseg_storage::InMemoryLedgerStore;
    use uuid::Uuid;

    fn config() -> Config {
        Config::new().max_ledger_size(1024)
    }

    fn append_op(n: u8) -> Operation {
        AppendIntent::new(
            SegmentId::new(1),
            vec![n; 16],
            AppendContext::new(Uuid::nil(), u64::from(n)),
        )
        .resolve(u64::from(n) * 16)
        .into()
    }

    fn checkpoint() -> Operation {
        Operation::MetadataCheckpoint(MetadataCheckpointOperation {
            table: SegmentStateTable::new(),
        })
    }

    fn open(store: &InMemoryLedgerStore) -> DurableLog {
        DurableLog::open(Arc::new(store.clone()), &config()).unwrap()
    }

    #[test]
    fn sequence_numbers_start_at_one_and_increase() {
        let store = InMemoryLedgerStore::new();
        let log = open(&store);
        for expected in 1..=5 {
            assert_eq!(log.append(&append_op(expected as u8)).unwrap().as_u64(), expected);
        }
        assert_eq!(log.next_sequence_number(), SequenceNumber::new(6));
    }

    #[test]
    fn read_from_returns_records_in_order() {
        let store = InMemoryLedgerStore::new();
        let log = open(&store);
        for n in 0..10 {
            log.append(&append_op(n)).unwrap();
        }
        let read: Vec<_> = log
            .read_from(SequenceNumber::new(4))
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(read.len(), 7);
        assert_eq!(read[0].0, SequenceNumber::new(4));
        assert_eq!(read[0].1, append_op(3));
    }

    #[test]
    fn concurrent_appends_get_gapless_sequence_numbers() {
        let store = InMemoryLedgerStore::new();
        let log = open(&store);
        log.append(&append_op(0)).unwrap();
        let start = log.next_sequence_number().as_u64();

        let per_thread: Vec<Vec<u64>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (1..=8u8)
                .map(|n| {
                    let log = &log;
                    scope.spawn(move || {
                        (0..25)
                            .map(|_| log.append(&append_op(n)).unwrap().as_u64())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for seqs in &per_thread {
            assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        }
        let mut all = per_thread.concat();
        all.sort_unstable();
        assert_eq!(all, (start..start + 200).collect::<Vec<_>>());

        let replayed: Vec<u64> = log
            .read_from(SequenceNumber::new(start))
            .unwrap()
            .map(|item| item.unwrap().0.as_u64())
            .collect();
        assert_eq!(replayed, all);
    }

    #[test]
    fn file_ledgers_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let open_dir = || {
            let ledgers = streamseg_storage::FileLedgerStore::open(dir.path()).unwrap();
            DurableLog::open(Arc::new(ledgers), &config()).unwrap()
        };

        {
            let log = open_dir();
            for n in 1..=40 {
                log.append(&append_op(n)).unwrap();
            }
            log.append(&checkpoint()).unwrap();
        }

        let log = open_dir();
        assert!(log.ledgers().len() > 1);
        assert_eq!(log.next_sequence_number(), SequenceNumber::new(42));
        assert_eq!(log.latest_checkpoint(), Some(SequenceNumber::new(41)));
        let replayed = log.read_from(SequenceNumber::FIRST).unwrap().count();
        assert_eq!(replayed, 41);
        assert_eq!(log.append(&append_op(41)).unwrap(), SequenceNumber::new(42));
    }

    #[test]
    fn reopen_continues_sequence() {
        let store = InMemoryLedgerStore::new();
        {
            let log = open(&store);
            log.append(&append_op(0)).unwrap();
            log.append(&append_op(1)).unwrap();
        }
        let log = open(&store);
        assert_eq!(log.append(&append_op(2)).unwrap(), SequenceNumber::new(3));
        assert_eq!(log.read_from(SequenceNumber::FIRST).unwrap().count(), 3);
    }

    #[test]
    fn rolls_over_when_ledger_is_full() {
        let store = InMemoryLedgerStore::new();
        let log = open(&store);
        for n in 0..40 {
            log.append(&append_op(n)).unwrap();
        }
        assert!(log.ledgers().len() > 1);
        assert_eq!(log.read_from(SequenceNumber::FIRST).unwrap().count(), 40);
    }

    #[test]
    fn checkpoint_starts_a_new_ledger() {
        let store = InMemoryLedgerStore::new();
        let log = open(&store);
        log.append(&append_op(0)).unwrap();
        let cp = log.append(&checkpoint()).unwrap();
        let ledgers = log.ledgers();
        assert_eq!(ledgers.len(), 2);
        assert_eq!(ledgers[1].first, Some(cp));
        assert!(ledgers[1].starts_with_checkpoint);
        assert_eq!(log.latest_checkpoint(), Some(cp));
    }

    #[test]
    fn truncate_only_at_checkpoint_boundaries() {
        let store = InMemoryLedgerStore::new();
        let log = open(&store);
        log.append(&append_op(0)).unwrap();
        log.append(&append_op(1)).unwrap();
        let cp = log.append(&checkpoint()).unwrap();
        log.append(&append_op(2)).unwrap();

        assert!(matches!(
            log.truncate(SequenceNumber::new(1)),
            Err(CoreError::InvalidOperation { .. })
        ));
        log.truncate(cp.prev()).unwrap();

        let read: Vec<_> = log
            .read_from(SequenceNumber::FIRST)
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(read.len(), 2);
        assert!(read[0].1.is_checkpoint());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn torn_tail_is_discarded_on_open() {
        let store = InMemoryLedgerStore::new();
        {
            let log = open(&store);
            log.append(&append_op(0)).unwrap();
            log.append(&append_op(1)).unwrap();
        }
        let ledger = store.backend(1).unwrap();
        let full = ledger.data();
        let mut torn = ledger.share();
        torn.truncate(full.len() as u64 - 5).unwrap();

        let log = open(&store);
        assert_eq!(log.last_sequence_number(), Some(SequenceNumber::new(1)));
        assert_eq!(log.append(&append_op(1)).unwrap(), SequenceNumber::new(2));
        assert_eq!(log.read_from(SequenceNumber::FIRST).unwrap().count(), 2);
    }

    #[test]
    fn corruption_is_fatal_on_open() {
        let store = InMemoryLedgerStore::new();
        {
            let log = open(&store);
            log.append(&append_op(0)).unwrap();
            log.append(&append_op(1)).unwrap();
        }
        store.backend(1).unwrap().corrupt_byte(20, 0xaa);
        let err = DurableLog::open(Arc::new(store.clone()), &config()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn precondition_failure_consumes_nothing() {
        let store = InMemoryLedgerStore::new();
        let log = open(&store);
        let bad: Operation = SealIntent::new(SegmentId::new(1)).resolve(u64::MAX).into();
        assert!(matches!(
            log.append(&bad),
            Err(CoreError::SerializationPrecondition { .. })
        ));
        assert_eq!(log.append(&append_op(0)).unwrap(), SequenceNumber::FIRST);
    }
}
