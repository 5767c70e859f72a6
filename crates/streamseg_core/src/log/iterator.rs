//! Streaming iteration over ledger frames and log records.
//!
//! Frames are read through a bounded buffer so memory stays flat no matter
//! how large a ledger grows. Records larger than the buffer grow it just
//! enough to hold them.

use crate::error::{CoreError, CoreResult};
use crate::log::frame::{self, CRC_SIZE, FRAME_HEADER_SIZE};
use crate::operation::{serializer, Operation, OperationHeader, OperationType};
use crate::types::SequenceNumber;
use std::sync::Arc;
use streamseg_storage::{LedgerId, LedgerStore, StorageBackend};

/// Read buffer size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// One item produced while walking a ledger.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameItem {
    /// A complete frame whose checksum matched.
    Frame {
        /// Offset of the frame in the ledger.
        offset: u64,
        /// The record bytes inside the frame.
        record: Vec<u8>,
    },
    /// The ledger ends with an incomplete frame starting at `offset`.
    Torn {
        /// Offset of the incomplete frame.
        offset: u64,
    },
}

/// Iterates the frames of one ledger up to a fixed end offset.
///
/// Checksum mismatches and bad magic are returned as errors and end the
/// iteration. An incomplete trailing frame is reported as
/// [`FrameItem::Torn`] and also ends it.
pub struct FrameIterator {
    backend: Box<dyn StorageBackend>,
    offset: u64,
    end: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
    finished: bool,
}

impl FrameIterator {
    /// Creates an iterator over `[0, end)` of `backend`.
    pub fn new(backend: Box<dyn StorageBackend>, end: u64) -> Self {
        Self {
            backend,
            offset: 0,
            end,
            buffer: Vec::new(),
            buffer_start: 0,
            finished: false,
        }
    }

    /// Creates an iterator over the whole backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn whole(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let end = backend.size()?;
        Ok(Self::new(backend, end))
    }

    /// Offset just past the last frame returned.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Returns `len` bytes at `offset` from the buffer, reading if needed.
    fn buffered(&mut self, offset: u64, len: usize) -> CoreResult<&[u8]> {
        let buffer_end = self.buffer_start + self.buffer.len() as u64;
        if offset < self.buffer_start || offset + len as u64 > buffer_end {
            let available = (self.end - offset) as usize;
            let read_len = len.max(READ_BUFFER_SIZE).min(available);
            self.buffer = self.backend.read_at(offset, read_len)?;
            self.buffer_start = offset;
        }
        let start = (offset - self.buffer_start) as usize;
        Ok(&self.buffer[start..start + len])
    }

    fn read_next(&mut self) -> CoreResult<Option<FrameItem>> {
        let offset = self.offset;
        let remaining = self.end - offset;
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < FRAME_HEADER_SIZE as u64 {
            return Ok(Some(FrameItem::Torn { offset }));
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(self.buffered(offset, FRAME_HEADER_SIZE)?);
        let record_len = frame::decode_header(&header, offset)?;

        let frame_len = FRAME_HEADER_SIZE + record_len + CRC_SIZE;
        if remaining < frame_len as u64 {
            return Ok(Some(FrameItem::Torn { offset }));
        }

        let record = frame::verify_frame(self.buffered(offset, frame_len)?)?.to_vec();
        self.offset += frame_len as u64;
        Ok(Some(FrameItem::Frame { offset, record }))
    }
}

impl Iterator for FrameIterator {
    type Item = CoreResult<FrameItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => {
                if matches!(item, FrameItem::Torn { .. }) {
                    self.finished = true;
                }
                Some(Ok(item))
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Summary of one ledger's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerScan {
    /// Ledger id.
    pub id: LedgerId,
    /// Sequence number of the first record, if any.
    pub first: Option<SequenceNumber>,
    /// Sequence number of the last record, if any.
    pub last: Option<SequenceNumber>,
    /// Whether the first record is a checkpoint.
    pub starts_with_checkpoint: bool,
    /// Number of complete records.
    pub records: u64,
    /// Offset just past the last complete frame.
    pub valid_size: u64,
    /// Offset of an incomplete trailing frame, if one was found.
    pub torn_at: Option<u64>,
    /// Record count per operation type.
    pub by_type: Vec<(OperationType, u64)>,
}

impl LedgerScan {
    /// Walks a ledger, checking frames and record headers.
    ///
    /// Sequence numbers must be consecutive within the ledger.
    ///
    /// # Errors
    ///
    /// Returns a corruption error for bad magic, checksum mismatches,
    /// undecodable headers or out-of-order sequence numbers.
    pub fn scan(id: LedgerId, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let mut scan = Self {
            id,
            first: None,
            last: None,
            starts_with_checkpoint: false,
            records: 0,
            valid_size: 0,
            torn_at: None,
            by_type: Vec::new(),
        };
        let mut frames = FrameIterator::whole(backend)?;
        for item in frames.by_ref() {
            match item? {
                FrameItem::Frame { offset, record } => {
                    let header = record_header(&record).map_err(|e| {
                        CoreError::log_corruption(format!(
                            "ledger {id} offset {offset}: {e}"
                        ))
                    })?;
                    scan.observe(&header)?;
                }
                FrameItem::Torn { offset } => scan.torn_at = Some(offset),
            }
        }
        scan.valid_size = frames.position();
        Ok(scan)
    }

    fn observe(&mut self, header: &OperationHeader) -> CoreResult<()> {
        let seq = header.sequence_number;
        if let Some(last) = self.last {
            if seq != last.next() {
                return Err(CoreError::log_corruption(format!(
                    "ledger {}: {seq} follows {last}",
                    self.id
                )));
            }
        } else {
            self.first = Some(seq);
            self.starts_with_checkpoint =
                header.operation_type == OperationType::MetadataCheckpoint;
        }
        self.last = Some(seq);
        self.records += 1;
        match self
            .by_type
            .iter_mut()
            .find(|(t, _)| *t == header.operation_type)
        {
            Some((_, count)) => *count += 1,
            None => self.by_type.push((header.operation_type, 1)),
        }
        Ok(())
    }
}

fn record_header(record: &[u8]) -> CoreResult<OperationHeader> {
    serializer::read_header(&mut serializer::RecordReader::new(record))
}

/// Lazy sequence of `(sequence_number, operation)` pairs read from the log.
///
/// The reader covers the log as it was when it was created; records
/// appended later are not returned. Any decode failure is a corruption
/// error and ends the sequence.
pub struct LogReader {
    store: Arc<dyn LedgerStore>,
    ledgers: std::vec::IntoIter<(LedgerId, u64)>,
    current: Option<FrameIterator>,
    current_id: LedgerId,
    from: SequenceNumber,
    finished: bool,
}

impl LogReader {
    pub(crate) fn new(
        store: Arc<dyn LedgerStore>,
        ledgers: Vec<(LedgerId, u64)>,
        from: SequenceNumber,
    ) -> Self {
        Self {
            store,
            ledgers: ledgers.into_iter(),
            current: None,
            current_id: 0,
            from,
            finished: false,
        }
    }

    fn read_next(&mut self) -> CoreResult<Option<(SequenceNumber, Operation)>> {
        loop {
            if let Some(frames) = self.current.as_mut() {
                match frames.next() {
                    Some(Ok(FrameItem::Frame { offset, record })) => {
                        let (header, op) = serializer::deserialize(&record).map_err(|e| {
                            CoreError::log_corruption(format!(
                                "ledger {} offset {offset}: {e}",
                                self.current_id
                            ))
                        })?;
                        if header.sequence_number < self.from {
                            continue;
                        }
                        return Ok(Some((header.sequence_number, op)));
                    }
                    Some(Ok(FrameItem::Torn { offset })) => {
                        return Err(CoreError::log_corruption(format!(
                            "ledger {} has an incomplete frame at offset {offset}",
                            self.current_id
                        )));
                    }
                    Some(Err(e)) => return Err(e),
                    None => self.current = None,
                }
            }
            match self.ledgers.next() {
                Some((id, size)) => {
                    let backend = self.store.open(id)?;
                    self.current_id = id;
                    self.current = Some(FrameIterator::new(backend, size));
                }
                None => return Ok(None),
            }
        }
    }
}

impl Iterator for LogReader {
    type Item = CoreResult<(SequenceNumber, Operation)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
