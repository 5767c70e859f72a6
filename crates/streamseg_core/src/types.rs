//! Identifiers shared by the log, the state table and the read path.

use std::fmt;
use uuid::Uuid;

/// Position of an operation in the durable log.
///
/// Sequence numbers provide the total order of all operations in a
/// container. They are assigned by the log at append time and are strictly
/// increasing; an operation that has not been logged has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// The first sequence number handed out by a fresh log.
    pub const FIRST: Self = Self(1);

    /// Wraps a raw log position.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// The raw log position.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The position right after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the previous sequence number, saturating at zero.
    #[must_use]
    pub const fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a segment within a container.
///
/// Ids are assigned by the store when a segment or batch is created and
/// are never reused, even after a batch has been merged away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

/// Identifies the client and event that produced an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppendContext {
    /// The writer that issued the append.
    pub client_id: Uuid,
    /// Writer-local event counter.
    pub event_number: u64,
}

impl AppendContext {
    /// Creates a new append context.
    #[must_use]
    pub const fn new(client_id: Uuid, event_number: u64) -> Self {
        Self {
            client_id,
            event_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_number_next_and_prev() {
        let s = SequenceNumber::new(5);
        assert_eq!(s.next().as_u64(), 6);
        assert_eq!(s.prev().as_u64(), 4);
        assert_eq!(SequenceNumber::new(0).prev().as_u64(), 0);
    }

    #[test]
    fn segment_id_display() {
        assert_eq!(format!("{}", SegmentId::new(42)), "seg:42");
    }
}
