//! Error types for StreamSeg core.

use crate::types::SegmentId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in StreamSeg core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend or tier error.
    #[error("storage error: {0}")]
    Storage(#[from] streamseg_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An operation was serialized with a required field missing or out of
    /// range. This is a programming error and never succeeds on retry.
    #[error("serialization precondition failed for `{field}`: {reason}")]
    SerializationPrecondition {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Bytes could not be decoded into an operation (malformed, truncated,
    /// or written by a newer format version).
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the decode failure.
        message: String,
    },

    /// The operation log is corrupted.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected on a log frame.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// The durable medium failed to acknowledge an append. The record was
    /// not logged; the log stays usable.
    #[error("durable medium failure: {source}")]
    DurableMediumFailure {
        /// The underlying storage error.
        #[source]
        source: streamseg_storage::StorageError,
    },

    /// Append, merge, or seal attempted against a sealed segment.
    #[error("segment {0} is sealed")]
    SegmentSealed(SegmentId),

    /// Merge attempted with a batch segment that is still open.
    #[error("segment {0} is not sealed")]
    SegmentNotSealed(SegmentId),

    /// The segment was merged into its parent and no longer exists on its own.
    #[error("segment {0} has been merged")]
    SegmentMerged(SegmentId),

    /// No segment with the given id.
    #[error("segment {0} not found")]
    SegmentNotFound(SegmentId),

    /// A segment with the given name already exists.
    #[error("segment already exists: {name}")]
    SegmentExists {
        /// Name of the segment.
        name: String,
    },

    /// The requested offset lies before the segment's truncation point.
    #[error("segment {segment} truncated: offset {offset} is before start offset {start_offset}")]
    Truncated {
        /// The segment.
        segment: SegmentId,
        /// The requested offset.
        offset: u64,
        /// The first readable offset.
        start_offset: u64,
    },

    /// The segment was sealed before the awaited offset was written.
    #[error("end of segment {segment} reached at offset {offset}")]
    EndOfSegment {
        /// The segment.
        segment: SegmentId,
        /// The offset that will never be written.
        offset: u64,
    },

    /// A merge's recorded parent offset does not match the parent's length.
    /// Fatal for the container.
    #[error("merge ordering violation on {parent}: recorded offset {recorded}, parent length {actual}")]
    MergeOrderingViolation {
        /// The parent segment.
        parent: SegmentId,
        /// Offset recorded in the operation.
        recorded: u64,
        /// Parent length at apply time.
        actual: u64,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A future read was not satisfied within the configured timeout.
    #[error("read on {segment} at offset {offset} timed out")]
    ReadTimeout {
        /// The segment.
        segment: SegmentId,
        /// The awaited offset.
        offset: u64,
    },

    /// The store has been shut down or its background work failed.
    #[error("store is closed")]
    Closed,
}

impl CoreError {
    /// Creates a serialization precondition error.
    pub fn precondition(field: &'static str, reason: impl Into<String>) -> Self {
        Self::SerializationPrecondition {
            field,
            reason: reason.into(),
        }
    }

    /// Creates a serialization (decode) error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a segment-exists error.
    pub fn segment_exists(name: impl Into<String>) -> Self {
        Self::SegmentExists { name: name.into() }
    }

    /// Returns true if the error means the container's log or state can no
    /// longer be trusted. Recovery halts on these.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Serialization { .. }
                | Self::LogCorruption { .. }
                | Self::ChecksumMismatch { .. }
                | Self::MergeOrderingViolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(CoreError::log_corruption("bad magic").is_fatal());
        assert!(CoreError::MergeOrderingViolation {
            parent: SegmentId::new(1),
            recorded: 10,
            actual: 12,
        }
        .is_fatal());
        assert!(!CoreError::SegmentSealed(SegmentId::new(1)).is_fatal());
        assert!(!CoreError::precondition("length", "unset").is_fatal());
    }

    #[test]
    fn messages_name_the_field() {
        let err = CoreError::precondition("parent_offset", "exceeds i64::MAX");
        assert_eq!(
            err.to_string(),
            "serialization precondition failed for `parent_offset`: exceeds i64::MAX"
        );
    }
}
