//! Failures raised by ledger backends and long-term tiers.

use std::io;
use thiserror::Error;

/// Shorthand for results carrying a [`StorageError`].
pub type StorageResult<T> = Result<T, StorageError>;

/// Everything a backend, ledger store or tier can report.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `read_at` asked for bytes past the current size.
    #[error("read of {len} bytes at {offset} exceeds size {size}")]
    ReadPastEnd {
        /// Start of the read.
        offset: u64,
        /// Bytes asked for.
        len: usize,
        /// Size at the time of the read.
        size: u64,
    },

    /// No ledger or tier object with this name.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Tier writes only ever land at the current end of an object.
    #[error("write to {name} at {actual}, but the object ends at {expected}")]
    InvalidOffset {
        /// Object written to.
        name: String,
        /// Length of the object.
        expected: u64,
        /// Offset given by the caller.
        actual: u64,
    },

    /// A second process tried to open a locked ledger directory.
    #[error("ledger directory {0} is locked by another process")]
    Locked(String),
}

impl StorageError {
    /// Builds [`StorageError::NotFound`].
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    pub(crate) fn invalid_input(message: String) -> Self {
        Self::Io(io::Error::new(io::ErrorKind::InvalidInput, message))
    }
}
