//! # StreamSeg Storage
//!
//! Storage abstractions underneath the StreamSeg segment store.
//!
//! Two kinds of storage live here, and neither interprets the bytes it
//! holds:
//!
//! - **Durable media** ([`StorageBackend`]) grouped into ledgers by a
//!   [`LedgerStore`]. The operation log frames its records onto them.
//! - **The long-term tier** ([`LongTermStorage`]), where segment data ends up
//!   once the storage writer flushes it.
//!
//! ## Available Implementations
//!
//! - [`InMemoryBackend`] / [`InMemoryLedgerStore`] / [`InMemoryTier`] - For testing
//! - [`FileBackend`] / [`FileLedgerStore`] / [`FileTier`] - For persistent storage
//!
//! ## Example
//!
//! ```rust
//! use streamseg_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod ledger;
mod memory;
mod tier;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use ledger::{FileLedgerStore, InMemoryLedgerStore, LedgerId, LedgerStore};
pub use memory::InMemoryBackend;
pub use tier::{FileTier, InMemoryTier, LongTermStorage};
