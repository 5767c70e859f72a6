//! # StreamSeg Core
//!
//! Durable storage core for a segment-oriented stream store.
//!
//! This crate provides:
//! - Operations and their versioned binary serializer
//! - A ledgered, checksummed durable operation log with truncation
//! - Segment state derived by deterministic replay of the log
//! - A read cache that never evicts unflushed data
//! - A tiered read pipeline over cache, long-term storage and future appends
//! - A storage writer that flushes segment data and finishes batch merges
//! - The [`SegmentStore`] that sequences writes and recovers on open
//!
//! ## Example
//!
//! ```rust,ignore
//! use streamseg_core::{AppendContext, SegmentStore};
//! use uuid::Uuid;
//!
//! let store = SegmentStore::open_in_memory().await?;
//! let id = store.create_segment("orders").await?;
//! store.append(id, &b"event"[..], AppendContext::new(Uuid::new_v4(), 1)).await?;
//!
//! let mut result = store.read(id, 0, 1024)?;
//! while let Some(mut entry) = result.next_entry()? {
//!     let bytes = entry.content().await?;
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod error;
pub mod log;
pub mod operation;
pub mod read;
mod recovery;
mod state;
mod storage_writer;
mod store;
mod types;

pub use cache::{CacheStats, ReadCache};
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use log::{DurableLog, LedgerInfo, LedgerScan, LogReader};
pub use operation::{
    AppendIntent, MergeBatchIntent, Operation, OperationHeader, OperationType, SealIntent,
};
pub use read::{EntryState, ReadResult, ReadResultEntry, ReadResultEntryType, Wakeup};
pub use recovery::RecoveryStats;
pub use state::{segment_map, PendingMerge, SegmentState, SegmentStateTable};
pub use storage_writer::FlushStats;
pub use store::SegmentStore;
pub use types::{AppendContext, SegmentId, SequenceNumber};
