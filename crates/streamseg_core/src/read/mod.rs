//! The tiered read pipeline.
//!
//! A read produces a [`ReadResult`], a lazy sequence of
//! [`ReadResultEntry`] values. Each entry covers a contiguous range and
//! says where its bytes come from:
//!
//! | Entry | When | Content |
//! |---|---|---|
//! | `Cache` | range is cached | ready immediately |
//! | `Storage` | range is below the segment length but not cached | fetched from the tier in the background |
//! | `Future` | offset equals the length of an open segment | resolves on the next append |
//! | `EndOfStreamSegment` | offset equals the length of a sealed segment | terminal |
//! | `Truncated` | offset is before the segment start offset | terminal |
//!
//! Resolving an entry never changes segment state. Storage fetches do add
//! the fetched bytes to the cache.

mod entry;
mod future_reads;
mod index;
mod result;

pub use entry::{EntryState, ReadResultEntry, ReadResultEntryType};
pub use future_reads::{FutureReadGuard, FutureReadRegistry, Wakeup};
pub(crate) use index::ReadIndex;
pub use result::ReadResult;
