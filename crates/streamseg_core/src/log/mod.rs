//! The durable operation log.
//!
//! The log is the single point of durability and total order for a
//! container. Operations are serialized, framed with a checksum, and
//! appended to a run of ledgers:
//!
//! ```text
//! ledger 1: | op 1 | op 2 | ... | op k |
//! ledger 2: | checkpoint k+1 | op k+2 | ...
//! ```
//!
//! # Recovery policy
//!
//! - An incomplete frame at the end of the newest ledger is the remains of
//!   a crashed append. It was never acknowledged, so it is cut off.
//! - Bad magic, a checksum mismatch, an undecodable record, or a gap in
//!   sequence numbers is corruption. Nothing after it can be trusted, so
//!   opening or reading stops with an error.

mod frame;
mod iterator;
mod writer;

pub use frame::{compute_crc32, encode_frame, FRAME_MAGIC, FRAME_OVERHEAD};
pub use iterator::{FrameItem, FrameIterator, LedgerScan, LogReader};
pub use writer::{DurableLog, LedgerInfo};
