//! # StreamSeg Testkit
//!
//! Shared scaffolding for store tests:
//! - fixtures that reopen a store over the same ledgers and tier
//! - proptest strategies for operations and mixed workloads
//! - ledger stores and tiers that fail or crash on demand
//!
//! Cross-crate integration tests live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use streamseg_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn survives_restart() {
//!     let fixture = TestStore::new();
//!     let store = fixture.open().await;
//!     let id = store.create_segment("s").await.unwrap();
//!     drop(store);
//!     assert_eq!(fixture.open().await.lookup("s"), Some(id));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Everything above, for glob import.
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
