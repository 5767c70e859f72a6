//! CLI command implementations.

pub mod dump_log;
pub mod inspect;
pub mod verify;

use std::path::Path;
use streamseg_storage::FileLedgerStore;

/// How a command prints its report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human readable tables.
    Text,
    /// Pretty printed JSON.
    Json,
}

/// Opens the ledger directory of a store without creating it.
pub fn open_ledgers(path: &Path) -> Result<FileLedgerStore, Box<dyn std::error::Error>> {
    let dir = path.join("log");
    if !dir.is_dir() {
        return Err(format!("No operation log found at {}", dir.display()).into());
    }
    Ok(FileLedgerStore::open(&dir)?)
}
