//! Ledger stores: named, ordered collections of durable media.
//!
//! The operation log is split into ledgers so that truncation can drop whole
//! objects instead of rewriting a file in place. A ledger store only knows
//! how to create, open, list and delete ledgers; it never looks inside them.
//!
//! ```text
//! <log_dir>/
//! ├─ LOCK                          # Advisory lock for single-writer
//! ├─ 00000000000000000001.ledger
//! └─ 00000000000000000002.ledger
//! ```

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifier of a ledger. Ledger ids increase monotonically.
pub type LedgerId = u64;

const LOCK_FILE: &str = "LOCK";
const LEDGER_EXTENSION: &str = "ledger";

/// Provides the durable media that make up a log.
pub trait LedgerStore: Send + Sync {
    /// Creates a new, empty ledger.
    ///
    /// # Errors
    ///
    /// Fails if a ledger with this id already exists or cannot be created.
    fn create(&self, id: LedgerId) -> StorageResult<Box<dyn StorageBackend>>;

    /// Opens an existing ledger.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the ledger does not exist.
    fn open(&self, id: LedgerId) -> StorageResult<Box<dyn StorageBackend>>;

    /// Lists all ledger ids in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn list(&self) -> StorageResult<Vec<LedgerId>>;

    /// Permanently deletes a ledger.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the ledger does not exist.
    fn delete(&self, id: LedgerId) -> StorageResult<()>;
}

/// Ledger store kept entirely in memory.
///
/// Cloning the store shares the ledgers, which lets tests close a log and
/// reopen it against the same bytes.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedgerStore {
    ledgers: Arc<RwLock<BTreeMap<LedgerId, InMemoryBackend>>>,
}

impl InMemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a shared handle to a ledger's bytes, if it exists.
    #[must_use]
    pub fn backend(&self, id: LedgerId) -> Option<InMemoryBackend> {
        self.ledgers.read().get(&id).map(InMemoryBackend::share)
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn create(&self, id: LedgerId) -> StorageResult<Box<dyn StorageBackend>> {
        let mut ledgers = self.ledgers.write();
        if ledgers.contains_key(&id) {
            return Err(StorageError::invalid_input(format!(
                "ledger {id} already exists"
            )));
        }
        let backend = InMemoryBackend::new();
        ledgers.insert(id, backend.share());
        Ok(Box::new(backend))
    }

    fn open(&self, id: LedgerId) -> StorageResult<Box<dyn StorageBackend>> {
        self.backend(id)
            .map(|b| Box::new(b) as Box<dyn StorageBackend>)
            .ok_or_else(|| StorageError::not_found(format!("ledger {id}")))
    }

    fn list(&self) -> StorageResult<Vec<LedgerId>> {
        Ok(self.ledgers.read().keys().copied().collect())
    }

    fn delete(&self, id: LedgerId) -> StorageResult<()> {
        self.ledgers
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(format!("ledger {id}")))
    }
}

/// Ledger store backed by one file per ledger in a directory.
///
/// Holds an exclusive advisory lock on the directory for its lifetime so
/// that only one process writes the log.
#[derive(Debug)]
pub struct FileLedgerStore {
    dir: PathBuf,
    _lock_file: File,
}

impl FileLedgerStore {
    /// Opens (creating if needed) a ledger directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the lock.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(dir.display().to_string()));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory holding the ledgers.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ledger_path(&self, id: LedgerId) -> PathBuf {
        self.dir.join(format!("{id:020}.{LEDGER_EXTENSION}"))
    }
}

impl LedgerStore for FileLedgerStore {
    fn create(&self, id: LedgerId) -> StorageResult<Box<dyn StorageBackend>> {
        let path = self.ledger_path(id);
        if path.exists() {
            return Err(StorageError::invalid_input(format!(
                "ledger {id} already exists at {}",
                path.display()
            )));
        }
        let backend = FileBackend::create(&path)?;
        tracing::debug!(ledger = id, path = %path.display(), "created ledger");
        Ok(Box::new(backend))
    }

    fn open(&self, id: LedgerId) -> StorageResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FileBackend::open(&self.ledger_path(id))?))
    }

    fn list(&self) -> StorageResult<Vec<LedgerId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LEDGER_EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<LedgerId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn delete(&self, id: LedgerId) -> StorageResult<()> {
        let path = self.ledger_path(id);
        if !path.exists() {
            return Err(StorageError::not_found(format!("ledger {id}")));
        }
        fs::remove_file(&path)?;
        tracing::debug!(ledger = id, "deleted ledger");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_store_lists_in_order() {
        let store = InMemoryLedgerStore::new();
        store.create(3).unwrap();
        store.create(1).unwrap();
        store.create(2).unwrap();
        assert_eq!(store.list().unwrap(), vec![1, 2, 3]);

        store.delete(2).unwrap();
        assert_eq!(store.list().unwrap(), vec![1, 3]);
        assert!(store.delete(2).is_err());
    }

    #[test]
    fn memory_store_reopen_shares_bytes() {
        let store = InMemoryLedgerStore::new();
        let mut ledger = store.create(1).unwrap();
        ledger.append(b"abc").unwrap();

        let reopened = store.clone().open(1).unwrap();
        assert_eq!(reopened.read_at(0, 3).unwrap(), b"abc");
    }

    #[test]
    fn memory_store_rejects_duplicate_create() {
        let store = InMemoryLedgerStore::new();
        store.create(1).unwrap();
        assert!(store.create(1).is_err());
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileLedgerStore::open(dir.path()).unwrap();

        let mut ledger = store.create(7).unwrap();
        ledger.append(b"frame").unwrap();
        ledger.flush().unwrap();
        drop(ledger);

        assert_eq!(store.list().unwrap(), vec![7]);
        let ledger = store.open(7).unwrap();
        assert_eq!(ledger.read_at(0, 5).unwrap(), b"frame");

        store.delete(7).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(store.open(7), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn file_store_is_exclusive() {
        let dir = tempdir().unwrap();
        let _first = FileLedgerStore::open(dir.path()).unwrap();
        assert!(matches!(
            FileLedgerStore::open(dir.path()),
            Err(StorageError::Locked(_))
        ));
    }
}
