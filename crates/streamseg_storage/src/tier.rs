//! Long-term storage tier.
//!
//! The tier is the bulk, higher-latency home of segment data. The storage
//! writer copies flushed ranges into it and the read pipeline falls back to it
//! on a cache miss. Objects are addressed by segment name and only ever grow
//! at their end.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Async interface to the long-term storage tier.
#[async_trait]
pub trait LongTermStorage: Send + Sync {
    /// Reads exactly `len` bytes of `name` starting at `offset`.
    async fn read(&self, name: &str, offset: u64, len: usize) -> StorageResult<Bytes>;

    /// Writes `data` at `offset`, which must equal the object's current
    /// length (zero creates the object). Returns the committed length.
    async fn write(&self, name: &str, offset: u64, data: &[u8]) -> StorageResult<u64>;

    /// Appends all of `source` to the end of `target` and removes `source`.
    /// Returns the new length of `target`.
    async fn concat(&self, target: &str, source: &str) -> StorageResult<u64>;

    /// Returns the current length of `name`, or `None` if it does not exist.
    async fn length(&self, name: &str) -> StorageResult<Option<u64>>;

    /// Removes `name`.
    async fn delete(&self, name: &str) -> StorageResult<()>;
}

/// In-memory tier for tests and ephemeral stores.
#[derive(Debug, Default)]
pub struct InMemoryTier {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    reads: AtomicU64,
}

impl InMemoryTier {
    /// Creates an empty tier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `read` calls served so far.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns a copy of an object's bytes.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.objects.read().get(name).cloned()
    }
}

#[async_trait]
impl LongTermStorage for InMemoryTier {
    async fn read(&self, name: &str, offset: u64, len: usize) -> StorageResult<Bytes> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let objects = self.objects.read();
        let data = objects
            .get(name)
            .ok_or_else(|| StorageError::not_found(name))?;
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);
        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }

    async fn write(&self, name: &str, offset: u64, data: &[u8]) -> StorageResult<u64> {
        let mut objects = self.objects.write();
        let object = objects.entry(name.to_string()).or_default();
        let current = object.len() as u64;
        if current != offset {
            return Err(StorageError::InvalidOffset {
                name: name.to_string(),
                expected: current,
                actual: offset,
            });
        }
        object.extend_from_slice(data);
        Ok(object.len() as u64)
    }

    async fn concat(&self, target: &str, source: &str) -> StorageResult<u64> {
        let mut objects = self.objects.write();
        let source_bytes = objects
            .remove(source)
            .ok_or_else(|| StorageError::not_found(source))?;
        let object = objects.entry(target.to_string()).or_default();
        object.extend_from_slice(&source_bytes);
        Ok(object.len() as u64)
    }

    async fn length(&self, name: &str) -> StorageResult<Option<u64>> {
        Ok(self.objects.read().get(name).map(|o| o.len() as u64))
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        self.objects
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(name))
    }
}

/// Tier that stores one file per segment under a root directory.
#[derive(Debug, Clone)]
pub struct FileTier {
    root: PathBuf,
}

impl FileTier {
    /// Creates a tier rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.seg", escape_name(name)))
    }
}

/// Flattens a segment name into a single file name. `%` is escaped along
/// with the separators so that distinct names never share a file.
fn escape_name(name: &str) -> String {
    let mut flat = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => flat.push_str("%25"),
            '/' => flat.push_str("%2F"),
            '\\' => flat.push_str("%5C"),
            c => flat.push(c),
        }
    }
    flat
}

#[async_trait]
impl LongTermStorage for FileTier {
    async fn read(&self, name: &str, offset: u64, len: usize) -> StorageResult<Bytes> {
        let path = self.object_path(name);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(name))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }

    async fn write(&self, name: &str, offset: u64, data: &[u8]) -> StorageResult<u64> {
        let path = self.object_path(name);
        let current = self.length(name).await?.unwrap_or(0);
        if current != offset {
            return Err(StorageError::InvalidOffset {
                name: name.to_string(),
                expected: current,
                actual: offset,
            });
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(data).await?;
        file.sync_data().await?;
        Ok(current + data.len() as u64)
    }

    async fn concat(&self, target: &str, source: &str) -> StorageResult<u64> {
        let source_path = self.object_path(source);
        let source_bytes = match tokio::fs::read(&source_path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(source))
            }
            Err(e) => return Err(e.into()),
        };
        let current = self.length(target).await?.unwrap_or(0);
        let committed = self.write(target, current, &source_bytes).await?;
        tokio::fs::remove_file(&source_path).await?;
        Ok(committed)
    }

    async fn length(&self, name: &str) -> StorageResult<Option<u64>> {
        match tokio::fs::metadata(self.object_path(name)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        match tokio::fs::remove_file(self.object_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(name))
            }
            Err(e) => Err(e.into()),
        }
    }
}
