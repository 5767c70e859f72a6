//! Ledger files on the local filesystem.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// One ledger file.
///
/// The file length is tracked in memory so that reads past the last
/// complete append fail without a `stat` call. `flush` issues
/// `sync_data`; `sync` and `truncate` issue `sync_all`, since both change
/// the file length.
///
/// ```no_run
/// use streamseg_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut ledger = FileBackend::create(Path::new("00000000000000000001.ledger"))?;
/// ledger.append(b"frame")?;
/// ledger.flush()?;
/// # Ok::<(), streamseg_storage::StorageError>(())
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    len: u64,
}

impl FileBackend {
    /// Opens the ledger at `path`, creating an empty one if needed.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        Self::with_options(path, OpenOptions::new().create(true).truncate(false))
    }

    /// Opens an existing ledger.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if there is no file at `path`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::with_options(path, &mut OpenOptions::new()).map_err(|e| match e {
            StorageError::Io(io) if io.kind() == io::ErrorKind::NotFound => {
                StorageError::not_found(path.display().to_string())
            }
            other => other,
        })
    }

    fn with_options(path: &Path, options: &mut OpenOptions) -> StorageResult<Self> {
        let file = options.read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len,
        })
    }

    /// Where the ledger lives.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn size(&self) -> StorageResult<u64> {
        Ok(self.len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let at = self.len;
        if !data.is_empty() {
            let file = self.file.get_mut();
            file.seek(SeekFrom::Start(at))?;
            file.write_all(data)?;
            self.len += data.len() as u64;
        }
        Ok(at)
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let in_bounds = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.len);
        if !in_bounds {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.len,
            });
        }

        let mut buf = vec![0u8; len];
        if len > 0 {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let file = self.file.get_mut();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.get_mut().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.len {
            return Err(StorageError::invalid_input(format!(
                "cannot grow ledger {} from {} to {new_size} by truncation",
                self.path.display(),
                self.len
            )));
        }
        let file = self.file.get_mut();
        file.set_len(new_size)?;
        file.sync_all()?;
        self.len = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn frames_written_then_reopened() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("00000000000000000001.ledger");
        {
            let mut ledger = FileBackend::create(&path).unwrap();
            assert_eq!(ledger.append(b"first").unwrap(), 0);
            assert_eq!(ledger.append(b"second").unwrap(), 5);
            ledger.sync().unwrap();
        }

        let ledger = FileBackend::open(&path).unwrap();
        assert_eq!(ledger.size().unwrap(), 11);
        assert_eq!(ledger.read_at(5, 6).unwrap(), b"second");
        assert_eq!(ledger.read_all().unwrap(), b"firstsecond");
    }

    #[test]
    fn read_beyond_length_is_rejected() {
        let dir = tempdir().unwrap();
        let mut ledger = FileBackend::create(&dir.path().join("l")).unwrap();
        ledger.append(b"abc").unwrap();
        assert!(matches!(
            ledger.read_at(2, 2),
            Err(StorageError::ReadPastEnd { size: 3, .. })
        ));
        assert!(ledger.read_at(u64::MAX, 1).is_err());
        assert!(ledger.read_at(3, 0).unwrap().is_empty());
    }

    #[test]
    fn truncate_then_append_overwrites_tail() {
        let dir = tempdir().unwrap();
        let mut ledger = FileBackend::create(&dir.path().join("l")).unwrap();
        ledger.append(b"complete|torn").unwrap();
        ledger.truncate(9).unwrap();
        ledger.append(b"next").unwrap();
        assert_eq!(ledger.read_all().unwrap(), b"complete|next");
        assert!(ledger.truncate(100).is_err());
    }

    #[test]
    fn open_requires_existing_file() {
        let dir = tempdir().unwrap();
        let result = FileBackend::open(&dir.path().join("missing.ledger"));
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
