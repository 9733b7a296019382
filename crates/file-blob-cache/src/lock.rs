//! Advisory locks on the counter file and on entry files
//!
//! `flock`-style locks only coordinate open file descriptions. Threads that
//! share the handle's single counter descriptor would all "hold" the same
//! lock, so every lock call first passes a process-local [`Gate`].

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use fs2::FileExt;
use tracing::warn;

use crate::error::{BlobCacheError, Result};

/// Width of the size counter stored in the cache info file
pub(crate) const COUNTER_LEN: u64 = std::mem::size_of::<u64>() as u64;

/// Process-local mutex in front of advisory lock acquisition
#[derive(Debug, Default)]
pub(crate) struct Gate(Mutex<()>);

impl Gate {
    pub(crate) fn enter(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, a panicking holder cannot leave it inconsistent.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive lock on the cache info file for one structural operation
///
/// The counter can only be read or written through this guard, so every
/// counter mutation happens with the cache lock held.
pub(crate) struct CacheLock<'a> {
    file: &'a File,
    path: &'a Path,
    _gate: MutexGuard<'a, ()>,
}

impl<'a> CacheLock<'a> {
    pub(crate) fn acquire(file: &'a File, path: &'a Path, gate: &'a Gate) -> Result<Self> {
        let guard = gate.enter();
        FileExt::lock_exclusive(file).map_err(|e| BlobCacheError::io("lock", path, e))?;
        Ok(Self {
            file,
            path,
            _gate: guard,
        })
    }

    /// Write a zero counter into a freshly created info file
    pub(crate) fn init_size(&self) -> Result<bool> {
        let len = self.info_len()?;
        match len {
            0 => {
                self.write_size(0)?;
                Ok(true)
            }
            COUNTER_LEN => Ok(false),
            _ => Err(self.corrupt(len)),
        }
    }

    pub(crate) fn read_size(&self) -> Result<u64> {
        let len = self.info_len()?;
        if len != COUNTER_LEN {
            return Err(self.corrupt(len));
        }

        let mut file = self.file;
        let mut buf = [0u8; COUNTER_LEN as usize];
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| BlobCacheError::io("read size", self.path, e))?;
        Ok(u64::from_ne_bytes(buf))
    }

    pub(crate) fn write_size(&self, size: u64) -> Result<()> {
        let mut file = self.file;
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.write_all(&size.to_ne_bytes()))
            .map_err(|e| BlobCacheError::io("write size", self.path, e))
    }

    fn info_len(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| BlobCacheError::io("stat", self.path, e))
    }

    fn corrupt(&self, len: u64) -> BlobCacheError {
        BlobCacheError::Corrupt(format!(
            "{} holds {len} bytes, expected {COUNTER_LEN}",
            self.path.display()
        ))
    }
}

impl Drop for CacheLock<'_> {
    fn drop(&mut self) {
        // Runs before the gate guard field is dropped.
        if let Err(e) = FileExt::unlock(self.file) {
            warn!(path = ?self.path, error = %e, "Failed to release cache lock");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    Shared,
    Exclusive,
}

/// An open entry file that holds an advisory lock until dropped
#[derive(Debug)]
pub(crate) struct LockedFile {
    file: File,
}

impl LockedFile {
    /// Block until the lock is granted
    pub(crate) fn lock(file: File, mode: LockMode, gate: &Gate) -> io::Result<Self> {
        let _guard = gate.enter();
        match mode {
            LockMode::Shared => FileExt::lock_shared(&file)?,
            LockMode::Exclusive => FileExt::lock_exclusive(&file)?,
        }
        Ok(Self { file })
    }

    /// Take an exclusive lock without waiting, `None` if someone holds the file
    pub(crate) fn try_exclusive(file: File, gate: &Gate) -> io::Result<Option<Self>> {
        let _guard = gate.enter();
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn file(&self) -> &File {
        &self.file
    }

    pub(crate) fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        // Closing the descriptor would release the lock too; unlock first
        // so a failure shows up in the log.
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = %e, "Failed to release item lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    fn open_rw(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .unwrap()
    }

    #[test]
    fn test_counter_roundtrip_under_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache_info");
        let file = open_rw(&path);
        let gate = Gate::default();

        let lock = CacheLock::acquire(&file, &path, &gate).unwrap();
        assert!(lock.init_size().unwrap());
        assert_eq!(lock.read_size().unwrap(), 0);
        lock.write_size(10).unwrap();
        assert_eq!(lock.read_size().unwrap(), 10);
        lock.write_size(27).unwrap();
        assert_eq!(lock.read_size().unwrap(), 27);
        assert!(!lock.init_size().unwrap());
        drop(lock);

        assert_eq!(std::fs::metadata(&path).unwrap().len(), COUNTER_LEN);
    }

    #[test]
    fn test_wrong_length_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache_info");
        std::fs::write(&path, b"abc").unwrap();
        let file = open_rw(&path);
        let gate = Gate::default();

        let lock = CacheLock::acquire(&file, &path, &gate).unwrap();
        assert!(matches!(lock.read_size(), Err(BlobCacheError::Corrupt(_))));
        assert!(matches!(lock.init_size(), Err(BlobCacheError::Corrupt(_))));
    }

    #[test]
    fn test_exclusive_try_lock_sees_shared_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entry");
        std::fs::write(&path, b"data").unwrap();
        let gate = Gate::default();

        let reader = LockedFile::lock(File::open(&path).unwrap(), LockMode::Shared, &gate).unwrap();
        let second = LockedFile::lock(File::open(&path).unwrap(), LockMode::Shared, &gate).unwrap();

        let writer = LockedFile::try_exclusive(open_rw(&path), &gate).unwrap();
        assert!(writer.is_none());

        drop(reader);
        drop(second);
        let writer = LockedFile::try_exclusive(open_rw(&path), &gate).unwrap();
        assert!(writer.is_some());
    }
}
