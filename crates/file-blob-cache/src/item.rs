use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::lock::LockedFile;

/// A cached entry opened for reading
///
/// The item keeps a shared lock on the entry file. Other readers are not
/// affected, but `del` of the same key (and `purge` of it) waits until every
/// item for that key is dropped, so do not hold one longer than the read.
#[derive(Debug)]
pub struct Item {
    key: String,
    path: PathBuf,
    locked: LockedFile,
}

impl Item {
    pub(crate) fn new(key: String, path: PathBuf, locked: LockedFile) -> Self {
        Self { key, path, locked }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Path of the entry file inside the cache directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The open, locked descriptor
    pub fn file(&self) -> &File {
        self.locked.file()
    }

    /// Size of the entry in bytes
    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file().metadata()?.len())
    }

    /// Read the whole entry from the start
    pub fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let file = self.locked.file_mut();
        file.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl Read for Item {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.locked.file_mut().read(buf)
    }
}

impl Seek for Item {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.locked.file_mut().seek(pos)
    }
}
