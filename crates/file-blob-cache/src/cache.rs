//! Shared blob cache over a directory of entry files

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{BlobCacheError, Result};
use crate::item::Item;
use crate::key::validate_key;
use crate::lock::{CacheLock, Gate, LockMode, LockedFile};
use crate::types::{CacheFileInfo, CacheStats, PurgeReport};

/// Name of the reserved file holding the aggregate entry size
pub const CACHE_INFO_FILE: &str = "cache_info";

/// Chunk size used when copying a source file into the cache
pub const TRANSFER_BUFFER_SIZE: usize = 1024 * 1024;

/// A handle on a cache directory shared with other processes
///
/// The handle owns an open descriptor on the cache info file for its whole
/// life. Dropping the handle closes it.
#[derive(Debug)]
pub struct BlobCache {
    cache_dir: PathBuf,
    info_path: PathBuf,
    /// Upper bound in bytes, 0 for unlimited
    max_size: u64,
    /// Bytes a purge frees below `max_size`, 0 to never purge
    purge_size: u64,
    cache_info: File,
    cache_gate: Gate,
    item_gate: Gate,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BlobCache {
    /// Open (creating if needed) the cache info file in an existing directory
    pub fn initialize(
        cache_dir: impl Into<PathBuf>,
        max_size: u64,
        purge_size: u64,
    ) -> Result<Self> {
        let cache_dir = cache_dir.into();
        if cache_dir.as_os_str().is_empty() {
            return Err(BlobCacheError::Config(
                "cache directory is not set".to_string(),
            ));
        }

        let meta =
            fs::metadata(&cache_dir).map_err(|e| BlobCacheError::io("stat", &cache_dir, e))?;
        if !meta.is_dir() {
            return Err(BlobCacheError::Config(format!(
                "{} is not a directory",
                cache_dir.display()
            )));
        }

        let info_path = cache_dir.join(CACHE_INFO_FILE);
        let cache_info = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&info_path)
            .map_err(|e| BlobCacheError::io("open", &info_path, e))?;

        let cache = Self {
            cache_dir,
            info_path,
            max_size,
            purge_size,
            cache_info,
            cache_gate: Gate::default(),
            item_gate: Gate::default(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };

        // Two processes may race to create the file; only one sees it empty.
        let created = cache.lock_cache()?.init_size()?;

        info!(
            cache_dir = ?cache.cache_dir,
            max_size,
            purge_size,
            created,
            "Blob cache initialized"
        );
        Ok(cache)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn purge_size(&self) -> u64 {
        self.purge_size
    }

    /// Validity check: the info descriptor is open and usable
    ///
    /// A cache directory removed underneath the handle is not a broken
    /// handle; operations report it as an I/O failure.
    pub fn invariant(&self) -> bool {
        self.cache_info.metadata().is_ok()
    }

    /// Current value of the size counter
    pub fn cache_info_size(&self) -> Result<u64> {
        debug_assert!(self.invariant());
        self.lock_cache()?.read_size()
    }

    /// Copy `source_path` into the cache under `key`, returning the bytes stored
    ///
    /// Fails with [`BlobCacheError::KeyExists`] without touching the cached
    /// entry if `key` is already present.
    pub fn try_put(&self, key: &str, source_path: impl AsRef<Path>) -> Result<u64> {
        debug_assert!(self.invariant());
        validate_key(key)?;
        let source_path = source_path.as_ref();

        let mut source = File::open(source_path)
            .map_err(|e| BlobCacheError::io("open source", source_path, e))?;

        let lock = self.lock_cache()?;
        let path = self.entry_path(key);

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BlobCacheError::KeyExists(key.to_string()));
            }
            Err(e) => return Err(BlobCacheError::io("create", &path, e)),
        };

        let entry = match LockedFile::lock(file, LockMode::Exclusive, &self.item_gate) {
            Ok(entry) => entry,
            Err(e) => {
                self.discard(&path);
                return Err(BlobCacheError::io("lock", &path, e));
            }
        };

        let stored = copy_chunked(&mut source, entry.file())
            .map_err(|e| BlobCacheError::io("copy", &path, e))
            .and_then(|size| {
                let total = lock.read_size()?;
                lock.write_size(total.saturating_add(size))?;
                Ok(size)
            });

        drop(entry);
        match stored {
            Ok(size) => {
                drop(lock);
                debug!(key = %key, size, "Cached blob");
                Ok(size)
            }
            Err(e) => {
                self.discard(&path);
                Err(e)
            }
        }
    }

    /// Open `key` for reading with a shared lock held by the returned [`Item`]
    pub fn try_get(&self, key: &str) -> Result<Item> {
        debug_assert!(self.invariant());
        validate_key(key)?;

        let lock = self.lock_cache()?;
        let path = self.entry_path(key);

        let Some(file) = open_entry(&path)? else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Err(BlobCacheError::NotFound(key.to_string()));
        };

        let locked = LockedFile::lock(file, LockMode::Shared, &self.item_gate)
            .map_err(|e| BlobCacheError::io("lock", &path, e))?;
        drop(lock);

        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Cache hit");
        Ok(Item::new(key.to_string(), path, locked))
    }

    /// Remove `key`, waiting for its readers to finish; returns the bytes freed
    pub fn try_del(&self, key: &str) -> Result<u64> {
        debug_assert!(self.invariant());
        validate_key(key)?;

        let lock = self.lock_cache()?;
        let path = self.entry_path(key);

        let Some(file) = open_entry(&path)? else {
            return Err(BlobCacheError::NotFound(key.to_string()));
        };

        let entry = LockedFile::lock(file, LockMode::Exclusive, &self.item_gate)
            .map_err(|e| BlobCacheError::io("lock", &path, e))?;
        let size = entry
            .file()
            .metadata()
            .map_err(|e| BlobCacheError::io("stat", &path, e))?
            .len();

        fs::remove_file(&path).map_err(|e| BlobCacheError::io("remove", &path, e))?;

        let total = lock.read_size()?;
        if total < size {
            warn!(key = %key, total, size, "Cache size counter below entry size");
        }
        lock.write_size(total.saturating_sub(size))?;

        drop(entry);
        drop(lock);
        debug!(key = %key, size, "Deleted blob");
        Ok(size)
    }

    /// Remove every entry and zero the counter, returning the number removed
    ///
    /// A removal failure does not stop the sweep. The counter then holds the
    /// size of whatever is left and the first error is returned.
    pub fn try_clear(&self) -> Result<usize> {
        debug_assert!(self.invariant());
        let lock = self.lock_cache()?;

        let dir = fs::read_dir(&self.cache_dir)
            .map_err(|e| BlobCacheError::io("list", &self.cache_dir, e))?;

        let mut removed = 0;
        let mut remaining = 0u64;
        let mut first_error = None;

        for entry in dir {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    first_error.get_or_insert(BlobCacheError::io("list", &self.cache_dir, e));
                    continue;
                }
            };
            if entry.file_name() == CACHE_INFO_FILE {
                continue;
            }

            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to remove cache entry");
                    remaining += entry
                        .metadata()
                        .ok()
                        .filter(|m| m.is_file())
                        .map(|m| m.len())
                        .unwrap_or(0);
                    first_error.get_or_insert(BlobCacheError::io("remove", path, e));
                }
            }
        }

        lock.write_size(remaining)?;
        drop(lock);

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(cache_dir = ?self.cache_dir, removed, "Blob cache cleared");
                Ok(removed)
            }
        }
    }

    /// Evict least recently accessed entries once the cache is over `max_size`
    ///
    /// Never runs implicitly. Entries held by a reader are skipped. The
    /// counter is rewritten from the directory scan either way.
    pub fn try_purge(&self) -> Result<PurgeReport> {
        debug_assert!(self.invariant());
        let lock = self.lock_cache()?;

        let entries = self.scan(&lock)?;
        let mut size: u64 = entries.iter().map(|e| e.size).sum();
        let mut report = PurgeReport {
            size_before: size,
            ..PurgeReport::default()
        };

        let mut outcome = Ok(());
        if self.max_size > 0 && self.purge_size > 0 && size > self.max_size {
            let target = self.max_size.saturating_sub(self.purge_size);
            for entry in &entries {
                if size <= target {
                    break;
                }
                match self.evict(&entry.key) {
                    Ok(Eviction::Removed) => {
                        size = size.saturating_sub(entry.size);
                        debug!(key = %entry.key, size = entry.size, "Purged blob");
                        report.removed.push(entry.key.clone());
                    }
                    Ok(Eviction::Busy) => report.busy.push(entry.key.clone()),
                    Ok(Eviction::Gone) => {
                        size = size.saturating_sub(entry.size);
                        debug!(key = %entry.key, "Entry vanished during purge");
                    }
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }
        }

        lock.write_size(size)?;
        drop(lock);
        outcome?;

        report.size_after = size;
        info!(
            removed = report.removed.len(),
            busy = report.busy.len(),
            size_before = report.size_before,
            size_after = report.size_after,
            "Blob cache purge finished"
        );
        Ok(report)
    }

    /// Rebuild the counter from the directory contents, returning the new total
    pub fn reconcile(&self) -> Result<u64> {
        debug_assert!(self.invariant());
        let lock = self.lock_cache()?;

        let total: u64 = self.scan(&lock)?.iter().map(|e| e.size).sum();
        let previous = lock.read_size().ok();
        lock.write_size(total)?;

        if previous != Some(total) {
            info!(?previous, total, "Cache size counter rebuilt");
        }
        Ok(total)
    }

    /// Entries currently cached, least recently accessed first
    pub fn entries(&self) -> Result<Vec<CacheFileInfo>> {
        debug_assert!(self.invariant());
        let lock = self.lock_cache()?;
        self.scan(&lock)
    }

    /// Counter, entry count and this handle's hit/miss counts
    pub fn stats(&self) -> Result<CacheStats> {
        debug_assert!(self.invariant());
        let lock = self.lock_cache()?;
        let entries = self.scan(&lock)?.len();
        let total_size = lock.read_size()?;

        Ok(CacheStats {
            entries,
            total_size,
            max_size: self.max_size,
            purge_size: self.purge_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        })
    }

    pub fn put(&self, key: &str, source_path: impl AsRef<Path>) -> bool {
        self.try_put(key, source_path)
            .inspect_err(|e| log_failure("put", key, e))
            .is_ok()
    }

    pub fn get(&self, key: &str) -> Option<Item> {
        self.try_get(key)
            .inspect_err(|e| log_failure("get", key, e))
            .ok()
    }

    pub fn del(&self, key: &str) -> bool {
        self.try_del(key)
            .inspect_err(|e| log_failure("del", key, e))
            .is_ok()
    }

    pub fn clear(&self) -> bool {
        self.try_clear()
            .inspect_err(|e| log_failure("clear", "", e))
            .is_ok()
    }

    pub fn purge(&self) -> bool {
        self.try_purge()
            .inspect_err(|e| log_failure("purge", "", e))
            .is_ok()
    }

    fn lock_cache(&self) -> Result<CacheLock<'_>> {
        CacheLock::acquire(&self.cache_info, &self.info_path, &self.cache_gate)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(key)
    }

    /// Remove one entry unless a reader holds it
    fn evict(&self, key: &str) -> Result<Eviction> {
        let path = self.entry_path(key);
        let Some(file) = open_entry(&path)? else {
            return Ok(Eviction::Gone);
        };

        let Some(entry) = LockedFile::try_exclusive(file, &self.item_gate)
            .map_err(|e| BlobCacheError::io("lock", &path, e))?
        else {
            return Ok(Eviction::Busy);
        };

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Eviction::Gone),
            Err(e) => return Err(BlobCacheError::io("remove", &path, e)),
        }
        drop(entry);
        Ok(Eviction::Removed)
    }

    /// Drop a partially written entry
    fn discard(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = ?path, error = %e, "Failed to remove partial cache entry");
        }
    }

    /// List entry files; the lock argument proves the cache lock is held
    fn scan(&self, _lock: &CacheLock<'_>) -> Result<Vec<CacheFileInfo>> {
        let dir = fs::read_dir(&self.cache_dir)
            .map_err(|e| BlobCacheError::io("list", &self.cache_dir, e))?;

        let mut entries = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|e| BlobCacheError::io("list", &self.cache_dir, e))?;
            // Keys are always UTF-8, so such a file was never put here
            let key = match entry.file_name().into_string() {
                Ok(key) => key,
                Err(name) => {
                    debug!(name = ?name, "Skipping non UTF-8 file in cache directory");
                    continue;
                }
            };
            if key == CACHE_INFO_FILE {
                continue;
            }

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(BlobCacheError::io("stat", entry.path(), e)),
            };
            if !meta.is_file() {
                continue;
            }

            let accessed = meta
                .accessed()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push(CacheFileInfo {
                key,
                size: meta.len(),
                accessed_at: DateTime::<Utc>::from(accessed),
            });
        }

        entries.sort_by(|a, b| a.accessed_at.cmp(&b.accessed_at).then_with(|| a.key.cmp(&b.key)));
        Ok(entries)
    }
}

/// What became of an entry a purge tried to evict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eviction {
    Removed,
    /// A reader holds it
    Busy,
    /// Someone else removed it first
    Gone,
}

/// Open an entry for locking; `None` unless it exists as a regular file
fn open_entry(path: &Path) -> Result<Option<File>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BlobCacheError::io("open", path, e)),
    };
    let meta = file
        .metadata()
        .map_err(|e| BlobCacheError::io("stat", path, e))?;
    Ok(meta.is_file().then_some(file))
}

fn log_failure(op: &'static str, key: &str, err: &BlobCacheError) {
    if err.is_miss() {
        debug!(op, key = %key, error = %err, "Blob cache miss");
    } else {
        warn!(op, key = %key, error = %err, "Blob cache operation failed");
    }
}

/// Copy through one reused buffer so large blobs never sit in memory
fn copy_chunked(source: &mut File, mut dest: &File) -> io::Result<u64> {
    let mut buf = vec![0u8; TRANSFER_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        dest.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}
