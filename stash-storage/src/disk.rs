//! File-backed store with one file per key.
//!
//! # Thread Safety
//!
//! A directory-wide reader/writer gate serializes every mutation (save,
//! remove, clear, sweep) while letting reads and size queries run
//! together. Saves go through a temporary file in the cache directory that
//! is renamed over the target, so readers never observe a partial record.
//!
//! All operations block on file I/O; async callers should run them on a
//! blocking pool.

use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use stash_core::{
    CacheEntry, CacheKey, Cacheable, DiskConfig, ExpirationPolicy, StorageError, StorageResult,
};
use tempfile::NamedTempFile;

use crate::record::{decode_record, encode_record};
use crate::sweep::Sweeper;
use crate::sync::{lock, read, write};

/// Files untouched for longer than this are swept regardless of content.
pub const FILE_AGE_CEILING: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn write_failure(path: &Path, e: io::Error) -> StorageError {
    StorageError::DiskWriteFailure {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn remove_failure(path: &Path, e: io::Error) -> StorageError {
    StorageError::DiskRemoveFailure {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Delete a file, treating an already missing file as success.
fn remove_file(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(remove_failure(path, e)),
    }
}

struct DiskInner<K, V> {
    directory: PathBuf,
    gate: RwLock<()>,
    config: RwLock<DiskConfig>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: CacheKey, V: Cacheable> DiskInner<K, V> {
    fn path_for(&self, key: &K) -> StorageResult<PathBuf> {
        Ok(self.directory.join(key.file_name()?))
    }

    /// Regular files in the cache directory with their metadata.
    fn list_files(&self) -> StorageResult<Vec<(PathBuf, fs::Metadata)>> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(remove_failure(&self.directory, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| remove_failure(&self.directory, e))?;
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                // Removed between listing and stat.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(remove_failure(&path, e)),
            };
            if metadata.is_file() {
                files.push((path, metadata));
            }
        }
        Ok(files)
    }

    fn read_entry(&self, path: &Path) -> StorageResult<Option<CacheEntry<V>>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::NotFound {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };
        decode_record(&bytes).map(Some)
    }

    fn save(&self, key: &K, value: V, expiration: Option<ExpirationPolicy>) -> StorageResult<()> {
        let expiration = expiration.unwrap_or_else(|| read(&self.config).expiration.clone());
        self.save_entry(key, &CacheEntry::new(value, expiration))
    }

    fn save_entry(&self, key: &K, entry: &CacheEntry<V>) -> StorageResult<()> {
        if entry.expiration().is_already_expired(Utc::now()) {
            return Err(StorageError::Expired);
        }

        let path = self.path_for(key)?;
        let bytes = encode_record(entry)?;

        let _gate = write(&self.gate);
        fs::create_dir_all(&self.directory).map_err(|e| write_failure(&self.directory, e))?;
        let mut file = NamedTempFile::new_in(&self.directory).map_err(|e| write_failure(&path, e))?;
        file.write_all(&bytes).map_err(|e| write_failure(&path, e))?;
        file.persist(&path).map_err(|e| write_failure(&path, e.error))?;

        tracing::debug!(key = ?key, path = %path.display(), bytes = bytes.len(), "Saved disk entry");
        Ok(())
    }

    fn retrieve_entry(&self, key: &K) -> StorageResult<Option<CacheEntry<V>>> {
        let path = self.path_for(key)?;
        let entry = {
            let _gate = read(&self.gate);
            match self.read_entry(&path)? {
                Some(entry) => entry,
                None => return Ok(None),
            }
        };

        if !entry.is_stale() {
            return Ok(Some(entry));
        }

        let _gate = write(&self.gate);
        if let Ok(Some(current)) = self.read_entry(&path) {
            if current.is_stale() {
                remove_file(&path)?;
                tracing::debug!(key = ?key, "Lazily removed expired disk entry");
            }
        }
        Ok(None)
    }

    fn remove(&self, key: &K) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let _gate = write(&self.gate);
        remove_file(&path)
    }

    fn remove_all(&self) -> StorageResult<()> {
        let _gate = write(&self.gate);
        let files = self.list_files()?;
        for (path, _) in &files {
            remove_file(path)?;
        }
        tracing::debug!(removed = files.len(), "Cleared disk cache");
        Ok(())
    }

    fn remove_expired(&self) -> StorageResult<usize> {
        let _gate = write(&self.gate);
        let now = SystemTime::now();
        let mut removed = 0;

        for (path, metadata) in self.list_files()? {
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or(Duration::ZERO);

            let expired = if age > FILE_AGE_CEILING {
                true
            } else {
                match self.read_entry(&path) {
                    Ok(Some(entry)) => entry.is_stale(),
                    Ok(None) => false,
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "Leaving undecodable cache file");
                        false
                    }
                }
            };

            if expired {
                match remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!(error = %e, "Failed to remove expired cache file"),
                }
            }
        }

        Ok(removed)
    }

    fn current_cache_size(&self) -> StorageResult<u64> {
        let _gate = read(&self.gate);
        Ok(self.list_files()?.iter().map(|(_, metadata)| metadata.len()).sum())
    }

    fn file_count(&self) -> StorageResult<usize> {
        let _gate = read(&self.gate);
        Ok(self.list_files()?.len())
    }
}

/// Thread-safe, file-backed key/entry store.
///
/// Every operation reports failures as a [`StorageError`]; a missing or
/// expired entry is `Ok(None)`, not an error.
pub struct DiskStorage<K, V> {
    inner: Arc<DiskInner<K, V>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<K: CacheKey, V: Cacheable> DiskStorage<K, V> {
    /// Create a store rooted at `config.directory`, creating the directory
    /// if needed, and start its background sweep.
    pub fn new(config: DiskConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.directory).map_err(|e| write_failure(&config.directory, e))?;

        let inner = Arc::new(DiskInner {
            directory: config.directory.clone(),
            gate: RwLock::new(()),
            config: RwLock::new(config.clone()),
            _marker: PhantomData,
        });
        let sweeper = start_sweeper(&inner, &config);
        tracing::debug!(directory = %config.directory.display(), "Disk store created");

        Ok(Self {
            inner,
            sweeper: Mutex::new(sweeper),
        })
    }

    /// Write a value to its key's file.
    ///
    /// Fails with [`StorageError::Expired`] when the effective policy is
    /// already expired.
    pub fn save(&self, key: &K, value: V, expiration: Option<ExpirationPolicy>) -> StorageResult<()> {
        self.inner.save(key, value, expiration)
    }

    /// Write a prebuilt entry, keeping its policy and creation time.
    ///
    /// Fails with [`StorageError::Expired`] when the entry's policy is
    /// already expired.
    pub fn save_entry(&self, key: &K, entry: &CacheEntry<V>) -> StorageResult<()> {
        self.inner.save_entry(key, entry)
    }

    pub fn retrieve(&self, key: &K) -> StorageResult<Option<V>> {
        Ok(self.retrieve_entry(key)?.map(CacheEntry::into_value))
    }

    /// Read the whole entry, including its policy and creation time.
    ///
    /// A stale entry is deleted and reported as absent.
    pub fn retrieve_entry(&self, key: &K) -> StorageResult<Option<CacheEntry<V>>> {
        self.inner.retrieve_entry(key)
    }

    pub fn is_cached(&self, key: &K) -> bool {
        matches!(self.inner.retrieve_entry(key), Ok(Some(_)))
    }

    /// Delete the key's file. A missing file is not an error.
    pub fn remove(&self, key: &K) -> StorageResult<()> {
        self.inner.remove(key)
    }

    /// Delete every file in the cache directory.
    pub fn remove_all(&self) -> StorageResult<()> {
        self.inner.remove_all()
    }

    /// Delete files that are older than [`FILE_AGE_CEILING`] or whose entry
    /// is stale, returning how many were deleted.
    ///
    /// Files that cannot be decoded are kept until they pass the age
    /// ceiling.
    pub fn remove_expired(&self) -> StorageResult<usize> {
        self.inner.remove_expired()
    }

    /// Total size in bytes of the files in the cache directory.
    pub fn current_cache_size(&self) -> StorageResult<u64> {
        self.inner.current_cache_size()
    }

    pub fn file_count(&self) -> StorageResult<usize> {
        self.inner.file_count()
    }

    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    pub fn config(&self) -> DiskConfig {
        read(&self.inner.config).clone()
    }

    /// Replace the clean interval and default expiration.
    ///
    /// The directory is fixed for the life of the store; the one in
    /// `config` is ignored.
    pub fn set_config(&self, mut config: DiskConfig) {
        if config.directory != self.inner.directory {
            tracing::warn!(
                requested = %config.directory.display(),
                directory = %self.inner.directory.display(),
                "Disk cache directory cannot change after creation"
            );
            config.directory = self.inner.directory.clone();
        }

        let interval_changed = {
            let mut current = write(&self.inner.config);
            let changed = current.clean_interval != config.clean_interval;
            *current = config.clone();
            changed
        };

        if interval_changed {
            *lock(&self.sweeper) = start_sweeper(&self.inner, &config);
        }
    }

    #[cfg(test)]
    fn sweeper_running(&self) -> bool {
        lock(&self.sweeper).as_ref().is_some_and(Sweeper::is_running)
    }
}

fn start_sweeper<K: CacheKey, V: Cacheable>(
    inner: &Arc<DiskInner<K, V>>,
    config: &DiskConfig,
) -> Option<Sweeper> {
    let weak: Weak<DiskInner<K, V>> = Arc::downgrade(inner);
    Sweeper::spawn("disk", config.clean_interval, move || {
        let weak = weak.clone();
        async move {
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            match tokio::task::spawn_blocking(move || inner.remove_expired()).await {
                Ok(Ok(removed)) if removed > 0 => {
                    tracing::info!(removed, "Disk sweep removed expired files");
                }
                Ok(Ok(_)) => tracing::trace!("Disk sweep found no expired files"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Disk sweep failed"),
                Err(e) => tracing::warn!(error = %e, "Disk sweep task failed"),
            }
            true
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================
