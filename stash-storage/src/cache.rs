//! Two-tier cache façade.
//!
//! [`CacheStorage`] puts a [`MemoryStorage`] in front of a [`DiskStorage`]:
//!
//! - Reads check memory first, fall back to disk, and promote disk hits
//!   into memory.
//! - Writes land in memory before `save` returns and reach disk on the
//!   blocking pool afterwards. Disk mutations run one at a time in call
//!   order, so a pending save never lands after a later remove or clear.
//! - Completed disk operations are published as [`ChangeEvent`]s to every
//!   subscriber, in completion order.
//!
//! A failed disk write leaves the two stores disagreeing until the entry is
//! saved again or expires; nothing is retried automatically.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use stash_core::{
    CacheEntry, CacheKey, CacheStorageConfig, Cacheable, ChangeEvent, ChangeSet, DiskConfig,
    ExpirationPolicy, MemoryConfig, StashResult, StorageChange, StorageError, StorageResult,
};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::disk::DiskStorage;
use crate::memory::MemoryStorage;
use crate::notify::Notifier;
use crate::stats::{CacheStats, StatsRecorder};
use crate::writer::{completion, DiskWriter};

/// Entries removed by one [`CacheStorage::remove_expired`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub memory_removed: usize,
    pub disk_removed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.memory_removed + self.disk_removed
    }
}

/// Run blocking disk reads on the runtime's blocking pool.
async fn run_blocking<T, F>(work: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(StorageError::Deallocated),
        Err(e) => Err(StorageError::Unknown {
            reason: e.to_string(),
        }),
    }
}

/// Memory-over-disk cache with change notifications.
///
/// # Example
///
/// ```ignore
/// let cache: CacheStorage<String, String> =
///     CacheStorage::new(MemoryConfig::default(), DiskConfig::new("/var/cache/app"))?;
///
/// cache.save("greeting".into(), "hello".into(), Some(ExpirationPolicy::Seconds(60.0)));
/// assert_eq!(cache.retrieve(&"greeting".into()).await?, Some("hello".into()));
/// ```
pub struct CacheStorage<K, V> {
    memory: Arc<MemoryStorage<K, V>>,
    disk: Arc<DiskStorage<K, V>>,
    notifier: Notifier<K, V>,
    writer: DiskWriter,
    stats: Arc<StatsRecorder>,
    runtime: Handle,
}

impl<K, V> std::fmt::Debug for CacheStorage<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage").finish_non_exhaustive()
    }
}

impl<K: CacheKey, V: Cacheable> CacheStorage<K, V> {
    /// Create a cache with the default notification capacity.
    ///
    /// Must be called from within a tokio runtime, which then runs the
    /// background disk work, the sweeps and the notification dispatcher.
    pub fn new(memory_config: MemoryConfig, disk_config: DiskConfig) -> StorageResult<Self> {
        let capacity = CacheStorageConfig::default().notification_capacity;
        Self::build(memory_config, disk_config, capacity)
    }

    /// Validate `config` and create a cache from it.
    pub fn from_config(config: CacheStorageConfig) -> StashResult<Self> {
        config.validate()?;
        Ok(Self::build(config.memory, config.disk, config.notification_capacity)?)
    }

    fn build(memory_config: MemoryConfig, disk_config: DiskConfig, capacity: usize) -> StorageResult<Self> {
        let runtime = Handle::try_current().map_err(|e| StorageError::Unknown {
            reason: e.to_string(),
        })?;

        let disk = Arc::new(DiskStorage::new(disk_config)?);
        let memory = Arc::new(MemoryStorage::new(memory_config));
        let notifier = Notifier::new(capacity.max(1), &runtime);
        let writer = DiskWriter::new(&runtime);

        tracing::info!(
            directory = %disk.directory().display(),
            notification_capacity = capacity,
            "Cache storage started"
        );

        Ok(Self {
            memory,
            disk,
            notifier,
            writer,
            stats: Arc::new(StatsRecorder::default()),
            runtime,
        })
    }

    /// Save a value to both stores.
    ///
    /// The memory store is updated before this returns, so an immediate
    /// [`retrieve`](Self::retrieve) sees the value. The disk write runs in
    /// the background; when it finishes a `Save` change (or the error) is
    /// published. The returned handle resolves to the disk result and may
    /// be dropped.
    ///
    /// Both stores receive the same creation time. Without an explicit
    /// policy each store applies its own default.
    pub fn save(&self, key: K, value: V, expiration: Option<ExpirationPolicy>) -> JoinHandle<StorageResult<()>> {
        // Microseconds, matching the on-disk timestamp format.
        let created_at = Utc::now().trunc_subsecs(6);
        let memory_policy = expiration.clone().unwrap_or_else(|| self.memory.config().expiration);
        let disk_policy = expiration.unwrap_or_else(|| self.disk.config().expiration);

        self.memory.save_entry(
            key.clone(),
            CacheEntry::with_created_at(value.clone(), memory_policy, created_at),
        );
        let entry = CacheEntry::with_created_at(value, disk_policy, created_at);

        let disk = Arc::clone(&self.disk);
        let notifier = self.notifier.clone();
        let done = self.writer.submit(move || match disk.save_entry(&key, &entry) {
            Ok(()) => {
                let change = StorageChange::Save { key };
                notifier.notify(Ok(ChangeSet::new(change, Some(entry.into_value()))));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(key = ?key, error = %e, "Disk save failed");
                notifier.notify(Err(e.clone()));
                Err(e)
            }
        });
        self.runtime.spawn(completion(done))
    }

    /// Look a key up in memory, then on disk.
    ///
    /// A disk hit is copied into memory with the disk entry's own policy
    /// and creation time. Disk errors are returned; a memory hit never
    /// touches disk.
    pub async fn retrieve(&self, key: &K) -> StorageResult<Option<V>> {
        if let Some(value) = self.memory.retrieve(key) {
            self.stats.record_memory_hit();
            return Ok(Some(value));
        }

        let disk = Arc::clone(&self.disk);
        let lookup = key.clone();
        match run_blocking(move || disk.retrieve_entry(&lookup)).await? {
            Some(entry) => {
                self.stats.record_disk_hit();
                let value = entry.value().clone();
                self.memory.promote(key.clone(), entry);
                self.stats.record_promotion();
                tracing::debug!(key = ?key, "Promoted disk entry into memory");
                Ok(Some(value))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// Current value without promotion or statistics.
    async fn current_value(&self, key: &K) -> Option<V> {
        if let Some(value) = self.memory.retrieve(key) {
            return Some(value);
        }
        let disk = Arc::clone(&self.disk);
        let lookup = key.clone();
        run_blocking(move || disk.retrieve(&lookup)).await.ok().flatten()
    }

    /// Remove a key from both stores.
    ///
    /// The published `Remove` change carries the value held before removal.
    pub async fn remove(&self, key: &K) -> StorageResult<()> {
        let previous = self.current_value(key).await;
        self.memory.remove(key);

        let disk = Arc::clone(&self.disk);
        let notifier = self.notifier.clone();
        let target = key.clone();
        self.writer
            .run(move || {
                let result = disk.remove(&target);
                match &result {
                    Ok(()) => notifier.notify(Ok(ChangeSet::new(
                        StorageChange::Remove { key: target },
                        previous,
                    ))),
                    Err(e) => {
                        tracing::warn!(key = ?target, error = %e, "Disk remove failed");
                        notifier.notify(Err(e.clone()));
                    }
                }
                result
            })
            .await
    }

    /// Clear both stores.
    pub async fn remove_all(&self) -> StorageResult<()> {
        self.memory.remove_all();

        let disk = Arc::clone(&self.disk);
        let notifier = self.notifier.clone();
        self.writer
            .run(move || {
                let result = disk.remove_all();
                match &result {
                    Ok(()) => notifier.notify(Ok(ChangeSet::new(StorageChange::RemoveAll, None))),
                    Err(e) => {
                        tracing::warn!(error = %e, "Disk clear failed");
                        notifier.notify(Err(e.clone()));
                    }
                }
                result
            })
            .await
    }

    /// Whether either store holds a fresh entry for `key`.
    pub async fn is_cached(&self, key: &K) -> bool {
        if self.memory.is_cached(key) {
            return true;
        }
        let disk = Arc::clone(&self.disk);
        let lookup = key.clone();
        run_blocking(move || Ok(disk.is_cached(&lookup)))
            .await
            .unwrap_or(false)
    }

    /// Retrieve each key in turn. Keys whose lookup fails map to `None`.
    pub async fn retrieve_batch(&self, keys: &[K]) -> HashMap<K, Option<V>> {
        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = match self.retrieve(key).await {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!(key = ?key, error = %e, "Batch retrieve failed for key");
                    None
                }
            };
            values.insert(key.clone(), value);
        }
        values
    }

    /// Save each pair in turn, returning one disk handle per pair.
    pub fn save_batch<I>(&self, entries: I, expiration: Option<ExpirationPolicy>) -> Vec<JoinHandle<StorageResult<()>>>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        entries
            .into_iter()
            .map(|(key, value)| self.save(key, value, expiration.clone()))
            .collect()
    }

    /// Remove each key in turn.
    pub async fn remove_batch(&self, keys: &[K]) -> HashMap<K, StorageResult<()>> {
        let mut results = HashMap::with_capacity(keys.len());
        for key in keys {
            let result = self.remove(key).await;
            results.insert(key.clone(), result);
        }
        results
    }

    /// Sweep both stores now.
    pub async fn remove_expired(&self) -> StorageResult<SweepReport> {
        let memory_removed = self.memory.remove_expired();
        let disk = Arc::clone(&self.disk);
        let disk_removed = self.writer.run(move || disk.remove_expired()).await?;

        let report = SweepReport {
            memory_removed,
            disk_removed,
        };
        if report.total() > 0 {
            tracing::info!(memory_removed, disk_removed, "Cache sweep removed expired entries");
        }
        Ok(report)
    }

    /// Subscribe to future change events.
    ///
    /// A subscriber that falls more than the notification capacity behind
    /// receives [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent<K, V>> {
        self.notifier.subscribe()
    }

    /// Future change events as a stream. Lagged events are skipped.
    pub fn changes(&self) -> impl Stream<Item = ChangeEvent<K, V>> + Send + 'static {
        BroadcastStream::new(self.notifier.subscribe()).filter_map(|item| item.ok())
    }

    /// Total bytes used by the disk store.
    pub async fn disk_size(&self) -> StorageResult<u64> {
        let disk = Arc::clone(&self.disk);
        run_blocking(move || disk.current_cache_size()).await
    }

    pub fn memory(&self) -> &MemoryStorage<K, V> {
        &self.memory
    }

    pub fn disk(&self) -> &DiskStorage<K, V> {
        &self.disk
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
            .snapshot(self.memory.evictions(), self.memory.entry_count())
    }
}

// ============================================================================
// TESTS
// ============================================================================
