//! Bounded in-memory store.
//!
//! Entries live in a [`moka::sync::Cache`], which enforces the cost and
//! count limits and evicts on its own. The store additionally keeps a set
//! of the keys it has saved so the sweep can find expired entries. That set
//! is advisory: keys evicted by the table are reconciled lazily, using the
//! table's eviction listener.
//!
//! # Locking
//!
//! Reads go straight to the table and never wait on the key set. Mutations
//! take the key set's write lock, so saves, removals and sweeps are
//! serialized with each other. Locks are always taken in the order
//! key set, table, config.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::Utc;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use stash_core::{CacheEntry, CacheKey, Cacheable, ExpirationPolicy, MemoryConfig};

use crate::sweep::Sweeper;
use crate::sync::{lock, read, write};

type Table<K, V> = Cache<K, Arc<CacheEntry<V>>>;

/// Cost and count limits mapped onto the table's single weighted capacity.
#[derive(Debug, Clone, Copy)]
struct Limits {
    cost: u64,
    count: Option<u64>,
}

impl Limits {
    fn from_config(config: &MemoryConfig) -> Self {
        Self {
            cost: config.total_cost_limit,
            count: config.count_limit,
        }
    }

    /// Table capacity, `None` when unbounded.
    fn capacity(&self) -> Option<u64> {
        match (self.cost, self.count) {
            (0, None) => None,
            (0, Some(count)) => Some(count),
            (cost, None) => Some(cost),
            (cost, Some(count)) => Some(cost.saturating_mul(count)),
        }
    }

    /// Weight of one entry.
    ///
    /// With both limits the capacity is `cost * count` and every weight is
    /// at least `cost_limit` and at least `value_cost * count`, so staying
    /// under capacity keeps both the entry count and the summed cost within
    /// their limits.
    fn weight(&self, value_cost: u32) -> u32 {
        match (self.cost, self.count) {
            (0, _) => 1,
            (_, None) => value_cost,
            (cost, Some(count)) => {
                let weight = u64::from(value_cost).saturating_mul(count).max(cost);
                u32::try_from(weight).unwrap_or(u32::MAX)
            }
        }
    }
}

fn build_table<K: CacheKey, V: Cacheable>(
    config: &MemoryConfig,
    evicted: &Arc<Mutex<Vec<K>>>,
    evictions: &Arc<AtomicU64>,
) -> Table<K, V> {
    let limits = Limits::from_config(config);
    let evicted = Arc::clone(evicted);
    let evictions = Arc::clone(evictions);

    let mut builder = Cache::builder().eviction_listener(
        move |key: Arc<K>, _entry: Arc<CacheEntry<V>>, cause: RemovalCause| {
            if cause == RemovalCause::Size {
                evictions.fetch_add(1, Ordering::Relaxed);
                lock(&evicted).push(K::clone(&key));
            }
        },
    );

    if let Some(capacity) = limits.capacity() {
        builder = builder
            .max_capacity(capacity)
            .weigher(move |_key: &K, entry: &Arc<CacheEntry<V>>| limits.weight(entry.value().cost()));
    }

    builder.build()
}

struct MemoryInner<K, V> {
    table: RwLock<Table<K, V>>,
    tracked: RwLock<HashSet<K>>,
    /// Keys evicted for capacity and not yet dropped from `tracked`.
    evicted: Arc<Mutex<Vec<K>>>,
    evictions: Arc<AtomicU64>,
    config: RwLock<MemoryConfig>,
}

impl<K: CacheKey, V: Cacheable> MemoryInner<K, V> {
    fn table(&self) -> Table<K, V> {
        read(&self.table).clone()
    }

    /// Drop keys the table has evicted from the tracked set.
    fn reconcile_evicted(&self, table: &Table<K, V>, tracked: &mut HashSet<K>) {
        let evicted = std::mem::take(&mut *lock(&self.evicted));
        for key in evicted {
            if !table.contains_key(&key) {
                tracked.remove(&key);
            }
        }
    }

    fn insert(&self, key: K, entry: Arc<CacheEntry<V>>) {
        let mut tracked = write(&self.tracked);
        let table = self.table();
        table.insert(key.clone(), entry);
        tracked.insert(key);
        self.reconcile_evicted(&table, &mut tracked);
    }

    /// Remove `key` if it is still stale once the write lock is held.
    fn remove_if_stale(&self, key: &K) {
        let mut tracked = write(&self.tracked);
        let table = self.table();
        if let Some(entry) = table.get(key) {
            if entry.is_stale() {
                table.invalidate(key);
                tracked.remove(key);
                tracing::debug!(key = ?key, "Lazily removed expired memory entry");
            }
        }
    }

    fn remove_expired(&self) -> usize {
        let mut tracked = write(&self.tracked);
        let table = self.table();
        self.reconcile_evicted(&table, &mut tracked);

        let now = Utc::now();
        let mut expired = Vec::new();
        tracked.retain(|key| match table.get(key) {
            Some(entry) if entry.is_stale_at(now) => {
                expired.push(key.clone());
                false
            }
            Some(_) => true,
            None => false,
        });

        for key in &expired {
            table.invalidate(key);
        }
        expired.len()
    }
}

/// Thread-safe, bounded, in-process key/entry table.
///
/// The memory store never reports errors: a miss, an expired entry and an
/// entry rejected by the size policy all look like an absent key.
pub struct MemoryStorage<K, V> {
    inner: Arc<MemoryInner<K, V>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<K: CacheKey, V: Cacheable> MemoryStorage<K, V> {
    /// Create a store and start its background sweep.
    ///
    /// The sweep only runs when called inside a tokio runtime and the
    /// config's clean interval is non-zero.
    pub fn new(config: MemoryConfig) -> Self {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let evictions = Arc::new(AtomicU64::new(0));
        let inner = Arc::new(MemoryInner {
            table: RwLock::new(build_table(&config, &evicted, &evictions)),
            tracked: RwLock::new(HashSet::new()),
            evicted,
            evictions,
            config: RwLock::new(config.clone()),
        });

        let sweeper = start_sweeper(&inner, &config);
        tracing::debug!(
            total_cost_limit = config.total_cost_limit,
            count_limit = ?config.count_limit,
            "Memory store created"
        );

        Self {
            inner,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Save a value under the store's default expiration or the given one.
    ///
    /// A policy that is already expired makes this a no-op.
    pub fn save(&self, key: K, value: V, expiration: Option<ExpirationPolicy>) {
        let expiration = expiration.unwrap_or_else(|| read(&self.inner.config).expiration.clone());
        self.save_entry(key, CacheEntry::new(value, expiration));
    }

    /// Save a prebuilt entry, keeping its policy and creation time.
    ///
    /// An entry whose policy is already expired is dropped.
    pub fn save_entry(&self, key: K, entry: CacheEntry<V>) {
        if entry.expiration().is_already_expired(Utc::now()) {
            tracing::debug!(key = ?key, expiration = ?entry.expiration(), "Skipped memory save with expired policy");
            return;
        }

        self.inner.insert(key, Arc::new(entry));
    }

    /// Insert an entry read from another store, keeping its policy and
    /// creation time. Stale entries are ignored.
    pub fn promote(&self, key: K, entry: CacheEntry<V>) {
        if entry.is_stale() {
            return;
        }
        self.inner.insert(key, Arc::new(entry));
    }

    pub fn retrieve(&self, key: &K) -> Option<V> {
        let entry = self.inner.table().get(key)?;
        if !entry.is_stale() {
            return Some(entry.value().clone());
        }

        self.inner.remove_if_stale(key);
        None
    }

    /// The whole entry for `key`, if present and fresh.
    pub fn retrieve_entry(&self, key: &K) -> Option<CacheEntry<V>> {
        let entry = self.inner.table().get(key)?;
        if !entry.is_stale() {
            return Some(CacheEntry::clone(&entry));
        }

        self.inner.remove_if_stale(key);
        None
    }

    pub fn is_cached(&self, key: &K) -> bool {
        match self.inner.table().get(key) {
            Some(entry) if !entry.is_stale() => true,
            Some(_) => {
                self.inner.remove_if_stale(key);
                false
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &K) {
        let mut tracked = write(&self.inner.tracked);
        self.inner.table().invalidate(key);
        tracked.remove(key);
    }

    pub fn remove_all(&self) {
        let mut tracked = write(&self.inner.tracked);
        self.inner.table().invalidate_all();
        tracked.clear();
        lock(&self.inner.evicted).clear();
    }

    /// Remove every expired entry, returning how many were removed.
    pub fn remove_expired(&self) -> usize {
        self.inner.remove_expired()
    }

    pub fn config(&self) -> MemoryConfig {
        read(&self.inner.config).clone()
    }

    /// Replace the configuration.
    ///
    /// New limits apply immediately: the table is rebuilt with them and the
    /// live entries are carried over, evicting any that no longer fit. The
    /// sweep restarts when the clean interval changed.
    pub fn set_config(&self, config: MemoryConfig) {
        let interval_changed = {
            let mut tracked = write(&self.inner.tracked);
            let mut table = write(&self.inner.table);

            let rebuilt = build_table(&config, &self.inner.evicted, &self.inner.evictions);
            let now = Utc::now();
            for (key, entry) in table.iter() {
                if !entry.is_stale_at(now) {
                    rebuilt.insert(K::clone(&key), entry);
                }
            }
            rebuilt.run_pending_tasks();
            *table = rebuilt;

            tracked.retain(|key| table.contains_key(key));
            lock(&self.inner.evicted).clear();

            let mut current = write(&self.inner.config);
            let changed = current.clean_interval != config.clean_interval;
            *current = config.clone();
            changed
        };

        if interval_changed {
            *lock(&self.sweeper) = start_sweeper(&self.inner, &config);
        }
        tracing::debug!(
            total_cost_limit = config.total_cost_limit,
            count_limit = ?config.count_limit,
            "Memory store reconfigured"
        );
    }

    /// Number of keys in the tracked set.
    ///
    /// May briefly include keys the table has already evicted.
    pub fn tracked_key_count(&self) -> usize {
        read(&self.inner.tracked).len()
    }

    /// Number of entries held by the table, after pending evictions run.
    pub fn entry_count(&self) -> u64 {
        let table = self.inner.table();
        table.run_pending_tasks();
        table.entry_count()
    }

    /// Total entries evicted to respect the size limits.
    pub fn evictions(&self) -> u64 {
        self.inner.evictions.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn sweeper_running(&self) -> bool {
        lock(&self.sweeper).as_ref().is_some_and(Sweeper::is_running)
    }
}

fn start_sweeper<K: CacheKey, V: Cacheable>(
    inner: &Arc<MemoryInner<K, V>>,
    config: &MemoryConfig,
) -> Option<Sweeper> {
    let weak: Weak<MemoryInner<K, V>> = Arc::downgrade(inner);
    Sweeper::spawn("memory", config.clean_interval, move || {
        let weak = weak.clone();
        async move {
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            let removed = inner.remove_expired();
            if removed > 0 {
                tracing::info!(removed, "Memory sweep removed expired entries");
            } else {
                tracing::trace!("Memory sweep found no expired entries");
            }
            true
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================
