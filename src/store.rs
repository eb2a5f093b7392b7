//! Namespaced in-memory cache store.
//!
//! Entries live in per-namespace DashMap tables. The namespace directory sits
//! behind an `RwLock` so a flush swaps whole tables out in one step: a reader
//! sees either the complete pre-flush table or an empty one, never a partial
//! flush.
//!
//! Every table carries an epoch, and `flush_all` bumps a store-wide epoch.
//! A fetch remembers the [`Generation`] it started under and its write-back
//! goes through [`CacheStore::put_if_current`], which drops the value if a
//! flush happened in between.

use crate::key::CacheKey;
use crate::value::StoredValue;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

/// An immutable cached value with the instant it was fetched.
///
/// Entries are replaced wholesale, never mutated in place. An entry written
/// back by a fetch remembers the TTL it was resolved with, which the sweeper
/// honours.
#[derive(Debug)]
pub struct CacheEntry {
    value: StoredValue,
    fetched_at: Instant,
    ttl: Option<Duration>,
}

impl CacheEntry {
    pub fn new(value: StoredValue, fetched_at: Instant, ttl: Option<Duration>) -> Self {
        CacheEntry {
            value,
            fetched_at,
            ttl,
        }
    }

    pub fn value(&self) -> &StoredValue {
        &self.value
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// TTL the value was resolved with, if it came from a fetch.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.fetched_at)
    }

    /// `now - fetched_at < ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

struct Slot {
    entry: Arc<CacheEntry>,
    // millis since the store origin, for LRU bounding
    touched: AtomicU64,
}

struct NamespaceTable {
    epoch: u64,
    entries: DashMap<String, Slot>,
}

/// Snapshot of the store state a fetch started under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Generation {
    store: u64,
    namespace: u64,
}

/// Store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub namespaces: usize,
    pub total_entries: usize,
}

/// Thread-safe namespaced cache table.
///
/// # Example
///
/// ```
/// use flight_cache::store::CacheStore;
/// use flight_cache::key::CacheKey;
/// use flight_cache::CacheValue;
///
/// let store = CacheStore::new(None);
/// let key = CacheKey::from_raw("2026|10");
/// store.put("calendar", &key, vec![1u8, 2, 3].into_stored());
/// assert!(store.get("calendar", &key).is_some());
///
/// store.flush("calendar");
/// assert!(store.get("calendar", &key).is_none());
/// ```
pub struct CacheStore {
    namespaces: RwLock<HashMap<String, Arc<NamespaceTable>>>,
    store_epoch: AtomicU64,
    next_table_epoch: AtomicU64,
    max_entries: Option<usize>,
    origin: Instant,
}

impl CacheStore {
    /// Create a store. `max_entries` bounds each namespace; the least recently
    /// accessed entries are evicted past it.
    pub fn new(max_entries: Option<usize>) -> Self {
        CacheStore {
            namespaces: RwLock::new(HashMap::new()),
            store_epoch: AtomicU64::new(0),
            next_table_epoch: AtomicU64::new(0),
            max_entries,
            origin: Instant::now(),
        }
    }

    /// Look up an entry. Freshness is the caller's concern.
    pub fn get(&self, namespace: &str, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let dir = self.read_dir();
        let table = dir.get(namespace)?;
        let slot = table.entries.get(key.as_str())?;
        slot.touched.store(self.tick(), Ordering::Relaxed);
        Some(Arc::clone(&slot.entry))
    }

    /// Store a value stamped with the current instant, replacing any entry.
    ///
    /// The entry carries no TTL of its own; the sweeper applies the TTL it
    /// is given for the namespace.
    pub fn put(&self, namespace: &str, key: &CacheKey, value: StoredValue) {
        let table = self.table(namespace);
        self.insert(namespace, &table, key, CacheEntry::new(value, Instant::now(), None));
    }

    /// Write back a fetch result if no flush happened since `generation` was
    /// taken and no more recently stamped entry exists.
    ///
    /// Returns whether the value was stored.
    pub fn put_if_current(
        &self,
        namespace: &str,
        key: &CacheKey,
        value: StoredValue,
        fetched_at: Instant,
        ttl: Duration,
        generation: Generation,
    ) -> bool {
        // Hold the directory read lock so a flush cannot interleave.
        let dir = self.read_dir();

        if self.store_epoch.load(Ordering::Acquire) != generation.store {
            debug!("Discarding write for {}/{}: cache flushed", namespace, key);
            return false;
        }

        let Some(table) = dir.get(namespace) else {
            debug!("Discarding write for {}/{}: namespace flushed", namespace, key);
            return false;
        };
        if table.epoch != generation.namespace {
            debug!("Discarding write for {}/{}: namespace flushed", namespace, key);
            return false;
        }

        if let Some(existing) = table.entries.get(key.as_str()) {
            if existing.entry.fetched_at > fetched_at {
                debug!("Discarding write for {}/{}: newer entry present", namespace, key);
                return false;
            }
        }

        self.insert(namespace, table, key, CacheEntry::new(value, fetched_at, Some(ttl)));
        true
    }

    /// Remove one entry. Returns whether it existed.
    pub fn evict(&self, namespace: &str, key: &CacheKey) -> bool {
        let dir = self.read_dir();
        let removed = dir
            .get(namespace)
            .and_then(|table| table.entries.remove(key.as_str()))
            .is_some();
        debug!("Store EVICT {}/{} (existed: {})", namespace, key, removed);
        removed
    }

    /// Drop a whole namespace. Returns the number of entries removed.
    pub fn flush(&self, namespace: &str) -> usize {
        let removed = self
            .write_dir()
            .remove(namespace)
            .map(|table| table.entries.len())
            .unwrap_or(0);
        debug!("Store FLUSH {} ({} entries)", namespace, removed);
        removed
    }

    /// Drop every namespace. Returns the number of entries removed.
    pub fn flush_all(&self) -> usize {
        let mut dir = self.write_dir();
        self.store_epoch.fetch_add(1, Ordering::AcqRel);
        let removed = dir.values().map(|table| table.entries.len()).sum();
        dir.clear();
        warn!("Store FLUSH_ALL executed - {} entries cleared", removed);
        removed
    }

    /// Remove entries of `namespace` past their own TTL, or past
    /// `default_ttl` for entries stored without one.
    pub fn purge_expired(&self, namespace: &str, default_ttl: Duration) -> usize {
        let dir = self.read_dir();
        let Some(table) = dir.get(namespace) else {
            return 0;
        };
        let before = table.entries.len();
        table.entries.retain(|_, slot| {
            let ttl = slot.entry.ttl().unwrap_or(default_ttl);
            slot.entry.is_fresh(ttl)
        });
        let purged = before.saturating_sub(table.entries.len());
        if purged > 0 {
            debug!("Store PURGE {} ({} expired entries)", namespace, purged);
        }
        purged
    }

    /// Capture the generation a fetch for `namespace` starts under.
    ///
    /// Creates the namespace table if it does not exist yet.
    pub fn generation(&self, namespace: &str) -> Generation {
        let store = self.store_epoch.load(Ordering::Acquire);
        let table = self.table(namespace);
        Generation {
            store,
            namespace: table.epoch,
        }
    }

    /// Names of the namespaces currently present.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_dir().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of entries in one namespace.
    pub fn len(&self, namespace: &str) -> usize {
        self.read_dir()
            .get(namespace)
            .map(|table| table.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.read_dir()
            .values()
            .all(|table| table.entries.is_empty())
    }

    pub fn stats(&self) -> StoreStats {
        let dir = self.read_dir();
        let mut stats = StoreStats {
            namespaces: dir.len(),
            ..StoreStats::default()
        };
        for table in dir.values() {
            stats.total_entries += table.entries.len();
        }
        stats
    }

    fn insert(&self, namespace: &str, table: &NamespaceTable, key: &CacheKey, entry: CacheEntry) {
        let slot = Slot {
            entry: Arc::new(entry),
            touched: AtomicU64::new(self.tick()),
        };
        table.entries.insert(key.as_str().to_string(), slot);
        debug!("Store PUT {}/{}", namespace, key);

        if let Some(max) = self.max_entries {
            Self::enforce_bound(namespace, table, max);
        }
    }

    fn enforce_bound(namespace: &str, table: &NamespaceTable, max: usize) {
        while table.entries.len() > max {
            let oldest = table
                .entries
                .iter()
                .min_by_key(|slot| slot.touched.load(Ordering::Relaxed))
                .map(|slot| slot.key().clone());

            match oldest {
                Some(key) => {
                    table.entries.remove(&key);
                    debug!("Store LRU EVICT {}/{}", namespace, key);
                }
                None => break,
            }
        }
    }

    fn table(&self, namespace: &str) -> Arc<NamespaceTable> {
        if let Some(table) = self.read_dir().get(namespace) {
            return Arc::clone(table);
        }

        let mut dir = self.write_dir();
        let table = dir.entry(namespace.to_string()).or_insert_with(|| {
            Arc::new(NamespaceTable {
                epoch: self.next_table_epoch.fetch_add(1, Ordering::Relaxed),
                entries: DashMap::new(),
            })
        });
        Arc::clone(table)
    }

    fn tick(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn read_dir(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<NamespaceTable>>> {
        self.namespaces.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_dir(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<NamespaceTable>>> {
        self.namespaces.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(None)
    }
}
