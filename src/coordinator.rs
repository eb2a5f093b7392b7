//! Request coordinator - TTL check, single-flight join, fetch, write-back.
//!
//! A request for `(namespace, args)` goes through these steps:
//!
//! 1. Derive the key from `args` ([`KeyCodec`]).
//! 2. A fresh entry (`now - fetched_at < ttl`) is returned without suspending.
//!    With `stale_after` configured, an entry older than that is still
//!    returned but also refreshed in the background.
//! 3. If a fetch for the key is in flight, the caller joins it and receives
//!    the same outcome as every other joiner.
//! 4. Otherwise the caller starts the fetch. It runs on its own task under the
//!    [`SafetyWatchdog`]; on success the value is written back, on failure
//!    nothing is cached and the error goes to every joiner.
//!
//! At most one fetch is registered per key at any time. Registration happens
//! under the in-flight table's entry lock, which also re-checks the store so
//! a caller racing a just-settled fetch reads its value instead of starting
//! another one. Registration and flushes are serialized by a gate, so no
//! caller can join a fetch a concurrent flush is about to detach.

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::key::{CacheKey, KeyCodec};
use crate::observability::{CacheMetrics, NoOpMetrics, TtlPolicy};
use crate::source::DataSource;
use crate::store::{CacheEntry, CacheStore, Generation};
use crate::value::{CacheValue, StoredValue};
use crate::watchdog::{SafetyWatchdog, Verdict};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;

type SharedOutcome = Shared<BoxFuture<'static, Result<StoredValue>>>;

type FlightKey = (String, String);

struct InFlight {
    id: u64,
    outcome: SharedOutcome,
}

/// In-flight requests and per-namespace loading counters.
#[derive(Default)]
struct FlightTable {
    entries: DashMap<FlightKey, InFlight>,
    loading: DashMap<String, usize>,
    next_id: AtomicU64,
    // read: registering a flight; write: flushing
    gate: RwLock<()>,
}

impl FlightTable {
    fn finish(&self, namespace: &str, key: &str, id: u64) {
        let flight_key = (namespace.to_string(), key.to_string());
        self.entries.remove_if(&flight_key, |_, flight| flight.id == id);

        if let Entry::Occupied(mut count) = self.loading.entry(namespace.to_string()) {
            if *count.get() <= 1 {
                count.remove();
            } else {
                *count.get_mut() -= 1;
            }
        }
    }

    fn contains(&self, namespace: &str, key: &str) -> bool {
        self.entries
            .contains_key(&(namespace.to_string(), key.to_string()))
    }

    fn is_loading(&self, namespace: &str) -> bool {
        self.loading.get(namespace).is_some_and(|count| *count > 0)
    }

    fn detach_namespace(&self, namespace: &str) {
        self.entries.retain(|(ns, _), _| ns != namespace);
    }

    fn detach_all(&self) {
        self.entries.clear();
    }
}

/// Deregisters a fetch and clears its loading mark exactly once, either when
/// the fetch settles, when the watchdog fires, or when the driver task dies.
struct FlightGuard {
    flights: Arc<FlightTable>,
    namespace: String,
    key: String,
    id: u64,
    released: bool,
}

impl FlightGuard {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.flights.finish(&self.namespace, &self.key, self.id);
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.release();
    }
}

enum Attempt {
    /// An entry recent enough appeared while registering.
    Cached(Arc<CacheEntry>),
    /// Joined a fetch someone else started.
    Joined(SharedOutcome),
    /// Started a new fetch.
    Started(SharedOutcome),
}

/// What a fetch is for: the TTL its value is written with, and how recent an
/// existing entry must be to make the fetch unnecessary.
#[derive(Clone, Copy)]
struct FetchPlan {
    ttl: Duration,
    reuse_within: Duration,
}

impl FetchPlan {
    fn fill(ttl: Duration) -> Self {
        FetchPlan {
            ttl,
            reuse_within: ttl,
        }
    }
}

/// Core request coordinator.
///
/// # Example
///
/// ```ignore
/// use flight_cache::{CacheConfig, RequestCoordinator};
/// use std::time::Duration;
///
/// let coordinator = RequestCoordinator::new(&CacheConfig::default());
/// let fetch = |(year, month): (i32, u32)| async move { load_calendar(year, month).await };
///
/// let calendar = coordinator
///     .resolve("calendar", &fetch, (2026, 10), Duration::from_secs(300))
///     .await?;
/// ```
pub struct RequestCoordinator {
    store: Arc<CacheStore>,
    flights: Arc<FlightTable>,
    watchdog: Arc<SafetyWatchdog>,
    metrics: Arc<dyn CacheMetrics>,
    ttl_policy: TtlPolicy,
    default_ttl: Duration,
    stale_after: Option<Duration>,
}

impl RequestCoordinator {
    /// Create a coordinator from `config`. The config is not validated here.
    pub fn new(config: &CacheConfig) -> Self {
        RequestCoordinator {
            store: Arc::new(CacheStore::new(config.max_entries_per_namespace)),
            flights: Arc::new(FlightTable::default()),
            watchdog: Arc::new(SafetyWatchdog::new(config.watchdog_timeout())),
            metrics: Arc::new(NoOpMetrics),
            ttl_policy: TtlPolicy::default(),
            default_ttl: config.default_ttl(),
            stale_after: config.stale_after(),
        }
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set custom TTL policy.
    pub fn with_ttl_policy(mut self, policy: TtlPolicy) -> Self {
        self.ttl_policy = policy;
        self
    }

    /// TTL applied to `namespace` when the caller gives none.
    pub fn ttl_for(&self, namespace: &str) -> Duration {
        self.ttl_policy.ttl_for(namespace, self.default_ttl)
    }

    /// Age past which a still-fresh entry is refreshed in the background.
    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after
    }

    /// Return the value for `args`, from memory if fresh, otherwise from the
    /// in-flight or a new fetch.
    ///
    /// A cache hit completes without suspending. A hit older than
    /// `stale_after` also starts one background refresh; if that refresh
    /// fails the entry is kept until its TTL runs out.
    ///
    /// # Errors
    ///
    /// - `Error::SerializationError`: `args` cannot be turned into a key
    /// - `Error::FetchError` (or whatever the source returned): the fetch
    ///   failed; nothing was cached
    /// - `Error::Timeout`: the watchdog stopped waiting on the fetch
    /// - `Error::InvalidCacheEntry`: the key holds a value of another type
    /// - `Error::Other`: called outside a Tokio runtime
    pub async fn resolve<A, T, S>(
        &self,
        namespace: &str,
        source: &S,
        args: A,
        ttl: Duration,
    ) -> Result<T>
    where
        A: Serialize,
        T: CacheValue,
        S: DataSource<A, T> + ?Sized,
    {
        let timer = Instant::now();
        let key = KeyCodec::encode(&args)?;
        let label = KeyCodec::label(namespace, &key);

        if let Some(entry) = self.store.get(namespace, &key) {
            if entry.is_fresh(ttl) {
                let value = T::from_stored(entry.value())?;
                self.metrics.record_hit(&label, timer.elapsed());
                if let Some(stale_after) = self.stale_after.filter(|s| entry.age() >= *s) {
                    self.revalidate(namespace, &key, &label, source, args, ttl, stale_after);
                }
                return Ok(value);
            }
            debug!("Expired entry for {} (age {:?})", label, entry.age());
        }

        let plan = FetchPlan::fill(ttl);
        let stored = match self.join_or_start(namespace, &key, &label, source, args, plan)? {
            Attempt::Cached(entry) => {
                self.metrics.record_hit(&label, timer.elapsed());
                Arc::clone(entry.value())
            }
            Attempt::Joined(outcome) => {
                self.metrics.record_join(&label);
                outcome.await?
            }
            Attempt::Started(outcome) => {
                self.metrics.record_miss(&label);
                outcome.await?
            }
        };

        T::from_stored(&stored)
    }

    /// Start fetching `args` in the background unless a fresh entry or an
    /// in-flight request already covers the key.
    ///
    /// Never suspends and never returns the value; fetch failures are only
    /// logged. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::SerializationError` if `args` cannot be turned into a
    /// key, or `Error::Other` outside a Tokio runtime.
    pub fn warm<A, T, S>(&self, namespace: &str, source: &S, args: A, ttl: Duration) -> Result<()>
    where
        A: Serialize,
        T: CacheValue,
        S: DataSource<A, T> + ?Sized,
    {
        let key = KeyCodec::encode(&args)?;
        let label = KeyCodec::label(namespace, &key);

        let fresh = self
            .store
            .get(namespace, &key)
            .is_some_and(|entry| entry.is_fresh(ttl));
        if fresh || self.flights.contains(namespace, key.as_str()) {
            debug!("Skipping warm for {}: already fresh or in flight", label);
            return Ok(());
        }

        let plan = FetchPlan::fill(ttl);
        if let Attempt::Started(_) = self.join_or_start(namespace, &key, &label, source, args, plan)? {
            debug!("» Warming {}", label);
        }
        Ok(())
    }

    /// Evict the entry for `args`. Returns whether one existed.
    ///
    /// A fetch already in flight for the key is left alone and may repopulate
    /// it when it settles.
    pub fn evict<A: Serialize + ?Sized>(&self, namespace: &str, args: &A) -> Result<bool> {
        let key = KeyCodec::encode(args)?;
        Ok(self.store.evict(namespace, &key))
    }

    /// Flush one namespace.
    ///
    /// In-flight fetches of the namespace keep running but are detached: new
    /// callers start fresh fetches, and the detached results are not written.
    pub fn flush(&self, namespace: &str) -> usize {
        let removed = {
            let _gate = self.flights.gate.write().unwrap_or_else(PoisonError::into_inner);
            let removed = self.store.flush(namespace);
            self.flights.detach_namespace(namespace);
            removed
        };
        self.metrics.record_flush(namespace, removed);
        info!("Flushed namespace {} ({} entries)", namespace, removed);
        removed
    }

    /// Flush every namespace, detaching all in-flight fetches.
    pub fn flush_all(&self) -> usize {
        let removed = {
            let _gate = self.flights.gate.write().unwrap_or_else(PoisonError::into_inner);
            let removed = self.store.flush_all();
            self.flights.detach_all();
            removed
        };
        self.metrics.record_flush("*", removed);
        removed
    }

    /// Purge entries past their TTL across all namespaces.
    ///
    /// Entries written back by a fetch expire under the TTL they were
    /// resolved with; entries stored directly fall back to the namespace TTL.
    pub fn purge_expired(&self) -> usize {
        self.store
            .namespaces()
            .iter()
            .map(|namespace| {
                self.store
                    .purge_expired(namespace, self.ttl_for(namespace))
            })
            .sum()
    }

    /// Whether any fetch of `namespace` is still within its watchdog bound.
    pub fn is_loading(&self, namespace: &str) -> bool {
        self.flights.is_loading(namespace)
    }

    /// Whether a joinable fetch exists for `(namespace, key)`.
    pub fn is_in_flight(&self, namespace: &str, key: &CacheKey) -> bool {
        self.flights.contains(namespace, key.as_str())
    }

    /// Number of joinable fetches.
    pub fn in_flight_count(&self) -> usize {
        self.flights.entries.len()
    }

    /// Get store reference (for advanced use).
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn watchdog(&self) -> &SafetyWatchdog {
        &self.watchdog
    }

    /// Refresh a stale entry in the background, at most once per key.
    #[allow(clippy::too_many_arguments)]
    fn revalidate<A, T, S>(
        &self,
        namespace: &str,
        key: &CacheKey,
        label: &str,
        source: &S,
        args: A,
        ttl: Duration,
        stale_after: Duration,
    ) where
        T: CacheValue,
        S: DataSource<A, T> + ?Sized,
    {
        if self.flights.contains(namespace, key.as_str()) {
            return;
        }

        let plan = FetchPlan {
            ttl,
            reuse_within: stale_after.min(ttl),
        };
        match self.join_or_start(namespace, key, label, source, args, plan) {
            Ok(Attempt::Started(_)) => debug!("» Revalidating stale {}", label),
            Ok(_) => {}
            Err(e) => warn!("Could not revalidate {}: {}", label, e),
        }
    }

    fn join_or_start<A, T, S>(
        &self,
        namespace: &str,
        key: &CacheKey,
        label: &str,
        source: &S,
        args: A,
        plan: FetchPlan,
    ) -> Result<Attempt>
    where
        T: CacheValue,
        S: DataSource<A, T> + ?Sized,
    {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Other(format!("fetch for {} needs a Tokio runtime: {}", label, e)))?;

        let (id, tx, outcome, generation) = {
            let _gate = self.flights.gate.read().unwrap_or_else(PoisonError::into_inner);

            let flight_key = (namespace.to_string(), key.as_str().to_string());
            match self.flights.entries.entry(flight_key) {
                Entry::Occupied(flight) => {
                    return Ok(Attempt::Joined(flight.get().outcome.clone()));
                }
                Entry::Vacant(slot) => {
                    if let Some(entry) = self
                        .store
                        .get(namespace, key)
                        .filter(|entry| entry.age() < plan.reuse_within)
                    {
                        return Ok(Attempt::Cached(entry));
                    }

                    // Taken under the gate, before the fetch is issued, so
                    // any later flush invalidates its write-back.
                    let generation = self.store.generation(namespace);

                    let id = self.flights.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = oneshot::channel::<Result<StoredValue>>();
                    let outcome = rx
                        .map(|received| {
                            received.unwrap_or_else(|_| {
                                Err(Error::FetchError(
                                    "fetch task ended without settling".to_string(),
                                ))
                            })
                        })
                        .boxed()
                        .shared();

                    slot.insert(InFlight {
                        id,
                        outcome: outcome.clone(),
                    });
                    *self
                        .flights
                        .loading
                        .entry(namespace.to_string())
                        .or_insert(0) += 1;

                    (id, tx, outcome, generation)
                }
            }
        };

        let guard = FlightGuard {
            flights: Arc::clone(&self.flights),
            namespace: namespace.to_string(),
            key: key.as_str().to_string(),
            id,
            released: false,
        };

        let started_at = Instant::now();
        let fetch = source.fetch(args);

        self.spawn_driver(&runtime, fetch, guard, tx, generation, started_at, plan.ttl, key.clone(), label);

        Ok(Attempt::Started(outcome))
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_driver<T: CacheValue>(
        &self,
        runtime: &Handle,
        fetch: BoxFuture<'static, Result<T>>,
        mut guard: FlightGuard,
        tx: oneshot::Sender<Result<StoredValue>>,
        generation: Generation,
        started_at: Instant,
        ttl: Duration,
        key: CacheKey,
        label: &str,
    ) {
        let store = Arc::clone(&self.store);
        let watchdog = Arc::clone(&self.watchdog);
        let metrics = Arc::clone(&self.metrics);
        let label = label.to_string();

        let erased = fetch
            .map(|fetched| fetched.map(T::into_stored))
            .boxed();

        runtime.spawn(async move {
            let namespace = guard.namespace.clone();

            match watchdog.supervise(erased).await {
                Verdict::Settled(outcome) => {
                    match &outcome {
                        Ok(value) => {
                            store.put_if_current(
                                &namespace,
                                &key,
                                Arc::clone(value),
                                started_at,
                                ttl,
                                generation,
                            );
                            metrics.record_fetch(&label, started_at.elapsed());
                        }
                        Err(e) => {
                            error!("Fetch for {} failed: {}", label, e);
                            metrics.record_error(&label, &e.to_string());
                        }
                    }
                    guard.release();
                    let _ = tx.send(outcome);
                }
                Verdict::Expired(pending) => {
                    let waited = watchdog.timeout();
                    warn!(
                        "Watchdog: {} still pending after {:?}, clearing loading state",
                        label, waited
                    );
                    metrics.record_timeout(&label, waited);
                    guard.release();
                    let _ = tx.send(Err(Error::Timeout(format!(
                        "{} did not settle within {:?}",
                        label, waited
                    ))));

                    match pending.await {
                        Ok(value) => {
                            if store.put_if_current(&namespace, &key, value, started_at, ttl, generation)
                            {
                                info!("Late fetch for {} written to cache", label);
                            }
                            metrics.record_fetch(&label, started_at.elapsed());
                        }
                        Err(e) => {
                            error!("Late fetch for {} failed: {}", label, e);
                            metrics.record_error(&label, &e.to_string());
                        }
                    }
                }
            }
        });
    }
}
