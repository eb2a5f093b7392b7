//! Observability and TTL policies for cache operations.
//!
//! # Metrics
//!
//! Implement [`CacheMetrics`] to feed cache events to a monitoring system.
//! Every hook has a default that logs through the `log` crate, so an
//! implementation only overrides what it cares about:
//!
//! ```ignore
//! use flight_cache::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hit(&self, _label: &str, _duration: Duration) {
//!         // counter!("cache_hits").inc();
//!     }
//! }
//! ```
//!
//! [`NoOpMetrics`] discards everything and is the default. [`CounterMetrics`]
//! keeps atomic counters and produces a [`CacheStats`] snapshot.
//!
//! # TTL Policies
//!
//! ```
//! use flight_cache::observability::TtlPolicy;
//! use std::time::Duration;
//!
//! let _policy = TtlPolicy::Fixed(Duration::from_secs(300));
//!
//! let _policy = TtlPolicy::PerNamespace(|namespace| match namespace {
//!     "notifications" => Duration::from_secs(60),
//!     "locations" => Duration::from_secs(86_400),
//!     _ => Duration::from_secs(300),
//! });
//! ```
//!
//! | Policy | Use Case |
//! |--------|----------|
//! | `Default` | Use the configured default TTL |
//! | `Fixed` | Uniform freshness window |
//! | `Infinite` | Reference data that never goes stale |
//! | `PerNamespace` | Per data-source windows |

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Trait for cache metrics collection.
///
/// `label` is the `namespace/key` pair of the request.
pub trait CacheMetrics: Send + Sync {
    /// A fresh entry was served from memory.
    fn record_hit(&self, label: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", label, duration);
    }

    /// No fresh entry and no in-flight request: a fetch is started.
    fn record_miss(&self, label: &str) {
        debug!("Cache MISS: {}", label);
    }

    /// The caller joined an already running fetch.
    fn record_join(&self, label: &str) {
        debug!("Cache JOIN: {}", label);
    }

    /// A fetch settled successfully.
    fn record_fetch(&self, label: &str, duration: Duration) {
        debug!("Cache FETCH: {} took {:?}", label, duration);
    }

    /// A fetch failed.
    fn record_error(&self, label: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", label, error);
    }

    /// The watchdog gave up waiting on a fetch.
    fn record_timeout(&self, label: &str, waited: Duration) {
        warn!("Cache TIMEOUT for {} after {:?}", label, waited);
    }

    /// A namespace (or `*` for everything) was flushed.
    fn record_flush(&self, scope: &str, entries: usize) {
        debug!("Cache FLUSH {}: {} entries", scope, entries);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _label: &str, _duration: Duration) {}
    fn record_miss(&self, _label: &str) {}
    fn record_join(&self, _label: &str) {}
    fn record_fetch(&self, _label: &str, _duration: Duration) {}
    fn record_error(&self, _label: &str, _error: &str) {}
    fn record_timeout(&self, _label: &str, _waited: Duration) {}
    fn record_flush(&self, _scope: &str, _entries: usize) {}
}

/// Counting metrics implementation.
#[derive(Default)]
pub struct CounterMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    fetches: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    flushes: AtomicU64,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

impl CacheMetrics for CounterMetrics {
    fn record_hit(&self, _label: &str, _duration: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self, _label: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_join(&self, _label: &str) {
        self.joins.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fetch(&self, _label: &str, _duration: Duration) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self, label: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        debug!("Cache ERROR for {}: {}", label, error);
    }

    fn record_timeout(&self, _label: &str, _waited: Duration) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_flush(&self, _scope: &str, _entries: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time counter snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub joins: u64,
    pub fetches: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub flushes: u64,
}

impl CacheStats {
    /// Share of lookups served from memory, in percent.
    ///
    /// Joins count as neither hit nor miss.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 * 100.0 / lookups as f64
    }
}

/// TTL (freshness window) policy.
#[derive(Clone, Debug, Default)]
pub enum TtlPolicy {
    /// Use the configured default TTL
    #[default]
    Default,

    /// Fixed duration for all namespaces
    Fixed(Duration),

    /// Entries never go stale
    Infinite,

    /// Custom per-namespace policy
    PerNamespace(fn(&str) -> Duration),
}

impl TtlPolicy {
    /// Resolve the TTL for `namespace`, falling back to `default`.
    pub fn ttl_for(&self, namespace: &str, default: Duration) -> Duration {
        match self {
            TtlPolicy::Default => default,
            TtlPolicy::Fixed(d) => *d,
            TtlPolicy::Infinite => Duration::MAX,
            TtlPolicy::PerNamespace(f) => f(namespace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIVE_MIN: Duration = Duration::from_secs(300);

    #[test]
    fn test_noop_metrics() {
        let metrics = NoOpMetrics;
        metrics.record_hit("projects/default", Duration::from_millis(1));
        metrics.record_miss("projects/default");
    }

    #[test]
    fn test_counter_metrics_snapshot() {
        let metrics = CounterMetrics::new();
        metrics.record_hit("a", Duration::ZERO);
        metrics.record_hit("a", Duration::ZERO);
        metrics.record_hit("a", Duration::ZERO);
        metrics.record_miss("a");
        metrics.record_join("a");
        metrics.record_error("a", "boom");

        let stats = metrics.snapshot();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.joins, 1);
        assert_eq!(stats.errors, 1);
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_rate_without_lookups() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_ttl_policy_default() {
        assert_eq!(TtlPolicy::Default.ttl_for("any", FIVE_MIN), FIVE_MIN);
    }

    #[test]
    fn test_ttl_policy_fixed() {
        let policy = TtlPolicy::Fixed(Duration::from_secs(60));
        assert_eq!(policy.ttl_for("any", FIVE_MIN), Duration::from_secs(60));
    }

    #[test]
    fn test_ttl_policy_infinite() {
        assert_eq!(TtlPolicy::Infinite.ttl_for("any", FIVE_MIN), Duration::MAX);
    }

    #[test]
    fn test_ttl_policy_per_namespace() {
        let policy = TtlPolicy::PerNamespace(|namespace| match namespace {
            "notifications" => Duration::from_secs(60),
            _ => Duration::from_secs(600),
        });

        assert_eq!(
            policy.ttl_for("notifications", FIVE_MIN),
            Duration::from_secs(60)
        );
        assert_eq!(policy.ttl_for("projects", FIVE_MIN), Duration::from_secs(600));
    }
}
