//! High-level cache service shared by every consumer.
//!
//! Provides a cheap-to-clone wrapper around [`RequestCoordinator`] with an
//! explicit lifecycle: create it at startup, hand clones to consumers, run
//! the [`SessionGuard`](crate::SessionGuard) and
//! [`Preloader`](crate::Preloader) against it, and shut it down at exit.

use crate::config::CacheConfig;
use crate::coordinator::RequestCoordinator;
use crate::error::Result;
use crate::namespace::Namespace;
use crate::observability::{CacheMetrics, TtlPolicy};
use crate::source::{DataSource, SharedSource};
use crate::store::{CacheStore, StoreStats};
use crate::value::CacheValue;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// High-level cache service.
///
/// All clones share one store and one in-flight table.
///
/// # Example
///
/// ```ignore
/// use flight_cache::{CacheConfig, CacheService};
/// use std::sync::Arc;
///
/// let cache = CacheService::new(CacheConfig::default())?;
/// let _sweeper = cache.start_sweeper();
///
/// // In your data layer
/// pub struct StaffService {
///     cache: CacheService,
/// }
///
/// impl StaffService {
///     pub async fn roster(&self, project: u32) -> Result<Roster> {
///         self.cache
///             .resolve("rosters", &fetch_roster, (project,), self.cache.ttl_for("rosters"))
///             .await
///     }
/// }
/// ```
#[derive(Clone)]
pub struct CacheService {
    coordinator: Arc<RequestCoordinator>,
    config: Arc<CacheConfig>,
}

impl CacheService {
    /// Create a service from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if `config` fails validation.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_coordinator(RequestCoordinator::new(&config), config))
    }

    /// Create a service with custom metrics.
    pub fn with_metrics(config: CacheConfig, metrics: Arc<dyn CacheMetrics>) -> Result<Self> {
        config.validate()?;
        let coordinator = RequestCoordinator::new(&config).with_metrics(metrics);
        Ok(Self::from_coordinator(coordinator, config))
    }

    /// Create a service with a custom TTL policy.
    pub fn with_ttl_policy(config: CacheConfig, policy: TtlPolicy) -> Result<Self> {
        config.validate()?;
        let coordinator = RequestCoordinator::new(&config).with_ttl_policy(policy);
        Ok(Self::from_coordinator(coordinator, config))
    }

    /// Wrap an already configured coordinator.
    pub fn from_coordinator(coordinator: RequestCoordinator, config: CacheConfig) -> Self {
        CacheService {
            coordinator: Arc::new(coordinator),
            config: Arc::new(config),
        }
    }

    /// See [`RequestCoordinator::resolve`].
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
        self.coordinator.resolve(namespace, source, args, ttl).await
    }

    /// See [`RequestCoordinator::warm`].
    pub fn warm<A, T, S>(&self, namespace: &str, source: &S, args: A, ttl: Duration) -> Result<()>
    where
        A: Serialize,
        T: CacheValue,
        S: DataSource<A, T> + ?Sized,
    {
        self.coordinator.warm(namespace, source, args, ttl)
    }

    /// Bind a namespace to its data source. The handle's TTL comes from the
    /// TTL policy.
    pub fn namespace<A, T>(&self, name: impl Into<String>, source: SharedSource<A, T>) -> Namespace<A, T>
    where
        A: Serialize + Send,
        T: CacheValue,
    {
        Namespace::new(self.clone(), name.into(), source)
    }

    pub fn evict<A: Serialize + ?Sized>(&self, namespace: &str, args: &A) -> Result<bool> {
        self.coordinator.evict(namespace, args)
    }

    pub fn flush(&self, namespace: &str) -> usize {
        self.coordinator.flush(namespace)
    }

    pub fn flush_all(&self) -> usize {
        self.coordinator.flush_all()
    }

    pub fn is_loading(&self, namespace: &str) -> bool {
        self.coordinator.is_loading(namespace)
    }

    pub fn ttl_for(&self, namespace: &str) -> Duration {
        self.coordinator.ttl_for(namespace)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> StoreStats {
        self.coordinator.store().stats()
    }

    /// Get store reference (for advanced use).
    pub fn store(&self) -> &CacheStore {
        self.coordinator.store()
    }

    /// Get a reference to the underlying coordinator.
    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    /// Spawn the periodic expired-entry sweep.
    ///
    /// Each entry is purged once it is older than the TTL it was resolved
    /// with, so a handle with a long TTL keeps its entries across sweeps.
    ///
    /// Returns `None` when the sweep is disabled in the configuration. The
    /// task runs until the handle is aborted.
    pub fn start_sweeper(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.sweep_interval()?;
        let coordinator = Arc::clone(&self.coordinator);

        info!("Starting cache sweeper every {:?}", interval);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let purged = coordinator.purge_expired();
                if purged > 0 {
                    debug!("Sweeper purged {} expired entries", purged);
                }
            }
        }))
    }

    /// Drop every cached value. Fetches still in flight are detached and
    /// their results discarded.
    pub fn shutdown(&self) {
        let removed = self.flush_all();
        info!("Cache service shut down ({} entries dropped)", removed);
    }
}
