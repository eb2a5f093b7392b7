//! # flight-cache
//!
//! A client-side data-access cache that sits between consumers and async
//! fetch functions.
//!
//! ## Features
//!
//! - **Single-flight:** concurrent requests for the same namespace and
//!   arguments share one fetch and observe the same outcome
//! - **TTL freshness:** fresh entries are served from memory without
//!   suspending; expired ones are refetched, and with `stale_after` set an
//!   ageing entry is refreshed in the background while still being served
//! - **Any value type:** values stay in process as typed, shared allocations
//! - **Canonical keys:** argument lists are serialized deterministically,
//!   with object keys sorted
//! - **Watchdog:** no fetch keeps its namespace "loading" past a fixed bound
//! - **Session scoping:** the whole cache is flushed on sign-out, identity
//!   change or cache-version change
//! - **Preloading:** a fixed set of namespaces is warmed in parallel at
//!   startup, best-effort
//!
//! ## Quick Start
//!
//! ```ignore
//! use flight_cache::{CacheConfig, CacheService, Preloader, SessionGuard};
//! use flight_cache::marker::FileMarkerStore;
//! use std::sync::Arc;
//!
//! // 1. Create the service once and share clones
//! let cache = CacheService::new(CacheConfig::default())?;
//! let _sweeper = cache.start_sweeper();
//!
//! // 2. Scope the cache to the current version and session
//! let guard = SessionGuard::new(cache.clone(), Arc::new(FileMarkerStore::new("markers.json")));
//! guard.check_version()?;
//! let _watcher = guard.watch(session_events.subscribe());
//!
//! // 3. Warm what every screen needs
//! Preloader::new()
//!     .task("projects", Arc::new(fetch_projects), ())
//!     .run(&cache)
//!     .await;
//!
//! // 4. Consumers resolve through namespace handles
//! let by_month = cache.namespace("projectsByMonth", Arc::new(fetch_projects_by_month));
//! let october = by_month.resolve((2026, 10)).await?;
//! by_month.warm((2026, 11))?;
//! ```
//!
//! ## Lower-level API
//!
//! [`RequestCoordinator`] can be used directly when a service wrapper is not
//! wanted:
//!
//! ```ignore
//! let coordinator = RequestCoordinator::new(&CacheConfig::default());
//! let value = coordinator
//!     .resolve("widgets", &fetch_widgets, (), Duration::from_secs(5))
//!     .await?;
//! ```

#[macro_use]
extern crate log;

pub mod config;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod marker;
pub mod namespace;
pub mod observability;
pub mod preload;
pub mod service;
pub mod session;
pub mod source;
pub mod store;
pub mod value;
pub mod watchdog;

// Re-exports for convenience
pub use config::CacheConfig;
pub use coordinator::RequestCoordinator;
pub use error::{Error, Result};
pub use key::{CacheKey, KeyCodec};
pub use marker::MarkerStore;
pub use namespace::Namespace;
pub use observability::{CacheMetrics, CacheStats, TtlPolicy};
pub use preload::{PreloadReport, Preloader};
pub use service::CacheService;
pub use session::{SessionEvent, SessionEventKind, SessionGuard};
pub use source::{DataSource, SharedSource};
pub use store::CacheStore;
pub use value::{CacheValue, StoredValue};
pub use watchdog::SafetyWatchdog;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
