//! Cache service configuration.
//!
//! ```
//! use flight_cache::CacheConfig;
//! use std::time::Duration;
//!
//! let config = CacheConfig::default()
//!     .with_default_ttl(Duration::from_secs(180))
//!     .with_stale_after(Duration::from_secs(60))
//!     .with_watchdog_timeout(Duration::from_secs(10))
//!     .with_max_entries(100);
//! assert!(config.validate().is_ok());
//!
//! let from_json = CacheConfig::from_json_str(r#"{ "default_ttl_ms": 60000 }"#).unwrap();
//! assert_eq!(from_json.default_ttl(), Duration::from_secs(60));
//! assert_eq!(from_json.watchdog_timeout(), Duration::from_secs(30));
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default freshness window: 5 minutes.
pub const DEFAULT_TTL_MS: u64 = 5 * 60 * 1000;

/// Default watchdog bound on the loading state: 30 seconds.
pub const DEFAULT_WATCHDOG_TIMEOUT_MS: u64 = 30 * 1000;

/// Default interval of the expired-entry sweeper: 1 minute.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60 * 1000;

/// Cache-version marker expected by this build.
pub fn default_cache_version() -> String {
    crate::VERSION.to_string()
}

/// Whole milliseconds of `duration`, rounding a sub-millisecond remainder up
/// and saturating at `u64::MAX`.
fn to_millis(duration: Duration) -> u64 {
    let millis = duration.as_millis() + u128::from(duration.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Configuration for a [`CacheService`](crate::CacheService).
///
/// Unset fields take their defaults when deserializing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used when neither the caller nor the TTL policy gives one.
    pub default_ttl_ms: u64,

    /// Age past which a hit is still served but refreshed in the background.
    /// `None` disables background refresh.
    pub stale_after_ms: Option<u64>,

    /// How long a fetch may keep its namespace in the loading state.
    ///
    /// One global value; there is no per-call override.
    pub watchdog_timeout_ms: u64,

    /// Optional bound on entries per namespace (LRU eviction past it).
    pub max_entries_per_namespace: Option<usize>,

    /// Interval of the background expired-entry sweep. `None` disables it.
    pub sweep_interval_ms: Option<u64>,

    /// Expected cache-version marker. A different persisted marker flushes
    /// the cache on startup.
    pub cache_version: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            default_ttl_ms: DEFAULT_TTL_MS,
            stale_after_ms: None,
            watchdog_timeout_ms: DEFAULT_WATCHDOG_TIMEOUT_MS,
            max_entries_per_namespace: None,
            sweep_interval_ms: Some(DEFAULT_SWEEP_INTERVAL_MS),
            cache_version: default_cache_version(),
        }
    }
}

impl CacheConfig {
    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` for malformed JSON or invalid values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("invalid cache config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Check the values are usable.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` on zero durations, a zero entry bound or
    /// an empty cache version.
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_ms == 0 {
            return Err(Error::ConfigError("default_ttl_ms must be > 0".into()));
        }
        if self.stale_after_ms == Some(0) {
            return Err(Error::ConfigError("stale_after_ms must be > 0".into()));
        }
        if self.watchdog_timeout_ms == 0 {
            return Err(Error::ConfigError("watchdog_timeout_ms must be > 0".into()));
        }
        if self.max_entries_per_namespace == Some(0) {
            return Err(Error::ConfigError(
                "max_entries_per_namespace must be > 0".into(),
            ));
        }
        if self.sweep_interval_ms == Some(0) {
            return Err(Error::ConfigError("sweep_interval_ms must be > 0".into()));
        }
        if self.cache_version.trim().is_empty() {
            return Err(Error::ConfigError("cache_version must not be empty".into()));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_ms.map(Duration::from_millis)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms.map(Duration::from_millis)
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = to_millis(ttl);
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after_ms = Some(to_millis(stale_after));
        self
    }

    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout_ms = to_millis(timeout);
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries_per_namespace = Some(max);
        self
    }

    /// Set the sweep interval; `None` turns the sweeper off.
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval_ms = interval.map(to_millis);
        self
    }

    pub fn with_cache_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = version.into();
        self
    }
}
