//! Durable markers: the cache-version and last-session scalars.
//!
//! These two strings are the only state that outlives the process. Cached
//! values themselves are never persisted.

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Marker holding the cache-version the persisted state was written under.
pub const VERSION_MARKER: &str = "cache-version";

/// Marker holding the last observed session identifier.
pub const SESSION_MARKER: &str = "last-session";

/// Small durable key-value store for markers.
///
/// All methods use `&self`; implementations use interior mutability.
pub trait MarkerStore: Send + Sync {
    /// Read a marker. `Ok(None)` if it was never written.
    ///
    /// # Errors
    /// Returns `Err` if the underlying storage cannot be read.
    fn get(&self, name: &str) -> Result<Option<String>>;

    /// Write a marker, replacing any previous value.
    ///
    /// # Errors
    /// Returns `Err` if the underlying storage cannot be written.
    fn set(&self, name: &str, value: &str) -> Result<()>;

    /// Remove a marker. Removing a missing marker is not an error.
    ///
    /// # Errors
    /// Returns `Err` if the underlying storage cannot be written.
    fn remove(&self, name: &str) -> Result<()>;
}

/// Process-local marker store, for tests and for hosts without durable
/// storage.
#[derive(Debug, Default)]
pub struct InMemoryMarkerStore {
    markers: DashMap<String, String>,
}

impl InMemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarkerStore for InMemoryMarkerStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.markers.get(name).map(|value| value.clone()))
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.markers.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.markers.remove(name);
        Ok(())
    }
}

/// Marker store backed by one JSON object file.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// original, so a crash leaves either the old or the new document.
#[derive(Debug)]
pub struct FileMarkerStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileMarkerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileMarkerStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                Error::DeserializationError(format!(
                    "marker file {} is corrupt: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::BackendError(format!(
                "cannot read marker file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn save(&self, markers: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(markers)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut markers = match self.load() {
            Ok(markers) => markers,
            Err(e @ Error::DeserializationError(_)) => {
                warn!("{}; starting from an empty marker set", e);
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        apply(&mut markers);
        self.save(&markers)
    }
}

impl MarkerStore for FileMarkerStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(name))
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.update(|markers| {
            markers.insert(name.to_string(), value.to_string());
        })
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.update(|markers| {
            markers.remove(name);
        })
    }
}
