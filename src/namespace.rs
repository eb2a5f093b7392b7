//! Consumer-facing handle bound to one namespace and its data source.

use crate::error::Result;
use crate::key::{CacheKey, KeyCodec};
use crate::service::CacheService;
use crate::source::SharedSource;
use crate::value::CacheValue;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// A namespace, its fetch function and its TTL.
///
/// `is_loading` reports on the most recent key requested through this
/// handle, so each consumer should hold its own handle.
///
/// ```ignore
/// let projects = cache.namespace("projects", Arc::new(fetch_projects_by_month));
///
/// let october = projects.resolve((2026, 10)).await?;
/// projects.warm((2026, 11))?;
/// assert!(projects.is_loading() == false);
///
/// projects.invalidate(None)?;
/// ```
pub struct Namespace<A, T> {
    service: CacheService,
    name: String,
    source: SharedSource<A, T>,
    ttl: Duration,
    last_key: Mutex<Option<CacheKey>>,
}

impl<A, T> Namespace<A, T>
where
    A: Serialize + Send,
    T: CacheValue,
{
    pub(crate) fn new(service: CacheService, name: String, source: SharedSource<A, T>) -> Self {
        let ttl = service.ttl_for(&name);
        Namespace {
            service,
            name,
            source,
            ttl,
            last_key: Mutex::new(None),
        }
    }

    /// Override the TTL taken from the service's policy.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolve `args` through the cache.
    ///
    /// # Errors
    ///
    /// Same as [`CacheService::resolve`].
    pub async fn resolve(&self, args: A) -> Result<T> {
        self.remember(&args)?;
        self.service
            .resolve(&self.name, &*self.source, args, self.ttl)
            .await
    }

    /// Prefetch `args` in the background.
    ///
    /// # Errors
    ///
    /// Same as [`CacheService::warm`].
    pub fn warm(&self, args: A) -> Result<()> {
        self.service.warm(&self.name, &*self.source, args, self.ttl)
    }

    /// Evict one key, or flush the whole namespace when `args` is `None`.
    pub fn invalidate(&self, args: Option<&A>) -> Result<()> {
        match args {
            Some(args) => {
                self.service.evict(&self.name, args)?;
            }
            None => {
                self.service.flush(&self.name);
            }
        }
        Ok(())
    }

    /// Whether a fetch is outstanding for the most recently resolved key.
    pub fn is_loading(&self) -> bool {
        let last_key = self.last_key.lock().unwrap_or_else(PoisonError::into_inner);
        match last_key.as_ref() {
            Some(key) => self.service.coordinator().is_in_flight(&self.name, key),
            None => false,
        }
    }

    fn remember(&self, args: &A) -> Result<()> {
        let key = KeyCodec::encode(args)?;
        *self.last_key.lock().unwrap_or_else(PoisonError::into_inner) = Some(key);
        Ok(())
    }
}
