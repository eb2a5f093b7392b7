//! Identity scoping: flush the whole cache when the version or the session
//! changes.
//!
//! The cache is not keyed by identity. Instead [`SessionGuard`] watches two
//! persisted markers and empties everything when either stops matching:
//!
//! - the cache version, checked once at startup ([`SessionGuard::check_version`]);
//! - the session identifier, checked on every session event
//!   ([`SessionGuard::observe`]), with sign-out always flushing.

use crate::error::Result;
use crate::marker::{MarkerStore, SESSION_MARKER, VERSION_MARKER};
use crate::service::CacheService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Kind of authentication-session transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// One notification from the session feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session_id: Option<String>,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind, session_id: Option<String>) -> Self {
        SessionEvent { kind, session_id }
    }

    pub fn signed_in(session_id: impl Into<String>) -> Self {
        Self::new(SessionEventKind::SignedIn, Some(session_id.into()))
    }

    pub fn signed_out() -> Self {
        Self::new(SessionEventKind::SignedOut, None)
    }
}

/// Flushes the cache on version or identity changes.
pub struct SessionGuard {
    service: CacheService,
    markers: Arc<dyn MarkerStore>,
    expected_version: String,
}

impl SessionGuard {
    /// Guard `service`, expecting the cache version from its configuration.
    pub fn new(service: CacheService, markers: Arc<dyn MarkerStore>) -> Self {
        let expected_version = service.config().cache_version.clone();
        SessionGuard {
            service,
            markers,
            expected_version,
        }
    }

    pub fn with_expected_version(mut self, version: impl Into<String>) -> Self {
        self.expected_version = version.into();
        self
    }

    pub fn expected_version(&self) -> &str {
        &self.expected_version
    }

    /// Compare the persisted version marker to the expected one; on any
    /// difference (including no marker) flush everything and persist the
    /// expected version.
    ///
    /// Returns whether a flush happened.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` if the marker store fails.
    pub fn check_version(&self) -> Result<bool> {
        let persisted = self.markers.get(VERSION_MARKER)?;
        if persisted.as_deref() == Some(self.expected_version.as_str()) {
            debug!("Cache version {} matches", self.expected_version);
            return Ok(false);
        }

        match &persisted {
            Some(found) => warn!(
                "Cache version changed ({} -> {}), flushing",
                found, self.expected_version
            ),
            None => info!("No cache version recorded, writing {}", self.expected_version),
        }
        self.service.flush_all();
        self.markers.set(VERSION_MARKER, &self.expected_version)?;
        Ok(true)
    }

    /// React to one session event.
    ///
    /// A sign-out flushes and forgets the persisted identifier. Any other event
    /// carrying an identifier different from the persisted one flushes and
    /// persists the new identifier. Events without an identifier are ignored.
    ///
    /// Returns whether a flush happened.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendError` if the marker store fails. The flush
    /// itself has already happened when that error is returned.
    pub fn observe(&self, event: &SessionEvent) -> Result<bool> {
        if event.kind == SessionEventKind::SignedOut {
            let removed = self.service.flush_all();
            info!("Signed out, cache flushed ({} entries)", removed);
            self.markers.remove(SESSION_MARKER)?;
            return Ok(true);
        }

        let Some(session_id) = event.session_id.as_deref() else {
            return Ok(false);
        };

        let persisted = self.markers.get(SESSION_MARKER)?;
        if persisted.as_deref() == Some(session_id) {
            return Ok(false);
        }

        let removed = self.service.flush_all();
        info!(
            "Session changed on {:?}, cache flushed ({} entries)",
            event.kind, removed
        );
        self.markers.set(SESSION_MARKER, session_id)?;
        Ok(true)
    }

    /// Consume the session feed until it closes.
    ///
    /// Missed events (a lagged receiver) might have included a sign-out, so
    /// they flush everything and forget the persisted identifier.
    pub fn watch(self, mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.observe(&event) {
                            error!("Session marker update failed: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Session feed lagged by {} events, flushing cache", missed);
                        self.service.flush_all();
                        if let Err(e) = self.markers.remove(SESSION_MARKER) {
                            error!("Session marker update failed: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Session feed closed");
                        break;
                    }
                }
            }
        })
    }
}
