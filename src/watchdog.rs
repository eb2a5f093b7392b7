//! Liveness bound on the loading state of a fetch.
//!
//! The watchdog races a fetch against a fixed timer. If the timer wins, the
//! fetch is handed back still pending: the caller clears its loading state
//! and keeps driving the fetch to completion, so a slow source still lands in
//! the cache eventually but nobody observes it as "loading" past the bound.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Outcome of a supervised fetch.
pub enum Verdict<F: Future> {
    /// The fetch settled within the bound.
    Settled(F::Output),
    /// The bound elapsed first; the fetch is returned unfinished.
    Expired(F),
}

impl<F: Future> Verdict<F> {
    pub fn is_expired(&self) -> bool {
        matches!(self, Verdict::Expired(_))
    }
}

/// Timer-based guard that bounds how long a fetch counts as loading.
#[derive(Debug)]
pub struct SafetyWatchdog {
    timeout: Duration,
    armed: AtomicU64,
    expired: AtomicU64,
}

impl SafetyWatchdog {
    pub fn new(timeout: Duration) -> Self {
        SafetyWatchdog {
            timeout,
            armed: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm the timer and wait for `fetch` or the deadline, whichever is first.
    ///
    /// `fetch` is polled in place, so on expiry it is returned exactly where it
    /// stopped and can be awaited further.
    pub async fn supervise<F>(&self, mut fetch: F) -> Verdict<F>
    where
        F: Future + Unpin,
    {
        self.armed.fetch_add(1, Ordering::Relaxed);

        // timeout() caps a deadline past the clock's range instead of panicking
        match tokio::time::timeout(self.timeout, &mut fetch).await {
            Ok(output) => Verdict::Settled(output),
            Err(_) => {
                self.expired.fetch_add(1, Ordering::Relaxed);
                Verdict::Expired(fetch)
            }
        }
    }

    /// Number of fetches supervised so far.
    pub fn armed(&self) -> u64 {
        self.armed.load(Ordering::Relaxed)
    }

    /// Number of fetches that outlived the bound.
    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }
}

impl Default for SafetyWatchdog {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_WATCHDOG_TIMEOUT_MS))
    }
}
