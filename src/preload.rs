//! Startup preloading: warm a fixed list of namespaces in parallel.
//!
//! Preloading is best-effort. Every task runs on its own Tokio task, a
//! failure (or panic) is logged and recorded in the [`PreloadReport`], and
//! never affects the other tasks.
//!
//! ```ignore
//! let report = Preloader::new()
//!     .task("projects", Arc::new(fetch_projects), ())
//!     .task_with_follow_up(
//!         "projectsByMonth",
//!         Arc::new(fetch_projects_by_month),
//!         (2026, 10),
//!         vec![(2026, 9), (2026, 11)],
//!         Duration::from_secs(2),
//!     )
//!     .run(&cache)
//!     .await;
//!
//! for (namespace, ok) in report.summary() {
//!     println!("{}: {}", namespace, ok);
//! }
//! ```

use crate::error::{Error, Result};
use crate::service::CacheService;
use crate::source::DataSource;
use crate::value::CacheValue;
use futures::future::{self, BoxFuture, FutureExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

type PreloadJob = Box<dyn FnOnce(CacheService) -> BoxFuture<'static, Result<()>> + Send>;

/// Builder for a batch of startup fetches.
#[derive(Default)]
pub struct Preloader {
    jobs: Vec<(String, PreloadJob)>,
}

impl Preloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fetch of `args` in `namespace`, using the namespace's policy TTL.
    pub fn task<A, T, S>(self, namespace: impl Into<String>, source: Arc<S>, args: A) -> Self
    where
        A: Serialize + Send + 'static,
        T: CacheValue,
        S: DataSource<A, T> + ?Sized + 'static,
    {
        self.task_with_follow_up(namespace, source, args, Vec::new(), Duration::ZERO)
    }

    /// Like [`task`](Self::task), and once the fetch succeeds, wait `delay`
    /// and warm each of `follow_up` in the background.
    pub fn task_with_follow_up<A, T, S>(
        mut self,
        namespace: impl Into<String>,
        source: Arc<S>,
        args: A,
        follow_up: Vec<A>,
        delay: Duration,
    ) -> Self
    where
        A: Serialize + Send + 'static,
        T: CacheValue,
        S: DataSource<A, T> + ?Sized + 'static,
    {
        let namespace = namespace.into();
        let name = namespace.clone();

        let job: PreloadJob = Box::new(move |service: CacheService| {
            async move {
                let ttl = service.ttl_for(&namespace);
                service
                    .resolve::<A, T, S>(&namespace, &*source, args, ttl)
                    .await?;

                if !follow_up.is_empty() {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        for args in follow_up {
                            if let Err(e) = service.warm::<A, T, S>(&namespace, &*source, args, ttl) {
                                error!("Follow-up warm for {} failed: {}", namespace, e);
                            }
                        }
                    });
                }
                Ok(())
            }
            .boxed()
        });

        self.jobs.push((name, job));
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run every task concurrently and wait for all of them.
    ///
    /// Never fails; per-task failures are in the report.
    pub async fn run(self, service: &CacheService) -> PreloadReport {
        let started = Instant::now();
        info!("Preloading {} namespaces", self.jobs.len());

        let (names, handles): (Vec<String>, Vec<_>) = self
            .jobs
            .into_iter()
            .map(|(namespace, job)| {
                let fut = job(service.clone());
                let handle = tokio::spawn(async move {
                    let task_started = Instant::now();
                    let outcome = fut.await;
                    (outcome, task_started.elapsed())
                });
                (namespace, handle)
            })
            .unzip();

        let joined = future::join_all(handles).await;

        let outcomes = names
            .into_iter()
            .zip(joined)
            .map(|(namespace, joined)| {
                let (error, elapsed) = match joined {
                    Ok((Ok(()), elapsed)) => {
                        info!("Preloaded {} in {:?}", namespace, elapsed);
                        (None, elapsed)
                    }
                    Ok((Err(e), elapsed)) => {
                        error!("Failed to preload {}: {}", namespace, e);
                        (Some(e), elapsed)
                    }
                    Err(e) => {
                        error!("Preload task for {} aborted: {}", namespace, e);
                        (
                            Some(Error::Other(format!("preload task aborted: {}", e))),
                            started.elapsed(),
                        )
                    }
                };
                PreloadOutcome {
                    namespace,
                    error,
                    elapsed,
                }
            })
            .collect();

        let report = PreloadReport { outcomes };
        info!(
            "Preload finished in {:?}: {} succeeded, {} failed",
            started.elapsed(),
            report.succeeded(),
            report.failed()
        );
        report
    }
}

/// Result of one preload task.
#[derive(Clone, Debug, PartialEq)]
pub struct PreloadOutcome {
    pub namespace: String,
    pub error: Option<Error>,
    pub elapsed: Duration,
}

impl PreloadOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-task outcomes of a preload run, in task order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreloadReport {
    pub outcomes: Vec<PreloadOutcome>,
}

impl PreloadReport {
    /// Success per namespace. A namespace with several tasks succeeds only if
    /// all of them did.
    pub fn summary(&self) -> BTreeMap<String, bool> {
        let mut summary = BTreeMap::new();
        for outcome in &self.outcomes {
            summary
                .entry(outcome.namespace.clone())
                .and_modify(|ok: &mut bool| *ok &= outcome.is_success())
                .or_insert(outcome.is_success());
        }
        summary
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}
