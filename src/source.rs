//! Data source trait for the fetch functions behind each namespace.
//!
//! The cache never knows how a value is produced. A source takes the
//! argument list and returns a future resolving to the value or an error.
//! Any async closure `Fn(A) -> impl Future<Output = Result<T>>` is a source:
//!
//! ```
//! use flight_cache::{DataSource, Result};
//!
//! async fn fetch_projects_by_month(args: (i32, u32)) -> Result<Vec<String>> {
//!     let (year, month) = args;
//!     Ok(vec![format!("{}-{:02} kickoff", year, month)])
//! }
//!
//! fn assert_source<S: DataSource<(i32, u32), Vec<String>>>(_: &S) {}
//! assert_source(&fetch_projects_by_month);
//! ```
//!
//! The returned future must be `'static` because a fetch outlives the caller
//! that started it: joiners keep waiting on it, and after a watchdog expiry it
//! still runs to completion in the background.

use crate::error::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Trait for fetch functions.
pub trait DataSource<A, T>: Send + Sync {
    /// Start fetching the value for `args`.
    fn fetch(&self, args: A) -> BoxFuture<'static, Result<T>>;
}

impl<A, T, F, Fut> DataSource<A, T> for F
where
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    fn fetch(&self, args: A) -> BoxFuture<'static, Result<T>> {
        (self)(args).boxed()
    }
}

/// Shared, type-erased data source.
pub type SharedSource<A, T> = Arc<dyn DataSource<A, T>>;
