//! Trait for values held in the cache.
//!
//! Values never leave the process, so they are stored as they are: one
//! shared, type-erased allocation per entry, cloned out on every read. Any
//! `Clone + Send + Sync + 'static` type qualifies, including
//! `serde_json::Value` and other self-describing shapes.

use crate::error::{Error, Result};
use std::any::{type_name, Any};
use std::sync::Arc;

/// A cached value with its concrete type erased.
pub type StoredValue = Arc<dyn Any + Send + Sync>;

/// Trait that every cached value satisfies.
///
/// Blanket-implemented for any `Clone + Send + Sync + 'static` type, so
/// callers never implement it by hand.
///
/// # Example
///
/// ```
/// use flight_cache::CacheValue;
///
/// #[derive(Clone)]
/// pub struct Roster {
///     pub project_id: String,
///     pub crew: Vec<String>,
/// }
///
/// fn assert_cacheable<T: CacheValue>() {}
/// assert_cacheable::<Roster>();
/// assert_cacheable::<serde_json::Value>();
/// ```
pub trait CacheValue: Clone + Send + Sync + 'static {
    /// Move the value into the store's shared representation.
    fn into_stored(self) -> StoredValue {
        Arc::new(self)
    }

    /// Clone the value out of a stored entry.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCacheEntry` if the entry holds another type,
    /// which happens when two callers use one namespace for different values.
    fn from_stored(stored: &StoredValue) -> Result<Self> {
        (**stored).downcast_ref::<Self>().cloned().ok_or_else(|| {
            Error::InvalidCacheEntry(format!("entry does not hold a {}", type_name::<Self>()))
        })
    }
}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}
