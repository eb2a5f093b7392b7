//! Error types for the cache.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the cache.
///
/// `Error` is `Clone` because a single fetch outcome is delivered to every
/// caller that joined the same in-flight request.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The supplied fetch function rejected.
    ///
    /// Propagated unchanged to every joined caller and never cached; the next
    /// call for the same key performs a brand-new fetch.
    FetchError(String),

    /// The safety watchdog stopped waiting on a fetch.
    ///
    /// The underlying fetch is not cancelled. If it later succeeds its value
    /// is still written to the cache (unless a flush happened meanwhile).
    Timeout(String),

    /// An argument list could not be serialized canonically.
    ///
    /// Raised instead of producing a key that might collide with another one.
    SerializationError(String),

    /// A persisted marker file could not be parsed.
    DeserializationError(String),

    /// A cached entry holds a value of another type than the one requested.
    InvalidCacheEntry(String),

    /// The durable marker store failed (file I/O).
    BackendError(String),

    /// Invalid configuration.
    ConfigError(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Shorthand for building a [`Error::FetchError`] from any displayable error.
    pub fn fetch(err: impl fmt::Display) -> Self {
        Error::FetchError(err.to_string())
    }

    /// Whether this error came from a watchdog expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FetchError(msg) => write!(f, "Fetch error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FetchError("connection reset".to_string());
        assert_eq!(err.to_string(), "Fetch error: connection reset");

        let err = Error::InvalidCacheEntry("entry does not hold a u32".to_string());
        assert_eq!(err.to_string(), "Invalid cache entry: entry does not hold a u32");
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_fetch_helper_keeps_message() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        assert_eq!(Error::fetch(io), Error::FetchError("socket closed".into()));
    }

    #[test]
    fn test_timeout_classification() {
        assert!(Error::Timeout("x".into()).is_timeout());
        assert!(!Error::FetchError("x".into()).is_timeout());
    }

    #[test]
    fn test_json_syntax_error_maps_to_deserialization() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::DeserializationError(_)));
    }
}
