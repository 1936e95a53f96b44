//! Error types for cache operations
//!
//! This module defines the error taxonomy of the cache engine. Backend
//! transport failures have their own [`BackendError`] type because the
//! fetcher absorbs them; everything else surfaces as a [`CacheError`].

use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// A fill lock held by another client was not released in time
    #[error("Fill lock on {key} still held after {waits} waits")]
    LockWaitTimeout { key: String, waits: u32 },

    /// The cache backend could not be reached
    #[error("Cache backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Error raised by a loader or the backing record source
    #[error(transparent)]
    Source(#[from] anyhow::Error),

    /// Malformed relationship spec passed to the prefetch planner
    #[error("Invalid relationship spec: {0}")]
    InvalidSpec(String),

    /// Invalid argument passed to an engine entry point
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl CacheError {
    /// Whether the caller should fall back to an uncached read
    pub fn is_lock_wait_timeout(&self) -> bool {
        matches!(self, CacheError::LockWaitTimeout { .. })
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

/// Transport-level failure reported by a cache backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend could not be reached or rejected the request
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

impl From<BackendError> for CacheError {
    fn from(e: BackendError) -> Self {
        CacheError::BackendUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CacheError::LockWaitTimeout {
            key: "IDC:1:blob:Item:7".to_string(),
            waits: 3,
        };
        assert_eq!(
            error.to_string(),
            "Fill lock on IDC:1:blob:Item:7 still held after 3 waits"
        );
        assert!(error.is_lock_wait_timeout());

        let spec_error = CacheError::InvalidSpec("expected string".to_string());
        assert!(spec_error.to_string().contains("expected string"));
    }

    #[test]
    fn test_source_error_is_transparent() {
        let error: CacheError = anyhow::anyhow!("connection reset by peer").into();
        assert_eq!(error.to_string(), "connection reset by peer");
        assert!(matches!(error, CacheError::Source(_)));
    }

    #[test]
    fn test_error_conversion() {
        let error: CacheError = "test error".into();
        assert!(matches!(error, CacheError::Other(_)));

        let error: CacheError = BackendError::Unavailable("refused".to_string()).into();
        assert!(matches!(error, CacheError::BackendUnavailable(_)));
        assert!(error.to_string().contains("refused"));
    }
}
