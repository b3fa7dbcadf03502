//! Shared error types for `ratelimit-gate-core`.

/// An error from a [`crate::cache::CacheStore`] backend.
///
/// The gate never surfaces this to callers directly: per the error-handling
/// design, a failed read is treated as a miss and a failed write is dropped.
/// This type exists so a `CacheStore` implementation backed by a real
/// network round-trip (not provided by this crate) has something to return.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cache store error: {0}")]
pub struct CacheStoreError(pub String);

impl CacheStoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
