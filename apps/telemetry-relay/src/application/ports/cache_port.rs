//! Telemetry Cache Port (Driven Port)
//!
//! Keyed read-acceleration store with per-entry expiry. Never a source of
//! truth: entries may vanish at any time.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::telemetry::TelemetryRecord;

/// Cache errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Backend unreachable.
    #[error("cache connection error: {message}")]
    ConnectionError {
        /// Backend error message.
        message: String,
    },

    /// Value could not be encoded or decoded.
    #[error("cache serialization error: {message}")]
    SerializationError {
        /// Codec error message.
        message: String,
    },
}

/// Port for the latest-value cache.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetryCachePort: Send + Sync {
    /// Look up an entry. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<TelemetryRecord>, CacheError>;

    /// Insert or replace an entry that expires after `ttl`.
    async fn set(
        &self,
        key: &str,
        record: &TelemetryRecord,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Remove an entry. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}
