//! Telemetry Repository Port (Driven Port)
//!
//! Durable storage for telemetry samples. The reference schema keeps one row
//! per `(time, vehicle_id)` with a column per scalar field plus a metadata
//! blob; adapters are free to store however they like as long as the read
//! methods return what was written.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::telemetry::{AggregatedTelemetry, TelemetryRecord};

/// Storage errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// Backend unreachable.
    #[error("storage connection error: {message}")]
    ConnectionError {
        /// Backend error message.
        message: String,
    },

    /// Write rejected by the backend.
    #[error("storage write failed: {message}")]
    WriteFailed {
        /// Backend error message.
        message: String,
    },

    /// Read failed.
    #[error("storage query failed: {message}")]
    QueryFailed {
        /// Backend error message.
        message: String,
    },

    /// The adapter does not implement this operation.
    #[error("storage operation not supported: {operation}")]
    NotSupported {
        /// Name of the operation.
        operation: &'static str,
    },
}

/// Port for persisting and reading telemetry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetryRepositoryPort: Send + Sync {
    /// Persist one sample.
    async fn store(&self, record: &TelemetryRecord) -> Result<(), RepositoryError>;

    /// Persist several samples. Either all are stored or none are.
    async fn store_batch(&self, records: &[TelemetryRecord]) -> Result<(), RepositoryError>;

    /// Most recent sample of a vehicle, by sample timestamp.
    async fn get_latest(&self, vehicle_id: &str)
    -> Result<Option<TelemetryRecord>, RepositoryError>;

    /// Samples of a vehicle with `start <= timestamp <= end`, oldest first.
    async fn get_by_time_range(
        &self,
        vehicle_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>, RepositoryError>;

    /// Fixed-width rollups of a vehicle's samples, oldest bucket first.
    async fn get_aggregated(
        &self,
        vehicle_id: &str,
        interval: Duration,
    ) -> Result<Vec<AggregatedTelemetry>, RepositoryError>;
}
