//! Query Telemetry Use Case
//!
//! Read side of the pipeline. Every request is validated before storage is
//! touched, so malformed queries never cost a backend round-trip.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::application::ports::{RepositoryError, TelemetryRepositoryPort};
use crate::domain::telemetry::{
    AggregatedTelemetry, TelemetryRecord, bucket_width_millis, normalize_vehicle_id,
};

/// Query failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    /// No vehicle identifier was supplied.
    #[error("vehicle_id required")]
    MissingVehicleId,

    /// The vehicle has no telemetry.
    #[error("no telemetry for vehicle {0}")]
    NotFound(String),

    /// `start` is after `end`.
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange {
        /// Range start.
        start: DateTime<Utc>,
        /// Range end.
        end: DateTime<Utc>,
    },

    /// Aggregation interval is under a millisecond or too large to bucket.
    #[error("aggregation interval must be between 1 ms and i64::MAX ms")]
    InvalidInterval,

    /// Storage failed.
    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

/// Use case answering telemetry read queries.
pub struct QueryTelemetryUseCase<R>
where
    R: TelemetryRepositoryPort,
{
    repository: Arc<R>,
}

impl<R> QueryTelemetryUseCase<R>
where
    R: TelemetryRepositoryPort,
{
    /// Create a new `QueryTelemetryUseCase`.
    pub const fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Most recent sample of `vehicle_id`.
    ///
    /// # Errors
    ///
    /// `MissingVehicleId` for an empty id, `NotFound` when nothing is stored,
    /// `Storage` when the repository fails.
    pub async fn latest(&self, vehicle_id: &str) -> Result<TelemetryRecord, QueryError> {
        let vehicle_id = require_vehicle_id(vehicle_id)?;
        self.repository
            .get_latest(vehicle_id)
            .await?
            .ok_or_else(|| QueryError::NotFound(vehicle_id.to_string()))
    }

    /// Samples of `vehicle_id` between `start` and `end` inclusive.
    ///
    /// # Errors
    ///
    /// `MissingVehicleId`, `InvalidRange` when `start > end`, or `Storage`.
    pub async fn history(
        &self,
        vehicle_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>, QueryError> {
        let vehicle_id = require_vehicle_id(vehicle_id)?;
        if start > end {
            return Err(QueryError::InvalidRange { start, end });
        }
        Ok(self
            .repository
            .get_by_time_range(vehicle_id, start, end)
            .await?)
    }

    /// Fixed-width rollups of `vehicle_id`.
    ///
    /// # Errors
    ///
    /// `MissingVehicleId`, `InvalidInterval` for an interval the domain cannot
    /// bucket, or `Storage`.
    pub async fn aggregated(
        &self,
        vehicle_id: &str,
        interval: Duration,
    ) -> Result<Vec<AggregatedTelemetry>, QueryError> {
        let vehicle_id = require_vehicle_id(vehicle_id)?;
        bucket_width_millis(interval).map_err(|_| QueryError::InvalidInterval)?;
        Ok(self
            .repository
            .get_aggregated(vehicle_id, interval)
            .await?)
    }
}

fn require_vehicle_id(vehicle_id: &str) -> Result<&str, QueryError> {
    normalize_vehicle_id(vehicle_id).ok_or(QueryError::MissingVehicleId)
}
