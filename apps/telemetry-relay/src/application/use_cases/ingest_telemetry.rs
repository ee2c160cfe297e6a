//! Ingest Telemetry Use Case
//!
//! Five-stage pipeline run once per structured telemetry record:
//!
//! 1. Validate: fail fast, no side effects
//! 2. Persist: critical, failure aborts the pipeline
//! 3. Cache latest: best-effort
//! 4. Publish emergency (if applicable): best-effort
//! 5. Record metrics
//!
//! The overall result is `Ok` iff persistence succeeded. Best-effort stages
//! report their outcome in the returned `IngestReport` instead of failing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::application::ports::{
    EmergencyPublisherPort, MetricsPort, RepositoryError, TelemetryCachePort,
    TelemetryRepositoryPort,
};
use crate::domain::telemetry::{TelemetryError, TelemetryRecord};

/// Expiry of the latest-value cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Counter bumped when a record fails validation.
pub const VALIDATION_ERRORS_METRIC: &str = "telemetry.validation.errors";
/// Counter bumped for every record that was persisted.
pub const INGESTED_TOTAL_METRIC: &str = "telemetry.ingested.total";
/// Histogram of seconds between sample time and ingestion.
pub const INGEST_LATENCY_METRIC: &str = "telemetry.ingest.latency";
/// Counter bumped when the cache write fails.
pub const CACHE_ERRORS_METRIC: &str = "telemetry.cache.errors";
/// Counter bumped for every emergency sample.
pub const EMERGENCIES_METRIC: &str = "telemetry.emergency.total";
/// Counter bumped when an emergency event could not be published.
pub const PUBLISH_ERRORS_METRIC: &str = "telemetry.emergency.publish.errors";

// =============================================================================
// Results
// =============================================================================

/// Outcome of one best-effort stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Stage ran and succeeded.
    Completed,
    /// Stage did not apply to this record.
    Skipped,
    /// Stage failed; the failure was logged and metered.
    Degraded(String),
}

impl StageOutcome {
    /// Whether the stage failed.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

/// Summary of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    /// Vehicle of the ingested record.
    pub vehicle_id: String,
    /// Whether the record was an emergency.
    pub emergency: bool,
    /// Latest-value cache stage.
    pub cache: StageOutcome,
    /// Emergency publish stage.
    pub publish: StageOutcome,
    /// Seconds between sample time and ingestion.
    pub latency_secs: f64,
}

impl IngestReport {
    /// Whether any best-effort stage failed.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.cache.is_degraded() || self.publish.is_degraded()
    }
}

/// Critical ingestion failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IngestError {
    /// Record violates a domain invariant.
    #[error("validation failed: {0}")]
    Validation(#[from] TelemetryError),

    /// Record could not be persisted.
    #[error("persistence failed: {0}")]
    Persistence(#[from] RepositoryError),
}

// =============================================================================
// Use Case
// =============================================================================

/// Use case for ingesting one structured telemetry record.
pub struct IngestTelemetryUseCase<R, C, P, M>
where
    R: TelemetryRepositoryPort,
    C: TelemetryCachePort,
    P: EmergencyPublisherPort,
    M: MetricsPort,
{
    repository: Arc<R>,
    cache: Arc<C>,
    publisher: Arc<P>,
    metrics: Arc<M>,
    cache_ttl: Duration,
}

impl<R, C, P, M> IngestTelemetryUseCase<R, C, P, M>
where
    R: TelemetryRepositoryPort,
    C: TelemetryCachePort,
    P: EmergencyPublisherPort,
    M: MetricsPort,
{
    /// Create a new `IngestTelemetryUseCase` with the default cache TTL.
    pub const fn new(repository: Arc<R>, cache: Arc<C>, publisher: Arc<P>, metrics: Arc<M>) -> Self {
        Self {
            repository,
            cache,
            publisher,
            metrics,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Override the latest-value cache TTL.
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Execute the use case.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Validation` when the record is invalid (nothing
    /// was written) and `IngestError::Persistence` when the repository
    /// rejected it (cache and publish were not attempted).
    pub async fn execute(&self, record: &TelemetryRecord) -> Result<IngestReport, IngestError> {
        // 1. Validate
        if let Err(e) = record.validate() {
            self.metrics.increment_counter(VALIDATION_ERRORS_METRIC);
            tracing::debug!(vehicle_id = %record.vehicle_id, error = %e, "Telemetry rejected");
            return Err(e.into());
        }

        // 2. Persist
        if let Err(e) = self.repository.store(record).await {
            tracing::error!(
                vehicle_id = %record.vehicle_id,
                error = %e,
                "Failed to store telemetry"
            );
            return Err(e.into());
        }

        // 3. Cache latest
        let cache = self.update_cache(record).await;

        // 4. Publish emergency
        let emergency = record.is_emergency();
        let publish = if emergency {
            self.publish_emergency(record).await
        } else {
            StageOutcome::Skipped
        };

        // 5. Metrics
        let latency_secs = ingest_latency_secs(record);
        self.metrics
            .record_histogram(INGEST_LATENCY_METRIC, latency_secs);
        self.metrics.increment_counter(INGESTED_TOTAL_METRIC);

        Ok(IngestReport {
            vehicle_id: record.vehicle_id.clone(),
            emergency,
            cache,
            publish,
            latency_secs,
        })
    }

    async fn update_cache(&self, record: &TelemetryRecord) -> StageOutcome {
        let key = record.latest_cache_key();
        match self.cache.set(&key, record, self.cache_ttl).await {
            Ok(()) => StageOutcome::Completed,
            Err(e) => {
                self.metrics.increment_counter(CACHE_ERRORS_METRIC);
                tracing::warn!(key = %key, error = %e, "Failed to update cache");
                StageOutcome::Degraded(e.to_string())
            }
        }
    }

    async fn publish_emergency(&self, record: &TelemetryRecord) -> StageOutcome {
        self.metrics.increment_counter(EMERGENCIES_METRIC);
        match self.publisher.publish_emergency(record).await {
            Ok(()) => StageOutcome::Completed,
            Err(e) => {
                self.metrics.increment_counter(PUBLISH_ERRORS_METRIC);
                tracing::error!(
                    vehicle_id = %record.vehicle_id,
                    speed = record.speed,
                    brake = record.brake,
                    error = %e,
                    "Failed to publish emergency event"
                );
                StageOutcome::Degraded(e.to_string())
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ingest_latency_secs(record: &TelemetryRecord) -> f64 {
    let elapsed = Utc::now().signed_duration_since(record.timestamp);
    (elapsed.num_milliseconds() as f64 / 1000.0).max(0.0)
}
