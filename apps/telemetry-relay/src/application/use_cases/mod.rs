//! Application Use Cases
//!
//! Use cases orchestrate domain logic over the driven ports.

mod ingest_telemetry;
mod query_telemetry;

pub use ingest_telemetry::{
    CACHE_ERRORS_METRIC, DEFAULT_CACHE_TTL, EMERGENCIES_METRIC, INGEST_LATENCY_METRIC,
    INGESTED_TOTAL_METRIC, IngestError, IngestReport, IngestTelemetryUseCase,
    PUBLISH_ERRORS_METRIC, StageOutcome, VALIDATION_ERRORS_METRIC,
};
pub use query_telemetry::{QueryError, QueryTelemetryUseCase};
