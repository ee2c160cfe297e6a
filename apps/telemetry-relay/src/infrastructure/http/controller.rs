//! HTTP Controller (Driver Adapter)
//!
//! Axum router exposing the observer WebSocket, the telemetry API, health and
//! metrics.
//!
//! # Endpoints
//!
//! - `GET /ws` - WebSocket upgrade; the connection joins the broadcast hub
//! - `GET /health` - 200 with an empty body
//! - `GET /metrics` - Prometheus metrics in text format
//! - `POST /telemetry` - ingest one JSON telemetry record
//! - `GET /telemetry/latest?vehicle_id=` - most recent record
//! - `GET /telemetry/history?vehicle_id=&start=&end=` - records in a window
//! - `GET /telemetry/aggregated?vehicle_id=&interval_secs=` - bucketed rollups

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::request::{
    AggregatedQuery, DEFAULT_AGGREGATION_INTERVAL_SECS, DEFAULT_HISTORY_WINDOW_SECS,
    HistoryQuery, LatestQuery,
};
use super::response::ApiError;
use crate::application::ports::{
    EmergencyPublisherPort, MetricsPort, TelemetryCachePort, TelemetryRepositoryPort,
};
use crate::application::use_cases::{IngestTelemetryUseCase, QueryTelemetryUseCase};
use crate::infrastructure::broadcast::{LivenessConfig, SharedBroadcastHub};
use crate::infrastructure::ingestion::decode_telemetry;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::websocket::serve_observer;

/// Application state shared across handlers.
pub struct AppState<R, C, P, M>
where
    R: TelemetryRepositoryPort,
    C: TelemetryCachePort,
    P: EmergencyPublisherPort,
    M: MetricsPort,
{
    /// Use case for ingesting records.
    pub ingest: Arc<IngestTelemetryUseCase<R, C, P, M>>,
    /// Use case for reading records.
    pub query: Arc<QueryTelemetryUseCase<R>>,
    /// Observer registry.
    pub hub: SharedBroadcastHub,
    /// Probe settings for new observers.
    pub liveness: LivenessConfig,
    /// Process shutdown signal; observer sessions end when it fires.
    pub shutdown: CancellationToken,
}

impl<R, C, P, M> Clone for AppState<R, C, P, M>
where
    R: TelemetryRepositoryPort,
    C: TelemetryCachePort,
    P: EmergencyPublisherPort,
    M: MetricsPort,
{
    fn clone(&self) -> Self {
        Self {
            ingest: Arc::clone(&self.ingest),
            query: Arc::clone(&self.query),
            hub: Arc::clone(&self.hub),
            liveness: self.liveness,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Create the HTTP router with all endpoints.
pub fn create_router<R, C, P, M>(state: AppState<R, C, P, M>) -> Router
where
    R: TelemetryRepositoryPort + 'static,
    C: TelemetryCachePort + 'static,
    P: EmergencyPublisherPort + 'static,
    M: MetricsPort + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler::<R, C, P, M>))
        .route("/telemetry", post(ingest_telemetry::<R, C, P, M>))
        .route("/telemetry/latest", get(latest_telemetry::<R, C, P, M>))
        .route("/telemetry/history", get(telemetry_history::<R, C, P, M>))
        .route(
            "/telemetry/aggregated",
            get(aggregated_telemetry::<R, C, P, M>),
        )
        .with_state(state)
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn ws_handler<R, C, P, M>(
    State(state): State<AppState<R, C, P, M>>,
    ws: WebSocketUpgrade,
) -> Response
where
    R: TelemetryRepositoryPort + 'static,
    C: TelemetryCachePort + 'static,
    P: EmergencyPublisherPort + 'static,
    M: MetricsPort + 'static,
{
    let hub = Arc::clone(&state.hub);
    let liveness = state.liveness;
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| serve_observer(socket, hub, liveness, shutdown))
}

async fn ingest_telemetry<R, C, P, M>(
    State(state): State<AppState<R, C, P, M>>,
    body: Bytes,
) -> Result<Response, ApiError>
where
    R: TelemetryRepositoryPort,
    C: TelemetryCachePort,
    P: EmergencyPublisherPort,
    M: MetricsPort,
{
    let record = decode_telemetry(&body, Utc::now())?;
    let report = state.ingest.execute(&record).await?;
    Ok((StatusCode::CREATED, Json(report)).into_response())
}

async fn latest_telemetry<R, C, P, M>(
    State(state): State<AppState<R, C, P, M>>,
    Query(params): Query<LatestQuery>,
) -> Result<Response, ApiError>
where
    R: TelemetryRepositoryPort,
    C: TelemetryCachePort,
    P: EmergencyPublisherPort,
    M: MetricsPort,
{
    let vehicle_id = params.vehicle_id.unwrap_or_default();
    let record = state.query.latest(&vehicle_id).await?;
    Ok(Json(record).into_response())
}

async fn telemetry_history<R, C, P, M>(
    State(state): State<AppState<R, C, P, M>>,
    Query(params): Query<HistoryQuery>,
) -> Result<Response, ApiError>
where
    R: TelemetryRepositoryPort,
    C: TelemetryCachePort,
    P: EmergencyPublisherPort,
    M: MetricsPort,
{
    let end = parse_instant("end", params.end.as_deref())?.unwrap_or_else(Utc::now);
    let start = parse_instant("start", params.start.as_deref())?
        .unwrap_or(end - chrono::Duration::seconds(DEFAULT_HISTORY_WINDOW_SECS));
    let vehicle_id = params.vehicle_id.unwrap_or_default();

    let records = state.query.history(&vehicle_id, start, end).await?;
    Ok(Json(records).into_response())
}

async fn aggregated_telemetry<R, C, P, M>(
    State(state): State<AppState<R, C, P, M>>,
    Query(params): Query<AggregatedQuery>,
) -> Result<Response, ApiError>
where
    R: TelemetryRepositoryPort,
    C: TelemetryCachePort,
    P: EmergencyPublisherPort,
    M: MetricsPort,
{
    let interval = Duration::from_secs(
        params
            .interval_secs
            .unwrap_or(DEFAULT_AGGREGATION_INTERVAL_SECS),
    );
    let vehicle_id = params.vehicle_id.unwrap_or_default();

    let buckets = state.query.aggregated(&vehicle_id, interval).await?;
    Ok(Json(buckets).into_response())
}

fn parse_instant(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| {
            DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    ApiError::bad_request("invalid_timestamp", format!("{name}: {e}"))
                })
        })
        .transpose()
}

// =============================================================================
// Tests
// =============================================================================
