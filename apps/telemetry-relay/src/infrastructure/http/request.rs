//! HTTP request types.

use serde::Deserialize;

/// Default aggregation bucket width in seconds.
pub const DEFAULT_AGGREGATION_INTERVAL_SECS: u64 = 60;

/// Default history window in seconds when `start` is omitted.
pub const DEFAULT_HISTORY_WINDOW_SECS: i64 = 3600;

/// Query string of `GET /telemetry/latest`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LatestQuery {
    /// Vehicle to look up.
    #[serde(default)]
    pub vehicle_id: Option<String>,
}

/// Query string of `GET /telemetry/history`.
///
/// `end` defaults to now and `start` to one hour before `end`. Both are
/// RFC 3339 instants.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    /// Vehicle to look up.
    #[serde(default)]
    pub vehicle_id: Option<String>,
    /// Inclusive lower bound.
    #[serde(default)]
    pub start: Option<String>,
    /// Inclusive upper bound.
    #[serde(default)]
    pub end: Option<String>,
}

/// Query string of `GET /telemetry/aggregated`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregatedQuery {
    /// Vehicle to look up.
    #[serde(default)]
    pub vehicle_id: Option<String>,
    /// Bucket width in seconds.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}
