//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: Datagrams received, read errors, decode outcomes
//! - **Observers**: Registered observer gauge and evictions by reason
//! - **Latency**: Broadcast fan-out duration
//! - **Pipeline**: Counters and histograms emitted by the use cases through
//!   [`PrometheusMetrics`]
//!
//! # Integration
//!
//! Metrics are rendered at `/metrics` on the HTTP port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::application::ports::MetricsPort;
use crate::application::use_cases::{
    CACHE_ERRORS_METRIC, EMERGENCIES_METRIC, INGEST_LATENCY_METRIC, INGESTED_TOTAL_METRIC,
    PUBLISH_ERRORS_METRIC, VALIDATION_ERRORS_METRIC,
};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Failure to install the global recorder.
#[derive(Debug, thiserror::Error)]
#[error("failed to install Prometheus recorder: {0}")]
pub struct MetricsInitError(String);

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again after a successful install returns the same handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsInitError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsInitError(e.to_string()))?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Ingestion
    describe_counter!(
        "telemetry_relay_datagrams_received_total",
        "Total datagrams read from the UDP socket"
    );
    describe_counter!(
        "telemetry_relay_udp_read_errors_total",
        "Total UDP socket read errors"
    );
    describe_counter!(
        "telemetry_relay_decode_failures_total",
        "Total datagrams that could not be decoded as telemetry"
    );
    describe_counter!(
        "telemetry_relay_decode_dropped_total",
        "Total datagram copies dropped because the decode queue was full"
    );

    // Observers
    describe_gauge!(
        "telemetry_relay_observers",
        "Number of registered WebSocket observers"
    );
    describe_counter!(
        "telemetry_relay_observer_evictions_total",
        "Total observers evicted by reason"
    );

    // Latency
    describe_histogram!(
        "telemetry_relay_broadcast_seconds",
        "Time to fan one payload out to every observer"
    );

    // Pipeline
    describe_counter!(VALIDATION_ERRORS_METRIC, "Records rejected by validation");
    describe_counter!(INGESTED_TOTAL_METRIC, "Records persisted");
    describe_counter!(CACHE_ERRORS_METRIC, "Latest-value cache write failures");
    describe_counter!(EMERGENCIES_METRIC, "Emergency records ingested");
    describe_counter!(PUBLISH_ERRORS_METRIC, "Emergency publish failures");
    describe_histogram!(
        INGEST_LATENCY_METRIC,
        "Seconds between sample timestamp and ingestion"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why an observer was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Payload write returned an error.
    WriteFailed,
    /// Payload write missed its deadline.
    WriteTimeout,
    /// Liveness probe returned an error.
    ProbeFailed,
    /// Liveness probe missed its deadline.
    ProbeTimeout,
}

impl EvictionReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WriteFailed => "write_failed",
            Self::WriteTimeout => "write_timeout",
            Self::ProbeFailed => "probe_failed",
            Self::ProbeTimeout => "probe_timeout",
        }
    }
}

/// Record one datagram read from the socket.
pub fn record_datagram_received(bytes: usize) {
    counter!("telemetry_relay_datagrams_received_total").increment(1);
    counter!("telemetry_relay_datagram_bytes_total").increment(bytes as u64);
}

/// Record a socket read error.
pub fn record_udp_read_error() {
    counter!("telemetry_relay_udp_read_errors_total").increment(1);
}

/// Record a datagram that was not valid telemetry.
pub fn record_decode_failure() {
    counter!("telemetry_relay_decode_failures_total").increment(1);
}

/// Record a datagram copy dropped by a full decode queue.
pub fn record_decode_dropped() {
    counter!("telemetry_relay_decode_dropped_total").increment(1);
}

/// Update the registered observer gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_observers(count: usize) {
    gauge!("telemetry_relay_observers").set(count as f64);
}

/// Record an observer eviction.
pub fn record_eviction(reason: EvictionReason) {
    counter!(
        "telemetry_relay_observer_evictions_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record broadcast fan-out duration.
pub fn record_broadcast_duration(duration: Duration) {
    histogram!("telemetry_relay_broadcast_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Metrics Port Adapter
// =============================================================================

/// `MetricsPort` backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl MetricsPort for PrometheusMetrics {
    fn increment_counter(&self, name: &'static str) {
        counter!(name).increment(1);
    }

    fn record_histogram(&self, name: &'static str, value: f64) {
        histogram!(name).record(value);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_reason_labels() {
        assert_eq!(EvictionReason::WriteFailed.as_str(), "write_failed");
        assert_eq!(EvictionReason::WriteTimeout.as_str(), "write_timeout");
        assert_eq!(EvictionReason::ProbeFailed.as_str(), "probe_failed");
        assert_eq!(EvictionReason::ProbeTimeout.as_str(), "probe_timeout");
    }

    #[test]
    fn recording_without_recorder_is_harmless() {
        record_datagram_received(128);
        record_udp_read_error();
        record_decode_failure();
        record_decode_dropped();
        set_observers(3);
        record_eviction(EvictionReason::ProbeTimeout);
        record_broadcast_duration(Duration::from_millis(2));

        let metrics = PrometheusMetrics;
        metrics.increment_counter(INGESTED_TOTAL_METRIC);
        metrics.record_histogram(INGEST_LATENCY_METRIC, 0.25);
    }

    #[test]
    fn init_metrics_is_idempotent() {
        let first = init_metrics();
        let second = init_metrics();
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(get_metrics_handle().is_some());
    }
}
