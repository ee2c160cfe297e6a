//! Metrics Port (Driven Port)
//!
//! Minimal counter/histogram sink used by the use cases. Recording never
//! fails from the caller's point of view.

/// Port for recording application metrics.
pub trait MetricsPort: Send + Sync {
    /// Increment a counter by one.
    fn increment_counter(&self, name: &'static str);

    /// Record one histogram observation.
    fn record_histogram(&self, name: &'static str, value: f64);
}

/// Metrics sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl MetricsPort for NoOpMetrics {
    fn increment_counter(&self, _name: &'static str) {}

    fn record_histogram(&self, _name: &'static str, _value: f64) {}
}
