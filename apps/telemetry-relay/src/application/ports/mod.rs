//! Port Interfaces
//!
//! Contracts that infrastructure adapters implement, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TelemetryRepositoryPort`: durable telemetry storage
//! - `TelemetryCachePort`: latest-value cache with expiry
//! - `EmergencyPublisherPort`: emergency event delivery
//! - `MetricsPort`: counters and histograms

mod cache_port;
mod event_publisher_port;
mod metrics_port;
mod telemetry_repository_port;

pub use cache_port::{CacheError, TelemetryCachePort};
pub use event_publisher_port::{EmergencyPublisherPort, EventPublishError};
pub use metrics_port::{MetricsPort, NoOpMetrics};
pub use telemetry_repository_port::{RepositoryError, TelemetryRepositoryPort};

#[cfg(test)]
pub use cache_port::MockTelemetryCachePort;
#[cfg(test)]
pub use event_publisher_port::MockEmergencyPublisherPort;
#[cfg(test)]
pub use telemetry_repository_port::MockTelemetryRepositoryPort;
