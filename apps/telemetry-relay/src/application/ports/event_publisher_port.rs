//! Emergency Publisher Port (Driven Port)
//!
//! Interface for announcing emergency samples to downstream consumers.
//! Delivery is at-most-once; the persisted record stays the source of truth.

use async_trait::async_trait;

use crate::domain::telemetry::TelemetryRecord;

/// Event publishing error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventPublishError {
    /// Connection error.
    #[error("Event publish connection error: {message}")]
    ConnectionError {
        /// Transport error message.
        message: String,
    },

    /// Serialization error.
    #[error("Event serialization error: {message}")]
    SerializationError {
        /// Codec error message.
        message: String,
    },

    /// Publishing failed.
    #[error("Event publish failed: {message}")]
    PublishFailed {
        /// Transport error message.
        message: String,
    },
}

/// Port for publishing emergency events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmergencyPublisherPort: Send + Sync {
    /// Publish an emergency event for `record`.
    async fn publish_emergency(&self, record: &TelemetryRecord) -> Result<(), EventPublishError>;
}
