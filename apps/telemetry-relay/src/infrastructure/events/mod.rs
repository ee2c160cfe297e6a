//! Emergency Event Adapters
//!
//! `EmergencyPublisherPort` over a `tokio::sync::broadcast` channel. Any
//! number of in-process consumers may subscribe; a consumer that lags loses
//! the oldest events. Publishing with no subscribers is not an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::{EmergencyPublisherPort, EventPublishError};
use crate::domain::telemetry::TelemetryRecord;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EMERGENCY_CHANNEL_CAPACITY: usize = 256;

/// Emergency notification for one telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyEvent {
    /// Unique event id.
    pub event_id: Uuid,
    /// When the relay detected the emergency.
    pub detected_at: DateTime<Utc>,
    /// The triggering sample.
    pub record: TelemetryRecord,
}

impl EmergencyEvent {
    /// Wrap a triggering record.
    #[must_use]
    pub fn new(record: TelemetryRecord) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            detected_at: Utc::now(),
            record,
        }
    }
}

/// In-process emergency publisher.
#[derive(Debug, Clone)]
pub struct BroadcastEmergencyPublisher {
    tx: broadcast::Sender<EmergencyEvent>,
}

impl BroadcastEmergencyPublisher {
    /// Create a publisher buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EmergencyEvent> {
        self.tx.subscribe()
    }

    /// Current number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastEmergencyPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EMERGENCY_CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl EmergencyPublisherPort for BroadcastEmergencyPublisher {
    async fn publish_emergency(&self, record: &TelemetryRecord) -> Result<(), EventPublishError> {
        let event = EmergencyEvent::new(record.clone());
        let event_id = event.event_id;
        match self.tx.send(event) {
            Ok(subscribers) => {
                tracing::debug!(%event_id, vehicle_id = %record.vehicle_id, subscribers, "Emergency published");
            }
            Err(_) => {
                tracing::debug!(%event_id, vehicle_id = %record.vehicle_id, "Emergency published with no subscribers");
            }
        }
        Ok(())
    }
}

/// Log every emergency event until cancelled or the publisher is dropped.
pub async fn log_emergencies(
    mut rx: broadcast::Receiver<EmergencyEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(event) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        vehicle_id = %event.record.vehicle_id,
                        speed = event.record.speed,
                        brake = event.record.brake,
                        timestamp = %event.record.timestamp,
                        "Emergency condition"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Emergency logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let publisher = BroadcastEmergencyPublisher::default();
        let record = TelemetryRecord::new("car-1", Utc::now(), 150.0);
        assert!(publisher.publish_emergency(&record).await.is_ok());
    }

    #[tokio::test]
    async fn subscribers_receive_event() {
        let publisher = BroadcastEmergencyPublisher::new(8);
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 2);

        let record = TelemetryRecord::new("car-1", Utc::now(), 150.0);
        publisher.publish_emergency(&record).await.unwrap();

        assert_eq!(a.recv().await.unwrap().record, record);
        assert_eq!(b.recv().await.unwrap().record, record);
    }

    #[tokio::test]
    async fn lagging_subscriber_loses_oldest() {
        let publisher = BroadcastEmergencyPublisher::new(2);
        let mut rx = publisher.subscribe();
        for speed in [101.0, 102.0, 103.0] {
            publisher
                .publish_emergency(&TelemetryRecord::new("car-1", Utc::now(), speed))
                .await
                .unwrap();
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        let next = rx.recv().await.unwrap();
        assert!((next.record.speed - 102.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn logger_stops_when_publisher_dropped() {
        let publisher = BroadcastEmergencyPublisher::new(4);
        let rx = publisher.subscribe();
        publisher
            .publish_emergency(&TelemetryRecord::new("car-1", Utc::now(), 140.0))
            .await
            .unwrap();
        drop(publisher);

        tokio::time::timeout(
            Duration::from_secs(2),
            log_emergencies(rx, CancellationToken::new()),
        )
        .await
        .unwrap();
    }

    #[test]
    fn event_serializes_record() {
        let event = EmergencyEvent::new(TelemetryRecord::new("car-1", Utc::now(), 140.0));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["record"]["VehicleID"], "car-1");
        assert!(json["event_id"].is_string());
    }
}
