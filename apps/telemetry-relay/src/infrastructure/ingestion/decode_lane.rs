//! Datagram Decode Lane
//!
//! Off the relay path: decodes copies of received datagrams and feeds them
//! to the ingestion use case, so UDP telemetry is persisted and checked for
//! emergencies. The queue is bounded and the UDP loop never waits on it.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::codec::decode_telemetry;
use crate::application::ports::{
    EmergencyPublisherPort, MetricsPort, TelemetryCachePort, TelemetryRepositoryPort,
};
use crate::application::use_cases::{IngestError, IngestTelemetryUseCase};
use crate::infrastructure::metrics;

/// Datagram copy queued for decoding.
#[derive(Debug, Clone)]
pub struct RawDatagram {
    /// Bytes as received.
    pub payload: Bytes,
    /// Sender address.
    pub peer: SocketAddr,
    /// Receive time, used when the payload carries no timestamp.
    pub received_at: DateTime<Utc>,
}

/// Create the bounded decode queue.
#[must_use]
pub fn decode_channel(
    capacity: usize,
) -> (mpsc::Sender<RawDatagram>, mpsc::Receiver<RawDatagram>) {
    mpsc::channel(capacity.max(1))
}

/// Consumer side of the decode queue.
pub struct DecodeLane<R, C, P, M>
where
    R: TelemetryRepositoryPort,
    C: TelemetryCachePort,
    P: EmergencyPublisherPort,
    M: MetricsPort,
{
    rx: mpsc::Receiver<RawDatagram>,
    ingest: Arc<IngestTelemetryUseCase<R, C, P, M>>,
}

impl<R, C, P, M> DecodeLane<R, C, P, M>
where
    R: TelemetryRepositoryPort,
    C: TelemetryCachePort,
    P: EmergencyPublisherPort,
    M: MetricsPort,
{
    /// Create a lane draining `rx` into `ingest`.
    #[must_use]
    pub const fn new(
        rx: mpsc::Receiver<RawDatagram>,
        ingest: Arc<IngestTelemetryUseCase<R, C, P, M>>,
    ) -> Self {
        Self { rx, ingest }
    }

    /// Drain the queue until every sender is gone or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(datagram) => self.process(datagram).await,
                    None => break,
                }
            }
        }
        tracing::debug!("Decode lane stopped");
    }

    async fn process(&self, datagram: RawDatagram) {
        let record = match decode_telemetry(&datagram.payload, datagram.received_at) {
            Ok(record) => record,
            Err(e) => {
                metrics::record_decode_failure();
                tracing::debug!(peer = %datagram.peer, error = %e, "Datagram is not telemetry");
                return;
            }
        };

        match self.ingest.execute(&record).await {
            Ok(report) if report.is_degraded() => {
                tracing::debug!(
                    vehicle_id = %report.vehicle_id,
                    cache = ?report.cache,
                    publish = ?report.publish,
                    "Datagram ingested with degraded stages"
                );
            }
            Ok(_) => {}
            Err(IngestError::Validation(e)) => {
                tracing::debug!(peer = %datagram.peer, error = %e, "Datagram telemetry rejected");
            }
            Err(e @ IngestError::Persistence(_)) => {
                tracing::warn!(
                    vehicle_id = %record.vehicle_id,
                    error = %e,
                    "Datagram telemetry not persisted"
                );
            }
        }
    }
}
