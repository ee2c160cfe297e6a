//! UDP Ingestion Endpoint
//!
//! Receives telemetry datagrams from the vehicle agent and forwards each one,
//! byte for byte, to the broadcast hub. One datagram is one message.
//!
//! The receive loop awaits each broadcast inline, so datagrams reach every
//! observer in arrival order. Socket read errors are logged and counted and
//! never stop the loop. When a decode lane is attached, a copy of every
//! datagram is offered to it without blocking.

use std::net::SocketAddr;

use bytes::Bytes;
use chrono::Utc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::decode_lane::RawDatagram;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics;

/// Default receive buffer size; longer datagrams are truncated.
pub const DEFAULT_MAX_DATAGRAM: usize = 4096;

/// Errors raised while setting up the endpoint.
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    /// Socket could not be bound.
    #[error("failed to bind UDP socket on {addr}: {source}")]
    BindFailed {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Bound address could not be read back.
    #[error("failed to read UDP local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Endpoint settings.
#[derive(Debug, Clone, Copy)]
pub struct UdpIngestionConfig {
    /// Address to bind.
    pub bind_addr: SocketAddr,
    /// Receive buffer size.
    pub max_datagram: usize,
}

impl Default for UdpIngestionConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8082)),
            max_datagram: DEFAULT_MAX_DATAGRAM,
        }
    }
}

/// Bound UDP receive loop.
pub struct UdpIngestionEndpoint {
    socket: UdpSocket,
    hub: SharedBroadcastHub,
    max_datagram: usize,
    decode_tx: Option<mpsc::Sender<RawDatagram>>,
}

impl UdpIngestionEndpoint {
    /// Bind the socket. Failure here is fatal at startup.
    ///
    /// # Errors
    ///
    /// Returns `IngestionError::BindFailed` if the address cannot be bound.
    pub async fn bind(
        config: UdpIngestionConfig,
        hub: SharedBroadcastHub,
    ) -> Result<Self, IngestionError> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| IngestionError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;

        Ok(Self {
            socket,
            hub,
            max_datagram: config.max_datagram.max(1),
            decode_tx: None,
        })
    }

    /// Offer a copy of every datagram to the decode lane.
    #[must_use]
    pub fn with_decode_lane(mut self, decode_tx: mpsc::Sender<RawDatagram>) -> Self {
        self.decode_tx = Some(decode_tx);
        self
    }

    /// Address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns `IngestionError::LocalAddr` if the OS cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, IngestionError> {
        self.socket.local_addr().map_err(IngestionError::LocalAddr)
    }

    /// Receive until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0_u8; self.max_datagram];
        tracing::info!(
            addr = ?self.socket.local_addr().ok(),
            max_datagram = self.max_datagram,
            decode_lane = self.decode_tx.is_some(),
            "UDP ingestion started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("UDP ingestion shutting down");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        let payload = Bytes::copy_from_slice(&buf[..len]);
                        self.forward(payload, peer).await;
                    }
                    Err(e) => {
                        metrics::record_udp_read_error();
                        tracing::warn!(error = %e, "UDP read failed");
                    }
                }
            }
        }
    }

    async fn forward(&self, payload: Bytes, peer: SocketAddr) {
        metrics::record_datagram_received(payload.len());
        self.offer_decode(&payload, peer);

        let report = self.hub.broadcast(payload).await;
        tracing::trace!(
            peer = %peer,
            delivered = report.delivered,
            evicted = report.evicted,
            "Datagram relayed"
        );
    }

    fn offer_decode(&self, payload: &Bytes, peer: SocketAddr) {
        let Some(tx) = &self.decode_tx else {
            return;
        };
        let datagram = RawDatagram {
            payload: payload.clone(),
            peer,
            received_at: Utc::now(),
        };
        match tx.try_send(datagram) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::record_decode_dropped();
                tracing::debug!(peer = %peer, "Decode queue full, datagram copy dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Decode lane closed");
            }
        }
    }
}
