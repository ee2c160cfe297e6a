//! WebSocket Observer Adapter
//!
//! Bridges an upgraded axum WebSocket onto the broadcast hub:
//!
//! - the outbound half becomes a [`WebSocketSink`] owned by the hub;
//! - a liveness probe task pings it on a fixed interval;
//! - the inbound half is drained here until the client closes or errors,
//!   which unregisters the observer;
//! - the session ends as soon as the hub evicts the observer, even if the
//!   peer never sends another frame.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::broadcast::{LivenessConfig, LivenessProbe, ObserverSink, SharedBroadcastHub, SinkError};
use crate::domain::observer::ObserverId;

/// Outbound half of an observer WebSocket.
pub struct WebSocketSink {
    inner: SplitSink<WebSocket, Message>,
}

impl WebSocketSink {
    /// Wrap the write half of a split socket.
    #[must_use]
    pub const fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ObserverSink for WebSocketSink {
    async fn send_payload(&mut self, payload: Bytes) -> Result<(), SinkError> {
        self.inner
            .send(payload_frame(payload))
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }

    async fn send_probe(&mut self) -> Result<(), SinkError> {
        self.inner
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.inner
            .close()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}

/// Text frame for UTF-8 payloads, binary otherwise.
fn payload_frame(payload: Bytes) -> Message {
    match std::str::from_utf8(&payload) {
        Ok(text) => Message::Text(Utf8Bytes::from(text)),
        Err(_) => Message::Binary(payload),
    }
}

/// Serve one upgraded observer connection until it goes away.
pub async fn serve_observer(
    socket: WebSocket,
    hub: SharedBroadcastHub,
    liveness: LivenessConfig,
    shutdown: CancellationToken,
) {
    let (sink, stream) = socket.split();
    let session = shutdown.child_token();
    let observer_id = hub
        .register_session(WebSocketSink::new(sink), session.clone())
        .await;

    run_session(stream, observer_id, hub, liveness, session).await;
}

/// Drain inbound frames until the client leaves or `session` is cancelled.
async fn run_session<St>(
    mut stream: St,
    observer_id: ObserverId,
    hub: SharedBroadcastHub,
    liveness: LivenessConfig,
    session: CancellationToken,
) where
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let probe = LivenessProbe::new(liveness, Arc::clone(&hub), observer_id, session.clone()).spawn();

    loop {
        tokio::select! {
            () = session.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                // Client traffic carries no meaning for the relay.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(observer_id = %observer_id, error = %e, "Observer read failed");
                    break;
                }
            }
        }
    }

    session.cancel();
    hub.unregister(observer_id).await;
    if let Err(e) = probe.await {
        tracing::debug!(observer_id = %observer_id, error = %e, "Liveness task ended abnormally");
    }
}
