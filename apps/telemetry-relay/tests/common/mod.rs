//! Shared fixture: a relay bound to loopback ports.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use telemetry_relay::application::use_cases::{IngestTelemetryUseCase, QueryTelemetryUseCase};
use telemetry_relay::infrastructure::broadcast::{
    BroadcastHub, HubConfig, LivenessConfig, SharedBroadcastHub,
};
use telemetry_relay::infrastructure::events::BroadcastEmergencyPublisher;
use telemetry_relay::infrastructure::http::{AppState, HttpServer, create_router};
use telemetry_relay::infrastructure::ingestion::{
    DecodeLane, UdpIngestionConfig, UdpIngestionEndpoint, decode_channel,
};
use telemetry_relay::infrastructure::metrics::PrometheusMetrics;
use telemetry_relay::infrastructure::persistence::{
    InMemoryTelemetryCache, InMemoryTelemetryRepository,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const RECV_DEADLINE: Duration = Duration::from_secs(5);

/// Running relay with both listeners on ephemeral loopback ports.
pub struct Relay {
    pub udp_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub hub: SharedBroadcastHub,
    pub repository: Arc<InMemoryTelemetryRepository>,
    pub emergencies: BroadcastEmergencyPublisher,
    cancel: CancellationToken,
}

impl Relay {
    pub async fn start(decode: bool) -> Self {
        let cancel = CancellationToken::new();
        let hub = Arc::new(BroadcastHub::new(HubConfig {
            write_timeout: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(1),
        }));

        let repository = Arc::new(InMemoryTelemetryRepository::new());
        let emergencies = BroadcastEmergencyPublisher::new(16);
        let ingest = Arc::new(IngestTelemetryUseCase::new(
            Arc::clone(&repository),
            Arc::new(InMemoryTelemetryCache::new()),
            Arc::new(emergencies.clone()),
            Arc::new(PrometheusMetrics),
        ));
        let query = Arc::new(QueryTelemetryUseCase::new(Arc::clone(&repository)));

        let mut udp = UdpIngestionEndpoint::bind(
            UdpIngestionConfig {
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                ..UdpIngestionConfig::default()
            },
            Arc::clone(&hub),
        )
        .await
        .unwrap();
        let udp_addr = udp.local_addr().unwrap();

        if decode {
            let (tx, rx) = decode_channel(64);
            udp = udp.with_decode_lane(tx);
            tokio::spawn(DecodeLane::new(rx, Arc::clone(&ingest)).run(cancel.clone()));
        }

        let state = AppState {
            ingest,
            query,
            hub: Arc::clone(&hub),
            liveness: LivenessConfig {
                probe_interval: Duration::from_secs(60),
            },
            shutdown: cancel.clone(),
        };
        let http = HttpServer::bind(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            create_router(state),
            cancel.clone(),
        )
        .await
        .unwrap();
        let http_addr = http.local_addr().unwrap();

        tokio::spawn(udp.run(cancel.clone()));
        tokio::spawn(http.run());

        Self {
            udp_addr,
            http_addr,
            hub,
            repository,
            emergencies,
            cancel,
        }
    }

    /// Open a WebSocket observer and wait until the hub counts it.
    pub async fn connect(&self) -> Client {
        let before = self.hub.stats().await.registered;
        let (client, _) = connect_async(format!("ws://{}/ws", self.http_addr))
            .await
            .unwrap();
        self.wait_for_observers(before + 1).await;
        client
    }

    pub async fn wait_for_observers(&self, expected: usize) {
        tokio::time::timeout(RECV_DEADLINE, async {
            while self.hub.stats().await.registered != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("observer count never settled");
    }

    pub async fn send_datagram(&self, payload: &[u8]) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(payload, self.udp_addr).await.unwrap();
    }

    /// Issue a bare HTTP/1.1 request and return status and body.
    pub async fn http(&self, method: &str, path: &str, body: Option<&str>) -> (u16, String) {
        let mut stream = TcpStream::connect(self.http_addr).await.unwrap();
        let body = body.unwrap_or("");
        let request = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
             Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut raw = Vec::new();
        tokio::time::timeout(RECV_DEADLINE, stream.read_to_end(&mut raw))
            .await
            .unwrap()
            .unwrap();
        let raw = String::from_utf8(raw).unwrap();

        let status = raw
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap();
        let body = raw
            .split_once("\r\n\r\n")
            .map(|(_, b)| b.to_string())
            .unwrap_or_default();
        (status, body)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Next payload frame, skipping control frames.
pub async fn next_payload(client: &mut Client) -> Message {
    tokio::time::timeout(RECV_DEADLINE, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(message)) => return message,
                other => panic!("observer stream ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no payload before deadline")
}
