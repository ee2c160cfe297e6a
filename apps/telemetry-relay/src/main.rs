//! Telemetry Relay Binary
//!
//! Starts the UDP ingestion endpoint and the HTTP/WebSocket server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin telemetry-relay
//! ```
//!
//! # Environment Variables
//!
//! - `TELEMETRY_UDP_ADDR`: UDP bind address (default: 0.0.0.0:8082)
//! - `TELEMETRY_HTTP_PORT`: HTTP/WebSocket port (default: 8080)
//! - `TELEMETRY_UDP_MAX_DATAGRAM`: Receive buffer size in bytes (default: 4096)
//! - `TELEMETRY_UDP_DECODE`: Decode datagrams into the ingest pipeline (default: true)
//! - `TELEMETRY_DECODE_QUEUE_CAPACITY`: Decode queue depth (default: 1024)
//! - `TELEMETRY_PROBE_INTERVAL_SECS`: Observer ping interval (default: 5)
//! - `TELEMETRY_PROBE_TIMEOUT_SECS`: Observer ping deadline (default: 5)
//! - `TELEMETRY_WRITE_TIMEOUT_SECS`: Observer write deadline (default: 5)
//! - `TELEMETRY_CACHE_TTL_SECS`: Latest-sample cache TTL (default: 600)
//! - `TELEMETRY_EMERGENCY_CHANNEL_CAPACITY`: Emergency event buffer (default: 256)
//! - `TELEMETRY_RETENTION_SECS`: Stored history per vehicle (default: 3600)
//! - `TELEMETRY_RETENTION_MAX_ROWS`: Stored samples per vehicle (default: 36000)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`: tracing export
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use telemetry_relay::application::use_cases::{IngestTelemetryUseCase, QueryTelemetryUseCase};
use telemetry_relay::infrastructure::broadcast::BroadcastHub;
use telemetry_relay::infrastructure::events::{BroadcastEmergencyPublisher, log_emergencies};
use telemetry_relay::infrastructure::http::{AppState, HttpServer, create_router};
use telemetry_relay::infrastructure::ingestion::{
    DecodeLane, UdpIngestionEndpoint, decode_channel,
};
use telemetry_relay::infrastructure::metrics::PrometheusMetrics;
use telemetry_relay::infrastructure::observability;
use telemetry_relay::infrastructure::persistence::{
    InMemoryTelemetryCache, InMemoryTelemetryRepository,
};
use telemetry_relay::{RelayConfig, init_metrics};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = observability::init().context("failed to initialize logging")?;

    tracing::info!("Starting telemetry relay");

    init_metrics().context("failed to initialize metrics")?;

    let config = RelayConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Relay path
    let hub = Arc::new(BroadcastHub::new(config.hub_config()));

    // Structured pipeline
    let repository = Arc::new(InMemoryTelemetryRepository::with_retention(
        config.retention_policy(),
    ));
    let cache = Arc::new(InMemoryTelemetryCache::new());
    let publisher = Arc::new(BroadcastEmergencyPublisher::new(
        config.pipeline.emergency_channel_capacity,
    ));
    let emergencies = publisher.subscribe();

    let ingest = Arc::new(
        IngestTelemetryUseCase::new(
            Arc::clone(&repository),
            cache,
            publisher,
            Arc::new(PrometheusMetrics),
        )
        .with_cache_ttl(config.pipeline.cache_ttl),
    );
    let query = Arc::new(QueryTelemetryUseCase::new(repository));

    // Bind both listeners before spawning anything so a taken port is fatal.
    let mut udp = UdpIngestionEndpoint::bind(config.udp_config(), Arc::clone(&hub))
        .await
        .context("failed to bind UDP endpoint")?;

    let state = AppState {
        ingest: Arc::clone(&ingest),
        query,
        hub: Arc::clone(&hub),
        liveness: config.liveness_config(),
        shutdown: shutdown_token.clone(),
    };
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.server.http_port));
    let http = HttpServer::bind(http_addr, create_router(state), shutdown_token.clone())
        .await
        .context("failed to bind HTTP server")?;

    if config.ingestion.decode_enabled {
        let (decode_tx, decode_rx) = decode_channel(config.ingestion.decode_queue_capacity);
        udp = udp.with_decode_lane(decode_tx);
        let lane = DecodeLane::new(decode_rx, ingest);
        tokio::spawn(lane.run(shutdown_token.clone()));
    }

    tokio::spawn(log_emergencies(emergencies, shutdown_token.clone()));

    let udp_task = tokio::spawn(udp.run(shutdown_token.clone()));

    let http_task = tokio::spawn(async move {
        if let Err(e) = http.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Telemetry relay ready");

    await_shutdown(shutdown_token).await;

    hub.close_all().await;
    join_task("UDP ingestion", udp_task).await;
    join_task("HTTP server", http_task).await;

    tracing::info!("Telemetry relay stopped");
    Ok(())
}

/// Load the nearest `.env`, searching the working directory then its ancestors.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let Ok(cwd) = std::env::current_dir() else {
        return;
    };
    for dir in cwd.ancestors().skip(1) {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
            return;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        udp_addr = %config.server.udp_addr,
        http_port = config.server.http_port,
        decode_enabled = config.ingestion.decode_enabled,
        "Configuration loaded"
    );
    tracing::debug!(
        max_datagram = config.ingestion.max_datagram,
        probe_interval_secs = config.observers.probe_interval.as_secs(),
        probe_timeout_secs = config.observers.probe_timeout.as_secs(),
        write_timeout_secs = config.observers.write_timeout.as_secs(),
        cache_ttl_secs = config.pipeline.cache_ttl.as_secs(),
        "Observer and pipeline settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}

/// Wait for a background task, logging a panic or cancellation.
/// Returns whether the task finished cleanly.
async fn join_task(name: &str, task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(task = name, error = %e, "Background task failed");
            false
        }
    }
}
