#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::default_trait_access
    )
)]

//! Telemetry Relay - Vehicle Telemetry Fan-out
//!
//! Receives vehicle telemetry datagrams on a UDP port and relays each one,
//! byte for byte, to every connected WebSocket observer. Alongside the relay
//! path, structured samples can be decoded, validated, stored and checked
//! for emergency conditions.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `telemetry`: Telemetry records, validation, aggregation
//!   - `observer`: Observer identity and connection lifecycle
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Storage, cache, emergency publishing, metrics
//!   - `use_cases`: Ingest pipeline and read-side queries
//!
//! - **Infrastructure**: Adapters and transports
//!   - `ingestion`: UDP receive loop, payload codec, decode lane
//!   - `broadcast`: Observer registry, fan-out and liveness probing
//!   - `websocket`: Bridge between an upgraded socket and the hub
//!   - `http`: REST API, health and metrics
//!   - `persistence`, `events`, `metrics`, `config`, `observability`
//!
//! # Data Flow
//!
//! ```text
//!                        ┌──────────────┐
//! Vehicle ──UDP──► Ingestion ──bytes──►│ Broadcast Hub│──► Observer 1
//!                   │                  │              │──► Observer 2
//!                   │ (optional copy)  └──────────────┘──► Observer N
//!                   ▼
//!              Decode Lane ──► Ingest Use Case ──► Repository / Cache / Emergencies
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and transports.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::observer::{ObserverId, ObserverLifecycle, ObserverState};
pub use domain::telemetry::{AggregatedTelemetry, Location, TelemetryError, TelemetryRecord};

// Use cases
pub use application::use_cases::{
    IngestError, IngestReport, IngestTelemetryUseCase, QueryError, QueryTelemetryUseCase,
    StageOutcome,
};

// Infrastructure
pub use infrastructure::broadcast::{BroadcastHub, HubConfig, LivenessConfig, SharedBroadcastHub};
pub use infrastructure::config::{ConfigError, RelayConfig};
pub use infrastructure::ingestion::{UdpIngestionConfig, UdpIngestionEndpoint};
pub use infrastructure::metrics::{get_metrics_handle, init_metrics};
