//! Infrastructure Layer
//!
//! Adapters for the ports defined in the application layer, plus the
//! transports that drive the relay:
//!
//! - **Driver Adapters (Inbound)**
//!   - `ingestion/`: UDP datagram receive loop and decode lane
//!   - `http/`: REST endpoints and the `/ws` upgrade
//!   - `websocket/`: observer connection bridge
//!
//! - **Driven Adapters (Outbound)**
//!   - `persistence/`: in-memory storage and cache
//!   - `events/`: in-process emergency event channel
//!   - `metrics/`: Prometheus recorder and metrics port adapter
//!
//! - **Core Transport**
//!   - `broadcast/`: observer registry and fan-out
//!
//! - **Cross-cutting**
//!   - `config/`: environment configuration
//!   - `observability/`: logging and tracing setup

pub mod broadcast;
pub mod config;
pub mod events;
pub mod http;
pub mod ingestion;
pub mod metrics;
pub mod observability;
pub mod persistence;
pub mod websocket;
