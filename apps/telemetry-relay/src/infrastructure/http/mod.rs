//! HTTP/WebSocket API adapter.
//!
//! Inbound adapter serving observers and the telemetry REST endpoints.

mod controller;
mod request;
mod response;
mod server;

pub use controller::{AppState, create_router};
pub use request::*;
pub use response::*;
pub use server::{HttpServer, HttpServerError};
