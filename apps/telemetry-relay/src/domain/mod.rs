//! Domain Layer - Telemetry value objects and observer lifecycle.
//!
//! Pure types with no I/O. Everything else in the crate depends on this
//! layer; it depends on nothing but serialization and time types.

/// Telemetry records, validation, and aggregation.
pub mod telemetry;

/// Observer connection identity and state machine.
pub mod observer;
