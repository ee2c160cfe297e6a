//! Persistence Adapters
//!
//! In-memory implementations of the storage and cache ports. Stored history
//! is bounded per vehicle by a retention policy.

mod in_memory;

pub use in_memory::{
    DEFAULT_RETENTION_MAX_ROWS, DEFAULT_RETENTION_WINDOW, InMemoryTelemetryCache,
    InMemoryTelemetryRepository, RetentionPolicy,
};
