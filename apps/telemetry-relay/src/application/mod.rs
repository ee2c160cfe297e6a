//! Application Layer
//!
//! Orchestrates domain logic through use cases. It defines:
//!
//! - **Ports**: Interfaces for storage, caching, event delivery and metrics
//! - **Use Cases**: The ingestion pipeline and the read-side queries

pub mod ports;
pub mod use_cases;

pub use ports::*;
pub use use_cases::*;
