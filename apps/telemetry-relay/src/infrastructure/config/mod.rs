//! Configuration Module
//!
//! Environment-driven configuration for the relay.

mod settings;

pub use settings::{
    ConfigError, IngestionSettings, ObserverSettings, PipelineSettings, RelayConfig,
    ServerSettings,
};
