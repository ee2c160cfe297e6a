//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.
//! Every variable is optional; unset or unparsable values fall back to the
//! default, except the UDP address which must parse when given.

use std::net::SocketAddr;
use std::time::Duration;

use crate::infrastructure::broadcast::{HubConfig, LivenessConfig};
use crate::infrastructure::ingestion::{DEFAULT_MAX_DATAGRAM, UdpIngestionConfig};
use crate::infrastructure::persistence::{
    DEFAULT_RETENTION_MAX_ROWS, DEFAULT_RETENTION_WINDOW, RetentionPolicy,
};

/// Listener settings.
#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    /// UDP ingestion address.
    pub udp_addr: SocketAddr,
    /// HTTP and WebSocket port.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            udp_addr: SocketAddr::from(([0, 0, 0, 0], 8082)),
            http_port: 8080,
        }
    }
}

/// Datagram ingestion settings.
#[derive(Debug, Clone, Copy)]
pub struct IngestionSettings {
    /// Receive buffer size; longer datagrams are truncated.
    pub max_datagram: usize,
    /// Whether datagrams are also decoded into the ingestion pipeline.
    pub decode_enabled: bool,
    /// Bounded decode queue length.
    pub decode_queue_capacity: usize,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            max_datagram: DEFAULT_MAX_DATAGRAM,
            decode_enabled: true,
            decode_queue_capacity: 1024,
        }
    }
}

/// Observer connection settings.
#[derive(Debug, Clone, Copy)]
pub struct ObserverSettings {
    /// Interval between liveness probes.
    pub probe_interval: Duration,
    /// Deadline for one probe.
    pub probe_timeout: Duration,
    /// Deadline for one payload write.
    pub write_timeout: Duration,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Ingestion pipeline settings.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Expiry of the latest-value cache entry.
    pub cache_ttl: Duration,
    /// Buffered emergency events per subscriber.
    pub emergency_channel_capacity: usize,
    /// Stored history per vehicle, measured back from its newest sample.
    pub retention_window: Duration,
    /// Stored samples per vehicle.
    pub retention_max_rows: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(600),
            emergency_channel_capacity: 256,
            retention_window: DEFAULT_RETENTION_WINDOW,
            retention_max_rows: DEFAULT_RETENTION_MAX_ROWS,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayConfig {
    /// Listener settings.
    pub server: ServerSettings,
    /// Datagram ingestion settings.
    pub ingestion: IngestionSettings,
    /// Observer connection settings.
    pub observers: ObserverSettings,
    /// Ingestion pipeline settings.
    pub pipeline: PipelineSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `TELEMETRY_UDP_ADDR` is set but is not a socket
    /// address.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`RelayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let udp_addr = match env.get("TELEMETRY_UDP_ADDR") {
            None => defaults.server.udp_addr,
            Some(value) if value.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("TELEMETRY_UDP_ADDR".to_string()));
            }
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "TELEMETRY_UDP_ADDR".to_string(),
                    value,
                })?,
        };

        let server = ServerSettings {
            udp_addr,
            http_port: env.parse_or("TELEMETRY_HTTP_PORT", defaults.server.http_port),
        };

        let ingestion = IngestionSettings {
            max_datagram: env
                .parse_or("TELEMETRY_UDP_MAX_DATAGRAM", defaults.ingestion.max_datagram)
                .max(1),
            decode_enabled: env.bool_or("TELEMETRY_UDP_DECODE", defaults.ingestion.decode_enabled),
            decode_queue_capacity: env
                .parse_or(
                    "TELEMETRY_DECODE_QUEUE_CAPACITY",
                    defaults.ingestion.decode_queue_capacity,
                )
                .max(1),
        };

        let observers = ObserverSettings {
            probe_interval: env.secs_or(
                "TELEMETRY_PROBE_INTERVAL_SECS",
                defaults.observers.probe_interval,
            ),
            probe_timeout: env.secs_or(
                "TELEMETRY_PROBE_TIMEOUT_SECS",
                defaults.observers.probe_timeout,
            ),
            write_timeout: env.secs_or(
                "TELEMETRY_WRITE_TIMEOUT_SECS",
                defaults.observers.write_timeout,
            ),
        };

        let pipeline = PipelineSettings {
            cache_ttl: env.secs_or("TELEMETRY_CACHE_TTL_SECS", defaults.pipeline.cache_ttl),
            emergency_channel_capacity: env
                .parse_or(
                    "TELEMETRY_EMERGENCY_CHANNEL_CAPACITY",
                    defaults.pipeline.emergency_channel_capacity,
                )
                .max(1),
            retention_window: env
                .secs_or("TELEMETRY_RETENTION_SECS", defaults.pipeline.retention_window),
            retention_max_rows: env
                .parse_or("TELEMETRY_RETENTION_MAX_ROWS", defaults.pipeline.retention_max_rows)
                .max(1),
        };

        Ok(Self {
            server,
            ingestion,
            observers,
            pipeline,
        })
    }

    /// Broadcast hub deadlines.
    #[must_use]
    pub const fn hub_config(&self) -> HubConfig {
        HubConfig {
            write_timeout: self.observers.write_timeout,
            probe_timeout: self.observers.probe_timeout,
        }
    }

    /// Liveness probe settings.
    #[must_use]
    pub const fn liveness_config(&self) -> LivenessConfig {
        LivenessConfig {
            probe_interval: self.observers.probe_interval,
        }
    }

    /// History bounds for the telemetry repository.
    #[must_use]
    pub const fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: self.pipeline.retention_window,
            max_rows_per_vehicle: self.pipeline.retention_max_rows,
        }
    }

    /// UDP endpoint settings.
    #[must_use]
    pub const fn udp_config(&self) -> UdpIngestionConfig {
        UdpIngestionConfig {
            bind_addr: self.server.udp_addr,
            max_datagram: self.ingestion.max_datagram,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs_or(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map_or(default, Duration::from_secs)
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }
}
