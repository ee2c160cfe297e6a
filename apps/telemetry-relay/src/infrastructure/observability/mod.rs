//! Logging and Tracing Setup
//!
//! Installs the global `tracing` subscriber: a fmt layer filtered by
//! `RUST_LOG` (defaulting to `telemetry_relay=info`), plus an optional
//! OpenTelemetry OTLP exporter.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: Set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: vehicle-telemetry-relay)

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "vehicle-telemetry-relay";

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

const DEFAULT_DIRECTIVES: [&str; 3] = ["telemetry_relay=info", "hyper=warn", "h2=warn"];

/// Observability setup failures.
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    /// Filter directive did not parse.
    #[error("invalid log directive {directive:?}: {message}")]
    InvalidDirective {
        /// Offending directive.
        directive: String,
        /// Parser message.
        message: String,
    },

    /// OTLP exporter could not be built.
    #[error("failed to create OTLP exporter: {0}")]
    Exporter(String),

    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are exported.
    #[must_use]
    pub const fn exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Whether spans are exported over OTLP.
    pub otel_enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otel_enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl ObservabilityConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            otel_enabled: lookup("OTEL_ENABLED")
                .is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1")),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.otlp_endpoint),
            service_name: lookup("OTEL_SERVICE_NAME")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.service_name),
        }
    }
}

/// Initialize observability with configuration from the environment.
///
/// Keep the returned guard alive for the lifetime of the process.
///
/// # Errors
///
/// See [`init_with_config`].
pub fn init() -> Result<TelemetryGuard, ObservabilityError> {
    init_with_config(&ObservabilityConfig::from_env())
}

/// Initialize observability with explicit configuration.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a global subscriber
/// is already installed.
pub fn init_with_config(config: &ObservabilityConfig) -> Result<TelemetryGuard, ObservabilityError> {
    let env_filter = default_filter()?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if !config.otel_enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| ObservabilityError::Subscriber(e.to_string()))?;

        return Ok(TelemetryGuard {
            tracer_provider: None,
        });
    }

    let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| ObservabilityError::Exporter(e.to_string()))?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();

    let tracer = tracer_provider.tracer(config.service_name.clone());
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| ObservabilityError::Subscriber(e.to_string()))?;

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    })
}

fn default_filter() -> Result<EnvFilter, ObservabilityError> {
    DEFAULT_DIRECTIVES
        .iter()
        .try_fold(EnvFilter::from_default_env(), |filter, directive| {
            directive
                .parse::<Directive>()
                .map(|d| filter.add_directive(d))
                .map_err(|e| ObservabilityError::InvalidDirective {
                    directive: (*directive).to_string(),
                    message: e.to_string(),
                })
        })
}
