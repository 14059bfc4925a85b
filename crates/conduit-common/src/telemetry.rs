//! Tracing subscriber initialization
//!
//! JSON lines by default, carrying the `conduit`, `group` and `holder`
//! fields the coordinator attaches to its events.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info,conduit=debug,kube=info,tower=warn,hyper=warn";

/// Telemetry setup failure
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber is already installed, or the filter is invalid
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output encoding of log events
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogOutput {
    /// One JSON object per line
    #[default]
    Json,
    /// Human readable lines
    Plain,
}

/// Telemetry settings
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name logged once at startup
    pub service_name: String,
    /// Event encoding
    pub output: LogOutput,
    /// Filter directives overriding `RUST_LOG` and the default
    pub filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "conduit-operator".to_string(),
            output: LogOutput::Json,
            filter: None,
        }
    }
}

fn env_filter(explicit: Option<&str>) -> Result<EnvFilter, TelemetryError> {
    match explicit {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| TelemetryError::SubscriberInit(format!("invalid filter: {e}"))),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))),
    }
}

fn fmt_layer(output: LogOutput) -> Box<dyn Layer<Registry> + Send + Sync> {
    match output {
        LogOutput::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        LogOutput::Plain => tracing_subscriber::fmt::layer().with_target(true).boxed(),
    }
}

/// Install the global tracing subscriber
///
/// Fails if a subscriber has already been installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config.filter.as_deref())?;

    tracing_subscriber::registry()
        .with(fmt_layer(config.output))
        .with(filter)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    tracing::info!(service = %config.service_name, output = ?config.output, "telemetry initialized");
    Ok(())
}
