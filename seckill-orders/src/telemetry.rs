//! Tracing subscriber initialization.
//!
//! Libraries in this workspace only emit `tracing` events. Binaries call
//! [`init_tracing`] once at startup to decide where they go.

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "seckill_orders=info,seckill_storage=info,warn";

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("SECKILL_SERVICE_NAME")
                .unwrap_or_else(|_| "seckill".to_string()),
            json: std::env::var("SECKILL_LOG_JSON")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
            default_filter: std::env::var("SECKILL_LOG_FILTER")
                .unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to init subscriber: {0}")]
    Subscriber(String),
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter.as_str()));

    let json_layer = config.json.then(|| fmt::layer().json());
    let text_layer = (!config.json).then(fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    tracing::info!(
        service_name = config.service_name,
        json = config.json,
        "Telemetry initialized"
    );

    Ok(())
}
