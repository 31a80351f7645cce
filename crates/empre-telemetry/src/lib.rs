use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default log level ("trace" ... "error"). Overridden by RUST_LOG.
    pub log_level: String,
    /// Per-module level overrides (e.g. "empre_store" => "debug").
    #[serde(default)]
    pub module_levels: Vec<(String, String)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            module_levels: Vec::new(),
            json: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),
    #[error("subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

fn parse_level(raw: &str) -> Result<Level, TelemetryError> {
    raw.trim()
        .parse::<Level>()
        .map_err(|_| TelemetryError::InvalidLevel(raw.to_string()))
}

/// Build the `EnvFilter` directive string for a config.
pub fn filter_directives(config: &TelemetryConfig) -> Result<String, TelemetryError> {
    let mut filter = parse_level(&config.log_level)?.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        let level = parse_level(level)?;
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    Ok(filter)
}

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let directives = filter_directives(config)?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
}
