//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `EMPRE_*` environment variable overrides
//! 4. Validate
//!
//! Objects merge per key, arrays and primitives are replaced, nulls in the
//! file are skipped.

use std::path::{Path, PathBuf};

use empre_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ServerConfig, SlowConsumerPolicy};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings io: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid setting {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path. `:memory:` opens a private in-memory database.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: empre_dir().join("empre.db").to_string_lossy().into_owned(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: TelemetryConfig,
}

fn empre_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".empre")
}

/// Default settings file (`~/.empre/settings.json`).
pub fn settings_path() -> PathBuf {
    empre_dir().join("settings.json")
}

/// Load from `path` (or the default location) with env overrides.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let default_path = settings_path();
    let mut settings = load_file(path.unwrap_or(&default_path))?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    validate(&settings)?;
    Ok(settings)
}

/// Defaults merged with the file at `path`. A missing file yields defaults;
/// an unreadable or invalid one is an error.
pub fn load_file(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `EMPRE_*` overrides read through `lookup`. Values that fail to
/// parse are logged and ignored.
pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = read("EMPRE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("EMPRE_PORT") {
        match parse_range::<u16>(&v, 0, u16::MAX) {
            Some(port) => settings.server.port = port,
            None => ignored("EMPRE_PORT", &v),
        }
    }
    if let Some(v) = read("EMPRE_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = read("EMPRE_LOG_LEVEL") {
        settings.logging.log_level = v;
    }
    if let Some(v) = read("EMPRE_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => ignored("EMPRE_LOG_JSON", &v),
        }
    }
    if let Some(v) = read("EMPRE_MAX_SEND_QUEUE") {
        match parse_range::<usize>(&v, 1, 1_000_000) {
            Some(n) => settings.server.max_send_queue = n,
            None => ignored("EMPRE_MAX_SEND_QUEUE", &v),
        }
    }
    if let Some(v) = read("EMPRE_SLOW_CONSUMER") {
        match v.parse::<SlowConsumerPolicy>() {
            Ok(policy) => settings.server.slow_consumer = policy,
            Err(_) => ignored("EMPRE_SLOW_CONSUMER", &v),
        }
    }
}

fn ignored(key: &str, value: &str) {
    warn!(key, value, "invalid env var, ignoring");
}

/// Accepts `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_range<T: std::str::FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Reject combinations the server cannot run with.
pub fn validate(settings: &Settings) -> Result<()> {
    let server = &settings.server;
    let invalid = |key: &str, reason: String| SettingsError::InvalidValue {
        key: key.into(),
        reason,
    };
    if server.max_send_queue == 0 {
        return Err(invalid("server.max_send_queue", "must be at least 1".into()));
    }
    if server.hub_queue == 0 {
        return Err(invalid("server.hub_queue", "must be at least 1".into()));
    }
    if server.heartbeat_interval_secs == 0 {
        return Err(invalid("server.heartbeat_interval_secs", "must be at least 1".into()));
    }
    if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
        return Err(invalid(
            "server.heartbeat_timeout_secs",
            format!(
                "{} is shorter than the heartbeat interval {}",
                server.heartbeat_timeout_secs, server.heartbeat_interval_secs
            ),
        ));
    }
    if settings.database.path.trim().is_empty() {
        return Err(invalid("database.path", "must not be empty".into()));
    }
    empre_telemetry::filter_directives(&settings.logging)
        .map_err(|e| invalid("logging.log_level", e.to_string()))?;
    Ok(())
}
