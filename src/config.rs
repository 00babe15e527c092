//! Configuration module
//!
//! The gateway reads a TOML file once at startup
//! (`~/.config/ocpp-gateway/config.toml` unless `OCPP_CONFIG` points
//! elsewhere) and then applies environment overrides. Every key has a
//! default, so a missing file yields a working configuration.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! ws_port = 9000
//! api_port = 8080
//!
//! [heartbeat]
//! timeout_ms = 300000
//!
//! [calls]
//! timeout_ms = 30000
//! max_in_flight = 1
//! overflow_policy = "queue"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable overriding `heartbeat.timeout_ms`.
pub const HEARTBEAT_TIMEOUT_ENV: &str = "HEARTBEAT_TIMEOUT_MS";
/// Environment variable pointing at the configuration file.
pub const CONFIG_PATH_ENV: &str = "OCPP_CONFIG";

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-gateway")
        .join("config.toml")
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Process-wide configuration, immutable after startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub heartbeat: HeartbeatConfig,
    pub calls: CallConfig,
    pub connection: ConnectionConfig,
    pub boot: BootConfig,
    pub billing: BillingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub ws_port: u16,
    pub api_port: u16,
    /// Seconds allowed for graceful shutdown.
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            ws_port: 9000,
            api_port: 8080,
            shutdown_timeout: 10,
        }
    }
}

impl ServerConfig {
    pub fn ws_address(&self) -> String {
        format!("{}:{}", self.host, self.ws_port)
    }

    pub fn api_address(&self) -> String {
        format!("{}:{}", self.host, self.api_port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Silence after which a connected charge point is flagged offline.
    pub timeout_ms: u64,
    /// Scan period of the heartbeat monitor; `timeout_ms / 5` when unset.
    pub scan_interval_ms: Option<u64>,
    /// Heartbeat interval handed to charge points in BootNotification.
    pub interval_secs: i32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 300_000,
            scan_interval_ms: None,
            interval_secs: 60,
        }
    }
}

impl HeartbeatConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.unwrap_or(self.timeout_ms / 5).max(1))
    }
}

/// What to do with an outgoing call when `max_in_flight` calls are
/// already outstanding on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    #[default]
    Queue,
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub timeout_ms: u64,
    pub max_in_flight: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_in_flight: 1,
            overflow_policy: OverflowPolicy::Queue,
        }
    }
}

impl CallConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Consecutive malformed frames tolerated before the socket is closed.
    pub malformed_frame_budget: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            malformed_frame_budget: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Charge points accepted by BootNotification. Empty accepts everyone.
    pub allowed_charge_points: Vec<String>,
}

impl BootConfig {
    pub fn accepts(&self, charge_point_id: &str) -> bool {
        self.allowed_charge_points.is_empty()
            || self
                .allowed_charge_points
                .iter()
                .any(|id| id == charge_point_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub price_per_kwh: Decimal,
    pub currency: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            price_per_kwh: Decimal::new(25, 2),
            currency: "EUR".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Resolve the file location from the environment, load it, apply
    /// environment overrides and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());
        let mut config = Self::load(&path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (`std::env::var` in production).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(HEARTBEAT_TIMEOUT_ENV) {
            self.heartbeat.timeout_ms =
                raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    name: HEARTBEAT_TIMEOUT_ENV,
                    value: raw.clone(),
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.timeout_ms must be positive".into(),
            ));
        }
        if self.heartbeat.scan_interval() >= self.heartbeat.timeout() {
            return Err(ConfigError::Invalid(
                "heartbeat.scan_interval_ms must be shorter than heartbeat.timeout_ms".into(),
            ));
        }
        if self.calls.timeout_ms == 0 {
            return Err(ConfigError::Invalid("calls.timeout_ms must be positive".into()));
        }
        if self.calls.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "calls.max_in_flight must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
