//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file (`murmur.toml`, `/etc/murmur/murmur.toml`, `~/.config/murmur/murmur.toml`)
//! - Environment variables (`MURMUR_PORT`, `MURMUR_HISTORY__DEFAULT_LIMIT`, ...)
//! - An explicit `--config <path>` argument

use anyhow::{Context, Result};
use murmur_core::CoordinatorConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Default configuration file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "murmur.toml",
    "/etc/murmur/murmur.toml",
    "~/.config/murmur/murmur.toml",
];

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "MURMUR";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Conversation history settings.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of simultaneous WebSocket connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum WebSocket frame size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Maximum message body length in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

/// Conversation history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Messages returned when a request gives no limit.
    #[serde(default = "default_history_limit")]
    pub default_limit: usize,

    /// Messages kept per conversation; unset keeps everything.
    #[serde(default)]
    pub max_retained_per_conversation: Option<usize>,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_frame_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_message_length() -> usize {
    murmur_core::coordinator::DEFAULT_MAX_MESSAGE_LENGTH
}

fn default_history_limit() -> usize {
    murmur_core::DEFAULT_HISTORY_LIMIT
}

fn default_heartbeat_interval() -> u64 {
    25_000 // 25 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            history: HistoryConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
            max_message_length: default_max_message_length(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            max_retained_per_conversation: None,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first default file found, with
    /// `MURMUR_*` environment variables layered on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        Self::load_with_env_prefix(ENV_PREFIX)
    }

    fn load_with_env_prefix(prefix: &str) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            let path = Path::new(expanded.as_ref());
            if path.exists() {
                builder = builder.add_source(::config::File::from(path));
                break;
            }
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Coordinator settings derived from this configuration.
    #[must_use]
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            default_history_limit: self.history.default_limit.max(1),
            max_retained_per_conversation: self.history.max_retained_per_conversation,
            max_message_length: self.limits.max_message_length,
        }
    }
}
