//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (COURIER_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use courier_core::fanout::{FanoutConfig, NotifyRetryPolicy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Fanout behavior.
    #[serde(default)]
    pub fanout: FanoutSettings,

    /// Connection handshake and keepalive.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Periodic maintenance tasks.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file path.
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Fanout behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutSettings {
    /// Maximum message length in characters, after trimming.
    #[serde(default = "default_max_content_len")]
    pub max_content_len: usize,

    /// Bound on validate + authorize + persist, in milliseconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Whether the sender's other devices receive a live echo.
    #[serde(default)]
    pub echo_to_sender_devices: bool,

    /// Notification batch write attempts, including the first.
    #[serde(default = "default_notify_attempts")]
    pub notify_retry_attempts: u32,

    /// Delay between notification batch write attempts, in milliseconds.
    #[serde(default = "default_notify_backoff")]
    pub notify_retry_backoff_ms: u64,
}

/// Handshake and keepalive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Keepalive interval advertised to clients, in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// How long a fresh connection may take to authenticate, in
    /// milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

/// Periodic maintenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Expired-session reaper interval, in seconds.
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,

    /// Stale-connection reconciler interval, in seconds.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
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
    std::env::var("COURIER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("COURIER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_db_path() -> String {
    std::env::var("COURIER_DB_PATH").unwrap_or_else(|_| "courier.db".to_string())
}

fn default_true() -> bool {
    true
}

fn default_max_content_len() -> usize {
    4096
}

fn default_send_timeout() -> u64 {
    10_000
}

fn default_notify_attempts() -> u32 {
    3
}

fn default_notify_backoff() -> u64 {
    200
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_handshake_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_reap_interval() -> u64 {
    3600 // hourly
}

fn default_reconcile_interval() -> u64 {
    1800 // every 30 minutes
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            websocket_path: default_ws_path(),
            database: DatabaseConfig::default(),
            fanout: FanoutSettings::default(),
            heartbeat: HeartbeatConfig::default(),
            maintenance: MaintenanceConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            max_content_len: default_max_content_len(),
            send_timeout_ms: default_send_timeout(),
            echo_to_sender_devices: false,
            notify_retry_attempts: default_notify_attempts(),
            notify_retry_backoff_ms: default_notify_backoff(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            reap_interval_secs: default_reap_interval(),
            reconcile_interval_secs: default_reconcile_interval(),
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
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "courier.toml",
            "/etc/courier/courier.toml",
            "~/.config/courier/courier.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
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
    /// Returns an error if host and port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// The router configuration derived from the fanout section.
    #[must_use]
    pub fn fanout_config(&self) -> FanoutConfig {
        FanoutConfig {
            max_content_len: self.fanout.max_content_len,
            send_timeout: Duration::from_millis(self.fanout.send_timeout_ms),
            echo_to_sender_devices: self.fanout.echo_to_sender_devices,
            notify_retry: NotifyRetryPolicy {
                attempts: self.fanout.notify_retry_attempts,
                backoff: Duration::from_millis(self.fanout.notify_retry_backoff_ms),
            },
        }
    }
}
