//! Core configuration types and loading.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::defaults::{
    default_drain_window_ms, default_gc_channels_after, default_gc_conns_after,
    default_gc_interval, default_http_address, default_true, default_wake_connections_after,
};
use super::listen::WebSocketConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP API listener.
    #[serde(default)]
    pub server: ServerConfig,
    /// Optional WebSocket push listener.
    pub websocket: Option<WebSocketConfig>,
    /// Garbage collection thresholds.
    #[serde(default)]
    pub gc: GcConfig,
    /// Long-poll delivery timing.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// HTTP API listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:8000").
    #[serde(default = "default_http_address")]
    pub address: SocketAddr,
    /// Serve Prometheus metrics on `/metrics`.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_http_address(),
            metrics: true,
        }
    }
}

/// Garbage collection configuration.
///
/// Two sweeps run every `interval` seconds:
/// - connections idle longer than `gc_conns_after` (or explicitly
///   disconnected) are removed
/// - empty, non-salvageable channels and connection-less users idle longer
///   than `gc_channels_after` are removed
#[derive(Debug, Clone, Deserialize)]
pub struct GcConfig {
    /// Seconds of inactivity before a connection is reaped (default: 30).
    #[serde(default = "default_gc_conns_after")]
    pub gc_conns_after: u64,
    /// Seconds of inactivity before an empty channel or user is reaped (default: 72h).
    #[serde(default = "default_gc_channels_after")]
    pub gc_channels_after: u64,
    /// Seconds between sweeps (default: 5).
    #[serde(default = "default_gc_interval")]
    pub interval: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            gc_conns_after: default_gc_conns_after(),
            gc_channels_after: default_gc_channels_after(),
            interval: default_gc_interval(),
        }
    }
}

impl GcConfig {
    pub fn conns_after(&self) -> Duration {
        Duration::from_secs(self.gc_conns_after)
    }

    pub fn channels_after(&self) -> Duration {
        Duration::from_secs(self.gc_channels_after)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

/// Long-poll delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Seconds a poll waits for its first record before returning empty (default: 5).
    #[serde(default = "default_wake_connections_after")]
    pub wake_connections_after: u64,
    /// Milliseconds per drain attempt after the first record (default: 250).
    #[serde(default = "default_drain_window_ms")]
    pub drain_window_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            wake_connections_after: default_wake_connections_after(),
            drain_window_ms: default_drain_window_ms(),
        }
    }
}

impl DeliveryConfig {
    pub fn wake_after(&self) -> Duration {
        Duration::from_secs(self.wake_connections_after)
    }

    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_window_ms)
    }
}
