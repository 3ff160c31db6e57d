//! Network listener configuration.

use serde::Deserialize;
use std::net::SocketAddr;

/// WebSocket listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Address to bind to (e.g., "0.0.0.0:8001").
    pub address: SocketAddr,
    /// Allowed Origin values; empty allows every origin.
    #[serde(default)]
    pub allow_origins: Vec<String>,
}
