//! channelstream - real-time presence and message fan-out server.
//!
//! Clients register connections over HTTP, subscribe them to channels and
//! receive messages by long-polling or over a WebSocket.

mod config;
mod error;
mod handlers;
mod http;
mod metrics;
mod network;
mod services;
mod state;
mod telemetry;

use crate::config::{Config, validate};
use crate::handlers::Api;
use crate::network::Gateway;
use crate::services::spawn_reapers;
use crate::state::{Store, SystemClock};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn load_config() -> anyhow::Result<Config> {
    let (path, explicit) = match std::env::args().nth(1) {
        Some(path) => (path, true),
        None => (DEFAULT_CONFIG_PATH.to_string(), false),
    };
    if !explicit && !Path::new(&path).exists() {
        info!(path = %path, "No config file found, using defaults");
        return Ok(Config::default());
    }

    let config = Config::load(&path).map_err(|e| {
        error!(path = %path, error = %e, "Failed to load config");
        e
    })?;
    info!(path = %path, "Loaded config");
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = load_config()?;
    if let Err(errors) = validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("refusing to start with {} configuration error(s)", errors.len());
    }

    info!(
        address = %config.server.address,
        websocket = ?config.websocket.as_ref().map(|ws| ws.address),
        "Starting channelstream"
    );

    if config.server.metrics {
        metrics::init();
    }

    let store = Arc::new(Store::new(Arc::new(SystemClock)));
    let _reapers = spawn_reapers(Arc::clone(&store), &config.gc);

    if let Some(ws_config) = &config.websocket {
        let gateway = Gateway::bind(ws_config, Arc::clone(&store), config.delivery.wake_after()).await?;
        tokio::spawn(async move {
            if let Err(e) = gateway.run().await {
                error!(error = %e, "WebSocket gateway stopped");
            }
        });
    }

    let api = Arc::new(Api::new(store, &config.delivery));
    let app = http::router(api, config.server.metrics);
    http::run_http_server(config.server.address, app).await
}
