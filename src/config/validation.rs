//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("gc.interval must be greater than zero")]
    ZeroGcInterval,
    #[error("gc.gc_conns_after must be greater than zero")]
    ZeroConnectionTimeout,
    #[error("delivery.drain_window_ms must be greater than zero")]
    ZeroDrainWindow,
    #[error("websocket.address {0} collides with server.address")]
    ListenerCollision(std::net::SocketAddr),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.gc.interval == 0 {
        errors.push(ValidationError::ZeroGcInterval);
    }
    if config.gc.gc_conns_after == 0 {
        errors.push(ValidationError::ZeroConnectionTimeout);
    }
    if config.delivery.drain_window_ms == 0 {
        errors.push(ValidationError::ZeroDrainWindow);
    }

    if let Some(ref ws) = config.websocket
        && ws.address == config.server.address
    {
        errors.push(ValidationError::ListenerCollision(ws.address));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
