//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, GcConfig, DeliveryConfig)
//! - [`listen`]: WebSocket listener configuration
//! - [`defaults`]: serde default value functions
//! - [`validation`]: startup checks

mod defaults;
mod listen;
mod types;
mod validation;

pub use listen::WebSocketConfig;
pub use types::{Config, DeliveryConfig, GcConfig};
pub use validation::validate;
