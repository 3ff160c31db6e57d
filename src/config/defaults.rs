//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

use std::net::SocketAddr;

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Listener Defaults
// =============================================================================

pub fn default_http_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

// =============================================================================
// Garbage Collection Defaults
// =============================================================================

/// Seconds a connection may stay idle before it is reaped.
pub fn default_gc_conns_after() -> u64 {
    30
}

/// Seconds an empty channel or connection-less user is kept (72 hours).
pub fn default_gc_channels_after() -> u64 {
    3600 * 72
}

/// Seconds between sweeps.
pub fn default_gc_interval() -> u64 {
    5
}

// =============================================================================
// Delivery Defaults
// =============================================================================

/// Seconds a poll waits for its first record.
pub fn default_wake_connections_after() -> u64 {
    5
}

/// Milliseconds per drain attempt once a poll has woken up.
pub fn default_drain_window_ms() -> u64 {
    250
}
