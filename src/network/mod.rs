//! Network module.
//!
//! Contains the Gateway (WebSocket listener) and the per-socket push session.

mod connection;
mod gateway;

pub use connection::SocketSession;
pub use gateway::Gateway;
