//! # channelstream-proto
//!
//! Wire types shared by the channelstream server and its clients.
//!
//! ## Contents
//!
//! - [`record`]: immutable message records fanned out to connections,
//!   including timestamp parsing for inbound payloads
//! - [`config`]: per-channel delivery policy and partial updates to it
//! - [`api`]: request and response bodies for every server operation
//!
//! ## Quick Start
//!
//! ```rust
//! use channelstream_proto::api::MessagePayload;
//! use channelstream_proto::record::MessageRecord;
//!
//! let payload: MessagePayload = serde_json::from_str(
//!     r#"{"user": "alice", "channel": "lobby", "message": {"text": "hi"}}"#,
//! ).unwrap();
//!
//! let record = MessageRecord::from_payload(&payload, chrono::Utc::now().naive_utc()).unwrap();
//! assert_eq!(record.channel.as_deref(), Some("lobby"));
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod api;
pub mod config;
pub mod error;
pub mod record;

pub use api::{ChannelInfo, ChannelsInfo, MessagePayload, UserState};
pub use config::{ChannelConfig, ChannelConfigPatch, ChannelConfigs};
pub use error::{ProtocolError, Result};
pub use record::{MessageRecord, PresenceAction, RecordKind};
