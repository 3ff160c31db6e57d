//! Request and response bodies for the server operations.
//!
//! Required fields are modelled as `Option` or defaulted collections so that
//! a missing field surfaces as an `InvalidRequest` from the server rather
//! than a deserialization failure.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::ChannelConfigs;
use crate::record::{MessageRecord, timestamp_format};

/// Free-form user state dictionary.
pub type UserState = serde_json::Map<String, Value>;

fn default_true() -> bool {
    true
}

/// Channel report options accepted by `connect` and `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoOptions {
    /// Include channel history.
    #[serde(default = "default_true")]
    pub include_history: bool,
    /// Include the public state of every reported user.
    #[serde(default = "default_true")]
    pub include_users: bool,
    /// Include connection ids per user.
    #[serde(default)]
    pub include_connections: bool,
    /// Channels left out of the report.
    #[serde(default)]
    pub exclude_channels: Vec<String>,
}

impl Default for InfoOptions {
    fn default() -> Self {
        Self {
            include_history: true,
            include_users: true,
            include_connections: false,
            exclude_channels: Vec::new(),
        }
    }
}

/// `connect` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Owning user.
    pub username: Option<String>,
    /// Connection id to use; generated when absent.
    #[serde(default)]
    pub conn_id: Option<String>,
    /// Channels to subscribe to.
    #[serde(default)]
    pub channels: Vec<String>,
    /// State applied only when the user is created.
    #[serde(default)]
    pub fresh_user_state: UserState,
    /// State merged into the user on every connect.
    #[serde(default)]
    pub user_state: UserState,
    /// Replaces the user's public key allow-list when present.
    #[serde(default)]
    pub state_public_keys: Option<Vec<String>>,
    /// Configuration for channels created by this call.
    #[serde(default)]
    pub channel_configs: ChannelConfigs,
    /// Report options.
    #[serde(default)]
    pub info: Option<InfoOptions>,
}

/// `connect` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// Connection id to listen on.
    pub conn_id: String,
    /// Full state of the connecting user.
    pub state: UserState,
    /// Channels requested.
    pub channels: Vec<String>,
    /// Report on the requested channels.
    pub channels_info: ChannelsInfo,
}

/// `subscribe` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Connection to attach.
    pub conn_id: Option<String>,
    /// Channels to subscribe to.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Configuration for channels created by this call.
    #[serde(default)]
    pub channel_configs: ChannelConfigs,
    /// Report options.
    #[serde(default)]
    pub info: Option<InfoOptions>,
}

/// `subscribe` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeResponse {
    /// Every channel the connection is now attached to.
    pub channels: Vec<String>,
    /// Report on those channels.
    pub channels_info: ChannelsInfo,
}

/// `unsubscribe` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    /// Connection to detach.
    pub conn_id: Option<String>,
    /// Channels to leave.
    #[serde(default)]
    pub channels: Vec<String>,
}

/// `unsubscribe` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeResponse {
    /// Channels the connection was actually removed from.
    pub channels: Vec<String>,
}

/// One entry of a `message` batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Author label.
    #[serde(default)]
    pub user: Option<String>,
    /// Target channel; takes precedence over `pm_users`.
    #[serde(default)]
    pub channel: Option<String>,
    /// Direct recipients.
    #[serde(default)]
    pub pm_users: Vec<String>,
    /// Message body.
    #[serde(default)]
    pub message: Value,
    /// Authoring time, `YYYY-MM-DDTHH:MM:SS[.ffffff]`.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl MessagePayload {
    /// Whether the payload names any recipient at all.
    pub fn has_recipients(&self) -> bool {
        self.channel.as_deref().is_some_and(|c| !c.is_empty()) || !self.pm_users.is_empty()
    }
}

/// `message` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAccepted {
    /// Messages handed to the dispatcher.
    pub accepted: usize,
}

/// `disconnect` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisconnectRequest {
    /// Connection to mark.
    pub conn_id: Option<String>,
}

/// `disconnect` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectResponse {
    /// Connection id from the request.
    pub conn_id: String,
    /// Whether a live connection was marked for collection.
    pub marked: bool,
}

/// `user_state` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStateRequest {
    /// User to update.
    pub user: Option<String>,
    /// State merged into the user.
    #[serde(default)]
    pub user_state: UserState,
    /// Replaces the public key allow-list when present.
    #[serde(default)]
    pub state_public_keys: Option<Vec<String>>,
}

/// `info` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoRequest {
    /// Channels to report; every channel when absent or empty.
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    /// Include channel history.
    #[serde(default = "default_true")]
    pub include_history: bool,
    /// Include the public state of every reported user.
    #[serde(default = "default_true")]
    pub include_users: bool,
    /// Include connection ids per user.
    #[serde(default = "default_true")]
    pub include_connections: bool,
    /// Channels left out of the report.
    #[serde(default)]
    pub exclude_channels: Vec<String>,
}

impl Default for InfoRequest {
    fn default() -> Self {
        Self {
            channels: None,
            include_history: true,
            include_users: true,
            include_connections: true,
            exclude_channels: Vec::new(),
        }
    }
}

impl InfoRequest {
    /// Report options for this request.
    pub fn options(&self) -> InfoOptions {
        InfoOptions {
            include_history: self.include_history,
            include_users: self.include_users,
            include_connections: self.include_connections,
            exclude_channels: self.exclude_channels.clone(),
        }
    }
}

/// `listen` query string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenQuery {
    /// Connection to drain.
    pub conn_id: Option<String>,
    /// JSONP callback name.
    #[serde(default)]
    pub callback: Option<String>,
}

/// Report over a set of channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelsInfo {
    /// Per-channel report keyed by channel name.
    pub channels: BTreeMap<String, ChannelInfo>,
    /// Users known to the server.
    pub unique_users: usize,
    /// Public state of the users seen in the reported channels.
    pub users: Vec<UserInfo>,
}

/// Report on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Retained messages, oldest first.
    pub history: Vec<MessageRecord>,
    /// Distinct subscribed users.
    pub total_users: usize,
    /// Subscribed connections across all users.
    pub total_connections: usize,
    /// Subscribed users.
    pub users: Vec<ChannelUser>,
    /// Last message through the channel.
    #[serde(with = "timestamp_format")]
    pub last_active: NaiveDateTime,
}

/// A user subscribed to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUser {
    /// Username.
    pub user: String,
    /// Connection ids, populated when requested.
    pub connections: Vec<String>,
}

/// Public state of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Username.
    pub user: String,
    /// Public projection of the user's state.
    pub state: UserState,
}

/// Server-wide counters for the admin report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminStats {
    /// Users held in memory, connected or not.
    pub remembered_user_count: usize,
    /// Users with at least one connection.
    pub unique_user_count: usize,
    /// Live connections.
    pub total_connections: usize,
    /// Live channels.
    pub total_channels: usize,
    /// Record copies enqueued since startup.
    pub total_messages: u64,
    /// Messages dispatched since startup.
    pub total_unique_messages: u64,
    /// Seconds since startup.
    pub uptime_seconds: u64,
}

/// Error body returned by the HTTP adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error.
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_request_tolerates_missing_fields() {
        let req: ConnectRequest = serde_json::from_str(r#"{"channels": ["a"]}"#).unwrap();
        assert!(req.username.is_none());
        assert_eq!(req.channels, vec!["a".to_string()]);
        assert!(req.info.is_none());
    }

    #[test]
    fn info_defaults_differ_by_operation() {
        let opts: InfoOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.include_history && opts.include_users);
        assert!(!opts.include_connections);

        let req: InfoRequest = serde_json::from_str("{}").unwrap();
        assert!(req.include_connections);
        assert!(req.channels.is_none());
    }

    #[test]
    fn payload_recipients() {
        let mut payload = MessagePayload::default();
        assert!(!payload.has_recipients());
        payload.channel = Some(String::new());
        assert!(!payload.has_recipients());
        payload.pm_users.push("bob".into());
        assert!(payload.has_recipients());
    }
}
