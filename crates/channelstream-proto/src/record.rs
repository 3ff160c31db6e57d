//! Message records.
//!
//! A [`MessageRecord`] is built once per inbound message (or presence
//! change) and then shared, unchanged, by every connection it is fanned out
//! to and by the channel history.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::{MessagePayload, UserState};
use crate::error::{ProtocolError, Result};

/// Layout used when a record timestamp is serialized.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

const FRACTIONAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const SECONDS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse an inbound timestamp.
///
/// Accepts `YYYY-MM-DDTHH:MM:SS.ffffff` and `YYYY-MM-DDTHH:MM:SS`; the
/// presence of a `.` selects the fractional layout.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let format = if raw.contains('.') {
        FRACTIONAL_FORMAT
    } else {
        SECONDS_FORMAT
    };
    NaiveDateTime::parse_from_str(raw, format).map_err(|source| {
        ProtocolError::InvalidTimestamp {
            value: raw.to_string(),
            source,
        }
    })
}

/// Generate a record identifier (32 lowercase hex digits, no dashes).
pub fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Kind of record carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// A user-authored message.
    Message,
    /// A synthetic join/part notification.
    Presence,
}

/// Presence transitions announced on channels with `notify_presence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    /// First connection of a user attached to the channel.
    Joined,
    /// Last connection of a user left the channel.
    Parted,
}

/// An immutable record delivered to connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique record id.
    pub uuid: String,
    /// Record kind.
    #[serde(rename = "type")]
    pub kind: RecordKind,
    /// Author label (or the user whose presence changed).
    pub user: Option<String>,
    /// Channel the record was published to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Direct recipients for private messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pm_users: Vec<String>,
    /// Arbitrary message body.
    pub message: Value,
    /// Time the message was authored.
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
}

impl MessageRecord {
    /// Build a message record from an inbound payload.
    ///
    /// `now` is used when the payload carries no timestamp of its own.
    pub fn from_payload(payload: &MessagePayload, now: NaiveDateTime) -> Result<Self> {
        let timestamp = match payload.timestamp.as_deref() {
            Some(raw) if !raw.is_empty() => parse_timestamp(raw)?,
            _ => now,
        };

        let channel = payload.channel.clone().filter(|c| !c.is_empty());
        // Channel delivery wins; recipients only travel with direct messages.
        let pm_users = if channel.is_some() {
            Vec::new()
        } else {
            payload.pm_users.clone()
        };

        Ok(Self {
            uuid: new_record_id(),
            kind: RecordKind::Message,
            user: payload.user.clone(),
            channel,
            pm_users,
            message: payload.message.clone(),
            timestamp,
        })
    }

    /// Build a presence record for `user` on `channel`.
    ///
    /// `users` is the channel's current user list, included only when the
    /// channel broadcasts presence with user lists.
    pub fn presence(
        channel: &str,
        user: &str,
        action: PresenceAction,
        state: UserState,
        users: Option<Vec<String>>,
        now: NaiveDateTime,
    ) -> Self {
        let mut body = json!({
            "action": action,
            "state": state,
        });
        if let (Some(users), Some(obj)) = (users, body.as_object_mut()) {
            obj.insert("users".to_string(), json!(users));
        }

        Self {
            uuid: new_record_id(),
            kind: RecordKind::Presence,
            user: Some(user.to_string()),
            channel: Some(channel.to_string()),
            pm_users: Vec::new(),
            message: body,
            timestamp: now,
        }
    }
}

/// Serde adapter for record timestamps.
pub mod timestamp_format {
    use super::{TIMESTAMP_FORMAT, parse_timestamp};
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize with [`TIMESTAMP_FORMAT`].
    pub fn serialize<S>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }

    /// Deserialize either accepted inbound layout.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
