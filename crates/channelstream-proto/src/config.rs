//! Channel delivery policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// History bound used when none is configured.
pub const DEFAULT_HISTORY_SIZE: usize = 10;

/// Effective configuration of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Emit synthetic join/part records.
    pub notify_presence: bool,
    /// Retain published messages in the channel history.
    pub store_history: bool,
    /// Maximum number of retained messages.
    pub history_size: usize,
    /// Presence records include the full user list.
    pub broadcast_presence_with_user_lists: bool,
    /// Exempt the channel from emptiness-based collection.
    pub salvageable: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            notify_presence: false,
            store_history: false,
            history_size: DEFAULT_HISTORY_SIZE,
            broadcast_presence_with_user_lists: false,
            salvageable: false,
        }
    }
}

impl ChannelConfig {
    /// Defaults overlaid with `patch`.
    pub fn from_patch(patch: &ChannelConfigPatch) -> Self {
        let mut config = Self::default();
        config.apply(patch);
        config
    }

    /// Overlay the fields present in `patch`.
    ///
    /// A `history_size` without an explicit `store_history` turns retention on.
    pub fn apply(&mut self, patch: &ChannelConfigPatch) {
        if let Some(v) = patch.notify_presence {
            self.notify_presence = v;
        }
        if let Some(v) = patch.store_history {
            self.store_history = v;
        }
        if let Some(v) = patch.history_size {
            self.history_size = v;
            if patch.store_history.is_none() {
                self.store_history = true;
            }
        }
        if let Some(v) = patch.broadcast_presence_with_user_lists {
            self.broadcast_presence_with_user_lists = v;
        }
        if let Some(v) = patch.salvageable {
            self.salvageable = v;
        }
    }
}

/// Partial channel configuration as sent by clients.
///
/// Unrecognized keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfigPatch {
    /// See [`ChannelConfig::notify_presence`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_presence: Option<bool>,
    /// See [`ChannelConfig::store_history`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_history: Option<bool>,
    /// See [`ChannelConfig::history_size`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_size: Option<usize>,
    /// See [`ChannelConfig::broadcast_presence_with_user_lists`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_presence_with_user_lists: Option<bool>,
    /// See [`ChannelConfig::salvageable`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salvageable: Option<bool>,
}

/// Channel name to configuration patch.
pub type ChannelConfigs = BTreeMap<String, ChannelConfigPatch>;
