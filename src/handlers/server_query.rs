//! Read-only reports: channel info and admin statistics.

use super::Api;
use crate::error::ApiResult;
use crate::state::StoreGuard;
use crate::telemetry::{OperationTimer, spans};
use channelstream_proto::api::{AdminStats, InfoOptions, InfoRequest, UserInfo};
use channelstream_proto::ChannelsInfo;
use std::collections::{BTreeMap, BTreeSet};

/// Build a report over `names` (every channel when `None` or empty).
///
/// Unknown and excluded channels are skipped. The top-level user list
/// carries the public state of every user seen in a reported channel.
pub fn channels_info(
    guard: &StoreGuard<'_>,
    names: Option<&[String]>,
    opts: &InfoOptions,
) -> ChannelsInfo {
    let selected: Vec<_> = match names {
        Some(names) if !names.is_empty() => {
            names.iter().filter_map(|name| guard.channel(name)).collect()
        }
        _ => guard.channels().collect(),
    };

    let mut channels = BTreeMap::new();
    let mut seen = BTreeSet::new();
    for chan in selected {
        if opts.exclude_channels.contains(&chan.name) {
            continue;
        }
        if opts.include_users {
            seen.extend(chan.user_names());
        }
        channels.insert(chan.name.clone(), chan.info(opts));
    }

    let users = seen
        .iter()
        .filter_map(|name| guard.user(name))
        .map(|user| UserInfo {
            user: user.username.clone(),
            state: user.public_state(),
        })
        .collect();

    ChannelsInfo {
        channels,
        unique_users: guard.user_count(),
        users,
    }
}

impl Api {
    /// Report on channels.
    pub fn info(&self, req: InfoRequest) -> ApiResult<ChannelsInfo> {
        let _timer = OperationTimer::new("info");
        let _span = spans::operation("info", None).entered();
        let opts = req.options();
        let guard = self.store.lock();
        Ok(channels_info(&guard, req.channels.as_deref(), &opts))
    }

    /// Server-wide counters.
    pub fn admin_stats(&self) -> AdminStats {
        let _timer = OperationTimer::new("admin");
        let stats = self.store.stats();
        let guard = self.store.lock();
        AdminStats {
            remembered_user_count: guard.user_count(),
            unique_user_count: guard.users().filter(|u| !u.connections.is_empty()).count(),
            total_connections: self.store.connection_count(),
            total_channels: guard.channel_count(),
            total_messages: stats.total_messages(),
            total_unique_messages: stats.total_unique_messages(),
            uptime_seconds: stats.uptime().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{api, connect};
    use crate::handlers::pass_message;
    use crate::handlers::test_support::connect_request;
    use channelstream_proto::api::{DisconnectRequest, MessagePayload};
    use channelstream_proto::ChannelConfigPatch;

    #[test]
    fn info_defaults_report_everything() {
        let (api, _) = api();
        connect(&api, "alice", "a1", &["x", "y"]);
        connect(&api, "bob", "b1", &["y"]);

        let report = api.info(InfoRequest::default()).unwrap();
        assert_eq!(report.channels.len(), 2);
        assert_eq!(report.unique_users, 2);
        assert_eq!(report.users.len(), 2);

        let y = &report.channels["y"];
        assert_eq!(y.total_users, 2);
        assert_eq!(y.total_connections, 2);
        assert_eq!(y.users[0].user, "alice");
        assert_eq!(y.users[0].connections, vec!["a1"]);
    }

    #[test]
    fn info_skips_unknown_and_excluded_channels() {
        let (api, _) = api();
        connect(&api, "alice", "a1", &["x", "y"]);

        let report = api
            .info(InfoRequest {
                channels: Some(vec!["x".into(), "y".into(), "ghost".into()]),
                exclude_channels: vec!["y".into()],
                include_users: false,
                include_connections: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.channels.keys().collect::<Vec<_>>(), vec!["x"]);
        assert!(report.users.is_empty());
        assert!(report.channels["x"].users[0].connections.is_empty());
    }

    #[test]
    fn info_includes_history_on_request() {
        let (api, _) = api();
        let mut req = connect_request("alice", "a1", &["x"]);
        req.channel_configs.insert(
            "x".into(),
            ChannelConfigPatch {
                store_history: Some(true),
                ..Default::default()
            },
        );
        api.connect(req).unwrap();
        pass_message(
            api.store(),
            &MessagePayload {
                channel: Some("x".into()),
                message: serde_json::json!("hi"),
                ..Default::default()
            },
        )
        .unwrap();

        let full = api.info(InfoRequest::default()).unwrap();
        assert_eq!(full.channels["x"].history.len(), 1);

        let bare = api
            .info(InfoRequest {
                include_history: false,
                ..Default::default()
            })
            .unwrap();
        assert!(bare.channels["x"].history.is_empty());
    }

    #[test]
    fn admin_stats_counts_entities() {
        let (api, _) = api();
        connect(&api, "alice", "a1", &["x"]);
        connect(&api, "alice", "a2", &["x"]);
        connect(&api, "bob", "b1", &["y"]);
        api.disconnect(DisconnectRequest {
            conn_id: Some("b1".into()),
        })
        .unwrap();

        let stats = api.admin_stats();
        assert_eq!(stats.remembered_user_count, 2);
        assert_eq!(stats.unique_user_count, 2);
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.total_channels, 2);
        assert_eq!(stats.total_unique_messages, 0);
    }
}
