//! Connection lifecycle: connect, subscribe, unsubscribe, disconnect.

use super::{Api, observe, required};
use crate::error::{ApiError, ApiResult};
use crate::handlers::server_query::channels_info;
use crate::telemetry::{OperationTimer, spans};
use channelstream_proto::api::{
    ConnectRequest, ConnectResponse, DisconnectRequest, DisconnectResponse, SubscribeRequest,
    SubscribeResponse, UnsubscribeRequest, UnsubscribeResponse,
};
use channelstream_proto::record::new_record_id;
use tracing::info;

impl Api {
    /// Register a connection for a user and subscribe it to channels.
    ///
    /// Users and channels that do not exist yet are created. The whole
    /// operation runs under one store lock.
    pub fn connect(&self, req: ConnectRequest) -> ApiResult<ConnectResponse> {
        let _timer = OperationTimer::new("connect");
        let _span = spans::operation("connect", req.conn_id.as_deref()).entered();
        observe("connect", self.connect_inner(req))
    }

    fn connect_inner(&self, req: ConnectRequest) -> ApiResult<ConnectResponse> {
        let username = required(req.username, "username")?;
        let channels: Vec<String> = req.channels.into_iter().filter(|c| !c.is_empty()).collect();
        if channels.is_empty() {
            return Err(ApiError::invalid("channels are required"));
        }
        let conn_id = req
            .conn_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_record_id);

        let mut guard = self.store.lock();
        if let Some(existing) = guard.connection(&conn_id)
            && existing.username != username
        {
            return Err(ApiError::invalid(format!(
                "connection {conn_id} belongs to another user"
            )));
        }

        let now = guard.now();
        let user = guard.get_or_create_user(&username, &req.fresh_user_state);
        user.state_from_dict(&req.user_state, now);
        if let Some(keys) = req.state_public_keys {
            user.state_public_keys = keys;
        }
        let state = user.state.clone();

        let conn = guard.register_connection(&conn_id, &username);
        for name in &channels {
            guard.get_or_create_channel(name, &req.channel_configs);
            guard.attach(&conn, name);
        }
        let opts = req.info.unwrap_or_default();
        let channels_info = channels_info(&guard, Some(&channels), &opts);
        drop(guard);

        info!(user = %username, conn_id = %conn_id, channels = ?channels, "Connection registered");
        Ok(ConnectResponse {
            conn_id,
            state,
            channels,
            channels_info,
        })
    }

    /// Subscribe an existing connection to more channels.
    pub fn subscribe(&self, req: SubscribeRequest) -> ApiResult<SubscribeResponse> {
        let _timer = OperationTimer::new("subscribe");
        let _span = spans::operation("subscribe", req.conn_id.as_deref()).entered();
        observe("subscribe", self.subscribe_inner(req))
    }

    fn subscribe_inner(&self, req: SubscribeRequest) -> ApiResult<SubscribeResponse> {
        let conn_id = required(req.conn_id, "conn_id")?;
        let requested: Vec<String> = req.channels.into_iter().filter(|c| !c.is_empty()).collect();
        if requested.is_empty() {
            return Err(ApiError::invalid("channels are required"));
        }

        let mut guard = self.store.lock();
        let conn = guard
            .connection(&conn_id)
            .ok_or_else(|| ApiError::UnknownConnection(conn_id.clone()))?;
        conn.touch(guard.now());
        for name in &requested {
            guard.get_or_create_channel(name, &req.channel_configs);
            guard.attach(&conn, name);
        }
        let channels = guard.subscribed_channels(&conn);
        let opts = req.info.unwrap_or_default();
        let channels_info = channels_info(&guard, Some(&channels), &opts);
        drop(guard);

        info!(conn_id = %conn_id, channels = ?requested, "Subscribed");
        Ok(SubscribeResponse {
            channels,
            channels_info,
        })
    }

    /// Detach a connection from channels; returns the channels it actually left.
    pub fn unsubscribe(&self, req: UnsubscribeRequest) -> ApiResult<UnsubscribeResponse> {
        let _timer = OperationTimer::new("unsubscribe");
        let _span = spans::operation("unsubscribe", req.conn_id.as_deref()).entered();
        observe("unsubscribe", self.unsubscribe_inner(req))
    }

    fn unsubscribe_inner(&self, req: UnsubscribeRequest) -> ApiResult<UnsubscribeResponse> {
        let conn_id = required(req.conn_id, "conn_id")?;
        if req.channels.is_empty() {
            return Err(ApiError::invalid("channels are required"));
        }

        let mut guard = self.store.lock();
        let conn = guard
            .connection(&conn_id)
            .ok_or_else(|| ApiError::UnknownConnection(conn_id.clone()))?;
        conn.touch(guard.now());
        let channels: Vec<String> = req
            .channels
            .into_iter()
            .filter(|name| guard.detach(&conn, name))
            .collect();
        drop(guard);

        info!(conn_id = %conn_id, channels = ?channels, "Unsubscribed");
        Ok(UnsubscribeResponse { channels })
    }

    /// Mark a connection for collection by the next connection sweep.
    ///
    /// Unknown ids are not an error; `marked` reports whether anything was
    /// found.
    pub fn disconnect(&self, req: DisconnectRequest) -> ApiResult<DisconnectResponse> {
        let _timer = OperationTimer::new("disconnect");
        let _span = spans::operation("disconnect", req.conn_id.as_deref()).entered();
        observe("disconnect", self.disconnect_inner(req))
    }

    fn disconnect_inner(&self, req: DisconnectRequest) -> ApiResult<DisconnectResponse> {
        let conn_id = required(req.conn_id, "conn_id")?;
        let marked = match self.store.connection(&conn_id) {
            Some(conn) => {
                conn.mark_for_gc();
                true
            }
            None => false,
        };
        info!(conn_id = %conn_id, marked, "Disconnect requested");
        Ok(DisconnectResponse { conn_id, marked })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{api, connect, connect_request};
    use channelstream_proto::api::InfoOptions;
    use channelstream_proto::ChannelConfigPatch;
    use serde_json::json;

    #[test]
    fn connect_requires_username_and_channels() {
        let (api, _) = api();
        let mut req = connect_request("alice", "c1", &["a"]);
        req.username = None;
        assert!(matches!(api.connect(req), Err(ApiError::InvalidRequest(_))));

        let req = connect_request("alice", "c1", &[]);
        assert!(matches!(api.connect(req), Err(ApiError::InvalidRequest(_))));

        let guard = api.store().lock();
        assert_eq!(guard.user_count(), 0);
        assert_eq!(guard.channel_count(), 0);
    }

    #[test]
    fn connect_generates_conn_id_and_reports_state() {
        let (api, _) = api();
        let mut req = connect_request("alice", "", &["a", "b"]);
        req.conn_id = None;
        req.fresh_user_state = json!({"color": "red"}).as_object().cloned().unwrap();
        req.user_state = json!({"mood": "ok"}).as_object().cloned().unwrap();
        req.state_public_keys = Some(vec!["color".into()]);

        let resp = api.connect(req).unwrap();
        assert_eq!(resp.conn_id.len(), 32);
        assert_eq!(resp.state["color"], "red");
        assert_eq!(resp.state["mood"], "ok");
        assert_eq!(resp.channels, vec!["a", "b"]);
        assert_eq!(resp.channels_info.channels.len(), 2);
        assert_eq!(resp.channels_info.users.len(), 1);
        assert_eq!(
            resp.channels_info.users[0].state,
            json!({"color": "red"}).as_object().cloned().unwrap()
        );
    }

    #[test]
    fn fresh_state_applies_only_on_creation() {
        let (api, _) = api();
        connect(&api, "alice", "c1", &["a"]);

        let mut req = connect_request("alice", "c2", &["a"]);
        req.fresh_user_state = json!({"color": "blue"}).as_object().cloned().unwrap();
        let resp = api.connect(req).unwrap();
        assert!(resp.state.get("color").is_none());
    }

    #[test]
    fn conn_id_of_another_user_is_rejected() {
        let (api, _) = api();
        connect(&api, "alice", "c1", &["a"]);

        let req = connect_request("bob", "c1", &["b"]);
        assert!(matches!(api.connect(req), Err(ApiError::InvalidRequest(_))));
        let guard = api.store().lock();
        assert!(guard.user("bob").is_none());
        assert!(guard.channel("b").is_none());
    }

    #[test]
    fn connect_applies_channel_configs_on_creation() {
        let (api, _) = api();
        let mut req = connect_request("alice", "c1", &["a"]);
        req.channel_configs.insert(
            "a".into(),
            ChannelConfigPatch {
                store_history: Some(true),
                history_size: Some(2),
                ..Default::default()
            },
        );
        api.connect(req).unwrap();

        let guard = api.store().lock();
        let config = &guard.channel("a").unwrap().config;
        assert!(config.store_history);
        assert_eq!(config.history_size, 2);
    }

    #[test]
    fn subscribe_reports_every_attached_channel() {
        let (api, _) = api();
        connect(&api, "alice", "c1", &["a"]);

        let resp = api
            .subscribe(SubscribeRequest {
                conn_id: Some("c1".into()),
                channels: vec!["b".into(), "a".into()],
                info: Some(InfoOptions {
                    include_connections: true,
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(resp.channels, vec!["a", "b"]);
        assert_eq!(resp.channels_info.channels["b"].users[0].connections, vec!["c1"]);
    }

    #[test]
    fn subscribe_unknown_connection() {
        let (api, _) = api();
        let err = api
            .subscribe(SubscribeRequest {
                conn_id: Some("nope".into()),
                channels: vec!["a".into()],
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, ApiError::UnknownConnection("nope".into()));
        assert_eq!(api.store().lock().channel_count(), 0);
    }

    #[test]
    fn unsubscribe_returns_channels_left() {
        let (api, _) = api();
        connect(&api, "alice", "c1", &["a", "b"]);

        let resp = api
            .unsubscribe(UnsubscribeRequest {
                conn_id: Some("c1".into()),
                channels: vec!["a".into(), "zzz".into()],
            })
            .unwrap();
        assert_eq!(resp.channels, vec!["a"]);

        let guard = api.store().lock();
        assert!(guard.channel("a").unwrap().is_empty());
        assert_eq!(guard.channel("b").unwrap().total_connections(), 1);
    }

    #[test]
    fn unsubscribe_validates_request() {
        let (api, _) = api();
        connect(&api, "alice", "c1", &["a"]);

        let err = api
            .unsubscribe(UnsubscribeRequest {
                conn_id: Some("ghost".into()),
                channels: vec!["a".into()],
            })
            .unwrap_err();
        assert_eq!(err, ApiError::UnknownConnection("ghost".into()));

        let err = api
            .unsubscribe(UnsubscribeRequest {
                conn_id: Some("c1".into()),
                channels: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
        assert_eq!(api.store().lock().channel("a").unwrap().total_connections(), 1);
    }

    #[test]
    fn disconnect_marks_connection() {
        let (api, _) = api();
        connect(&api, "alice", "c1", &["a"]);

        let resp = api
            .disconnect(DisconnectRequest {
                conn_id: Some("c1".into()),
            })
            .unwrap();
        assert!(resp.marked);
        assert!(api.store().connection("c1").unwrap().is_marked_for_gc());

        let resp = api
            .disconnect(DisconnectRequest {
                conn_id: Some("missing".into()),
            })
            .unwrap();
        assert!(!resp.marked);
    }

    #[test]
    fn reconnect_clears_gc_mark() {
        let (api, _) = api();
        connect(&api, "alice", "c1", &["a"]);
        api.disconnect(DisconnectRequest {
            conn_id: Some("c1".into()),
        })
        .unwrap();

        connect(&api, "alice", "c1", &["a"]);
        assert!(!api.store().connection("c1").unwrap().is_marked_for_gc());
    }
}
