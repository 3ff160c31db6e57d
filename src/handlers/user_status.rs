//! User state updates.

use super::{Api, observe, required};
use crate::error::{ApiError, ApiResult};
use crate::telemetry::{OperationTimer, spans};
use channelstream_proto::UserState;
use channelstream_proto::api::UserStateRequest;
use tracing::debug;

impl Api {
    /// Merge state into an existing user and return the full state.
    pub fn user_state(&self, req: UserStateRequest) -> ApiResult<UserState> {
        let _timer = OperationTimer::new("user_state");
        let _span = spans::operation("user_state", None).entered();
        observe("user_state", self.user_state_inner(req))
    }

    fn user_state_inner(&self, req: UserStateRequest) -> ApiResult<UserState> {
        let username = required(req.user, "user")?;

        let mut guard = self.store.lock();
        let now = guard.now();
        let user = guard
            .user_mut(&username)
            .ok_or_else(|| ApiError::UnknownUser(username.clone()))?;
        user.state_from_dict(&req.user_state, now);
        if let Some(keys) = req.state_public_keys {
            user.state_public_keys = keys;
        }
        user.last_active = now;

        debug!(user = %username, "User state updated");
        Ok(user.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{api, connect};
    use serde_json::json;

    #[test]
    fn merges_state_and_public_keys() {
        let (api, _) = api();
        connect(&api, "alice", "a1", &["x"]);

        let state = api
            .user_state(UserStateRequest {
                user: Some("alice".into()),
                user_state: json!({"status": "away", "secret": 1})
                    .as_object()
                    .cloned()
                    .unwrap(),
                state_public_keys: Some(vec!["status".into()]),
            })
            .unwrap();
        assert_eq!(state["status"], "away");
        assert_eq!(state["secret"], 1);

        let guard = api.store().lock();
        let public = guard.user("alice").unwrap().public_state();
        assert_eq!(public, json!({"status": "away"}).as_object().cloned().unwrap());
    }

    #[test]
    fn missing_and_unknown_users() {
        let (api, _) = api();
        let err = api.user_state(UserStateRequest::default()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));

        let err = api
            .user_state(UserStateRequest {
                user: Some("ghost".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, ApiError::UnknownUser("ghost".into()));
    }
}
