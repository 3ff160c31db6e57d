//! User state.

use channelstream_proto::UserState;
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::time::Duration;

use super::clock::idle_longer_than;

/// An identity owning zero or more connections.
///
/// Lives inside the store topology; every field is mutated under the
/// store lock.
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub state: UserState,
    /// Keys of `state` visible to other users.
    pub state_public_keys: Vec<String>,
    /// Ids of the connections this user owns.
    pub connections: HashSet<String>,
    pub last_active: NaiveDateTime,
}

impl User {
    pub fn new(username: impl Into<String>, now: NaiveDateTime) -> Self {
        Self {
            username: username.into(),
            state: UserState::new(),
            state_public_keys: Vec::new(),
            connections: HashSet::new(),
            last_active: now,
        }
    }

    /// Merge `update` into the state, key by key.
    pub fn state_from_dict(&mut self, update: &UserState, now: NaiveDateTime) {
        if update.is_empty() {
            return;
        }
        for (key, value) in update {
            self.state.insert(key.clone(), value.clone());
        }
        self.last_active = now;
    }

    /// Projection of the state restricted to `state_public_keys`.
    pub fn public_state(&self) -> UserState {
        self.state_public_keys
            .iter()
            .filter_map(|key| self.state.get(key).map(|v| (key.clone(), v.clone())))
            .collect()
    }

    pub fn add_connection(&mut self, conn_id: &str) {
        self.connections.insert(conn_id.to_string());
    }

    /// Forget a connection. The user stays active from this moment so the
    /// idle window starts when the last connection departs.
    pub fn remove_connection(&mut self, conn_id: &str, now: NaiveDateTime) -> bool {
        let removed = self.connections.remove(conn_id);
        if removed {
            self.last_active = now;
        }
        removed
    }

    /// No connections left and idle longer than `threshold`.
    pub fn is_collectable(&self, now: NaiveDateTime, threshold: Duration) -> bool {
        self.connections.is_empty() && idle_longer_than(now, self.last_active, threshold)
    }
}
