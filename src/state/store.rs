//! The entity store.
//!
//! Owns every User, Connection and Channel. Structural changes (creating or
//! removing an entity, changing who is subscribed where) happen through a
//! [`StoreGuard`], which holds the single store lock for its lifetime. The
//! guard must never live across an `.await`.
//!
//! Connections are additionally indexed in a `DashMap` so the delivery
//! paths can resolve a connection id and touch its activity stamp without
//! the lock. That index is only written while the lock is held.

use channelstream_proto::{
    ChannelConfig, ChannelConfigs, MessageRecord, PresenceAction, UserState,
};
use chrono::NaiveDateTime;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::channel::{Attach, Channel, Detach};
use super::clock::{Clock, SystemClock};
use super::connection::Connection;
use super::managers::stats::StatsManager;
use super::user::User;

/// Users and channels; only reachable through a [`StoreGuard`].
#[derive(Debug, Default)]
struct Topology {
    users: HashMap<String, User>,
    channels: HashMap<String, Channel>,
}

/// Shared server state.
pub struct Store {
    topology: Mutex<Topology>,
    connections: DashMap<String, Arc<Connection>>,
    clock: Arc<dyn Clock>,
    stats: StatsManager,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl Store {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            topology: Mutex::new(Topology::default()),
            connections: DashMap::new(),
            clock,
            stats: StatsManager::new(),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn stats(&self) -> &StatsManager {
        &self.stats
    }

    /// Take the store lock.
    pub fn lock(&self) -> StoreGuard<'_> {
        StoreGuard {
            store: self,
            topology: self.topology.lock(),
            now: self.clock.now(),
        }
    }

    /// Resolve a connection without taking the store lock.
    ///
    /// The shard guard is dropped before returning.
    pub fn connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Snapshot of every connection, taken without the store lock.
    pub fn connections_snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Exclusive access to the store topology.
pub struct StoreGuard<'a> {
    store: &'a Store,
    topology: MutexGuard<'a, Topology>,
    now: NaiveDateTime,
}

impl StoreGuard<'_> {
    /// Time the lock was taken; used for every timestamp in the transaction.
    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    pub fn user(&self, username: &str) -> Option<&User> {
        self.topology.users.get(username)
    }

    pub fn user_mut(&mut self, username: &str) -> Option<&mut User> {
        self.topology.users.get_mut(username)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.topology.users.values()
    }

    pub fn user_count(&self) -> usize {
        self.topology.users.len()
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.topology.channels.get(name)
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.topology.channels.get_mut(name)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.topology.channels.values()
    }

    pub fn channel_count(&self) -> usize {
        self.topology.channels.len()
    }

    pub fn connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.store.connection(id)
    }

    /// Fetch `username`, creating it with `fresh_state` when absent.
    pub fn get_or_create_user(&mut self, username: &str, fresh_state: &UserState) -> &mut User {
        let now = self.now;
        let users = &mut self.topology.users;
        if !users.contains_key(username) {
            debug!(user = %username, "User created");
            crate::metrics::set_users(users.len() + 1);
        }
        users.entry(username.to_string()).or_insert_with(|| {
            let mut user = User::new(username, now);
            user.state_from_dict(fresh_state, now);
            user
        })
    }

    /// Fetch channel `name`, creating it from its entry in `configs` when
    /// absent. Existing channels keep their configuration.
    pub fn get_or_create_channel(&mut self, name: &str, configs: &ChannelConfigs) -> &mut Channel {
        let now = self.now;
        let channels = &mut self.topology.channels;
        if !channels.contains_key(name) {
            crate::metrics::set_channels(channels.len() + 1);
        }
        channels.entry(name.to_string()).or_insert_with(|| {
            let config = configs
                .get(name)
                .map(ChannelConfig::from_patch)
                .unwrap_or_default();
            debug!(channel = %name, ?config, "Channel created");
            Channel::new(name, config, now)
        })
    }

    /// Register connection `id` for `username`, reusing it when it exists.
    ///
    /// The user must already exist. A reused connection is refreshed and
    /// loses any pending GC mark.
    pub fn register_connection(&mut self, id: &str, username: &str) -> Arc<Connection> {
        let now = self.now;
        let conn = match self.store.connection(id) {
            Some(existing) => {
                existing.touch(now);
                existing.clear_gc_mark();
                existing
            }
            None => {
                let conn = Arc::new(Connection::new(id, username, now));
                self.store
                    .connections
                    .insert(id.to_string(), Arc::clone(&conn));
                crate::metrics::set_connections(self.store.connections.len());
                conn
            }
        };
        if let Some(user) = self.topology.users.get_mut(username) {
            user.add_connection(id);
        }
        conn
    }

    /// Subscribe `conn` to an existing channel.
    ///
    /// Returns `false` when the channel does not exist or the connection was
    /// already subscribed.
    pub fn attach(&mut self, conn: &Arc<Connection>, channel: &str) -> bool {
        let now = self.now;
        let Topology { users, channels } = &mut *self.topology;
        let Some(chan) = channels.get_mut(channel) else {
            return false;
        };
        match chan.add_connection(conn) {
            Attach::AlreadySubscribed => false,
            Attach::Added => true,
            Attach::Joined => {
                announce_presence(chan, users, &conn.username, PresenceAction::Joined, now);
                true
            }
        }
    }

    /// Unsubscribe `conn` from `channel`.
    pub fn detach(&mut self, conn: &Connection, channel: &str) -> bool {
        let now = self.now;
        let Topology { users, channels } = &mut *self.topology;
        let Some(chan) = channels.get_mut(channel) else {
            return false;
        };
        match chan.remove_connection(conn) {
            Detach::NotSubscribed => false,
            Detach::Removed => true,
            Detach::Parted => {
                announce_presence(chan, users, &conn.username, PresenceAction::Parted, now);
                true
            }
        }
    }

    /// Channels `conn` is subscribed to, sorted by name.
    pub fn subscribed_channels(&self, conn: &Connection) -> Vec<String> {
        let mut names: Vec<String> = self
            .topology
            .channels
            .values()
            .filter(|c| c.is_subscribed(conn))
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Detach connection `id` from every channel, drop it from its user and
    /// delete it.
    pub fn remove_connection(&mut self, id: &str) -> Option<Arc<Connection>> {
        let conn = self.store.connection(id)?;
        for name in self.subscribed_channels(&conn) {
            self.detach(&conn, &name);
        }
        let now = self.now;
        if let Some(user) = self.topology.users.get_mut(&conn.username) {
            user.remove_connection(id, now);
        }
        self.store.connections.remove(id);
        crate::metrics::set_connections(self.store.connections.len());
        Some(conn)
    }

    pub fn remove_channel(&mut self, name: &str) -> Option<Channel> {
        let removed = self.topology.channels.remove(name);
        if removed.is_some() {
            crate::metrics::set_channels(self.topology.channels.len());
        }
        removed
    }

    pub fn remove_user(&mut self, username: &str) -> Option<User> {
        let removed = self.topology.users.remove(username);
        if removed.is_some() {
            crate::metrics::set_users(self.topology.users.len());
        }
        removed
    }
}

/// Fan a presence record out on `chan` when the channel asks for it.
fn announce_presence(
    chan: &Channel,
    users: &HashMap<String, User>,
    username: &str,
    action: PresenceAction,
    now: NaiveDateTime,
) {
    if !chan.config.notify_presence {
        return;
    }
    let state = users
        .get(username)
        .map(User::public_state)
        .unwrap_or_default();
    let user_list = chan
        .config
        .broadcast_presence_with_user_lists
        .then(|| chan.user_names());
    let record = Arc::new(MessageRecord::presence(
        &chan.name, username, action, state, user_list, now,
    ));
    let delivered = chan.fan_out(&record);
    debug!(channel = %chan.name, user = %username, ?action, delivered, "Presence announced");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::clock::testing::ManualClock;
    use channelstream_proto::{ChannelConfigPatch, RecordKind};

    fn store() -> Store {
        Store::new(Arc::new(ManualClock::new()))
    }

    fn connect(store: &Store, user: &str, conn_id: &str, channels: &[&str]) -> Arc<Connection> {
        let mut guard = store.lock();
        guard.get_or_create_user(user, &UserState::new());
        let conn = guard.register_connection(conn_id, user);
        for name in channels {
            guard.get_or_create_channel(name, &ChannelConfigs::new());
            guard.attach(&conn, name);
        }
        conn
    }

    #[test]
    fn connection_belongs_to_one_user() {
        let store = store();
        connect(&store, "alice", "c1", &["a", "b"]);
        connect(&store, "bob", "c2", &["a"]);

        let guard = store.lock();
        let owners: Vec<_> = guard
            .users()
            .filter(|u| u.connections.contains("c1"))
            .map(|u| u.username.clone())
            .collect();
        assert_eq!(owners, vec!["alice".to_string()]);
        let conn = guard.connection("c1").unwrap();
        assert_eq!(guard.subscribed_channels(&conn), vec!["a", "b"]);
    }

    #[test]
    fn reconnect_reuses_connection() {
        let store = store();
        let first = connect(&store, "alice", "c1", &["a"]);
        first.mark_for_gc();
        let second = connect(&store, "alice", "c1", &["a"]);

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!second.is_marked_for_gc());
        assert_eq!(store.connection_count(), 1);
        assert_eq!(store.lock().channel("a").unwrap().total_connections(), 1);
    }

    #[test]
    fn remove_connection_detaches_everywhere() {
        let store = store();
        connect(&store, "alice", "c1", &["a", "b"]);
        connect(&store, "alice", "c2", &["a"]);

        let mut guard = store.lock();
        assert!(guard.remove_connection("c1").is_some());
        assert!(guard.channel("b").unwrap().is_empty());
        assert_eq!(guard.channel("a").unwrap().total_connections(), 1);
        assert_eq!(guard.user("alice").unwrap().connections.len(), 1);
        assert!(guard.connection("c1").is_none());
        assert!(guard.remove_connection("c1").is_none());
    }

    #[test]
    fn existing_channel_keeps_config() {
        let store = store();
        let mut configs = ChannelConfigs::new();
        configs.insert(
            "a".into(),
            ChannelConfigPatch {
                history_size: Some(3),
                ..Default::default()
            },
        );
        let mut guard = store.lock();
        assert_eq!(guard.get_or_create_channel("a", &configs).config.history_size, 3);

        configs.get_mut("a").unwrap().history_size = Some(7);
        assert_eq!(guard.get_or_create_channel("a", &configs).config.history_size, 3);
        assert_eq!(guard.channel_count(), 1);
    }

    #[tokio::test]
    async fn presence_on_first_join_and_last_part() {
        let store = store();
        let mut configs = ChannelConfigs::new();
        configs.insert(
            "room".into(),
            ChannelConfigPatch {
                notify_presence: Some(true),
                broadcast_presence_with_user_lists: Some(true),
                ..Default::default()
            },
        );

        let watcher = {
            let mut guard = store.lock();
            guard.get_or_create_user("watcher", &UserState::new());
            let conn = guard.register_connection("w1", "watcher");
            conn.queue();
            guard.get_or_create_channel("room", &configs);
            guard.attach(&conn, "room");
            conn
        };
        let mut rx = watcher.queue().consumer().await;
        // The watcher's own join arrives first.
        assert_eq!(rx.try_recv().unwrap().user.as_deref(), Some("watcher"));

        let alice1 = connect(&store, "alice", "a1", &["room"]);
        let alice2 = connect(&store, "alice", "a2", &["room"]);

        let joined = rx.try_recv().unwrap();
        assert_eq!(joined.kind, RecordKind::Presence);
        assert_eq!(joined.message["action"], "joined");
        assert_eq!(joined.message["users"], serde_json::json!(["alice", "watcher"]));
        // A second connection of the same user is not a join.
        assert!(rx.try_recv().is_err());

        {
            let mut guard = store.lock();
            guard.detach(&alice1, "room");
            assert!(rx.try_recv().is_err());
            guard.detach(&alice2, "room");
        }
        let parted = rx.try_recv().unwrap();
        assert_eq!(parted.message["action"], "parted");
        assert_eq!(parted.message["users"], serde_json::json!(["watcher"]));
    }

    #[test]
    fn concurrent_connects_create_single_entities() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    connect(&store, "alice", &format!("c{i}"), &["shared"]);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let guard = store.lock();
        assert_eq!(guard.user_count(), 1);
        assert_eq!(guard.channel_count(), 1);
        assert_eq!(guard.user("alice").unwrap().connections.len(), 8);
        assert_eq!(guard.channel("shared").unwrap().total_connections(), 8);
    }
}
