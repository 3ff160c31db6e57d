//! Channel-related types and state.

use channelstream_proto::api::{ChannelInfo, ChannelUser, InfoOptions};
use channelstream_proto::{ChannelConfig, ChannelConfigPatch};
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::clock::idle_longer_than;
use super::connection::{Connection, SharedRecord};

/// Outcome of attaching a connection to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// First connection of this user on the channel.
    Joined,
    /// The user already had other connections here.
    Added,
    /// The connection was already subscribed.
    AlreadySubscribed,
}

/// Outcome of detaching a connection from a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    /// That was the user's last connection on the channel.
    Parted,
    /// Other connections of the user remain.
    Removed,
    /// The connection was not subscribed.
    NotSubscribed,
}

/// A named pub/sub topic.
#[derive(Debug)]
pub struct Channel {
    pub name: String,
    pub config: ChannelConfig,
    /// Username to that user's subscribed connections. A key is present
    /// only while its list is non-empty.
    connections: BTreeMap<String, Vec<Arc<Connection>>>,
    history: VecDeque<SharedRecord>,
    pub last_active: NaiveDateTime,
}

impl Channel {
    pub fn new(name: impl Into<String>, config: ChannelConfig, now: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            config,
            connections: BTreeMap::new(),
            history: VecDeque::new(),
            last_active: now,
        }
    }

    pub fn add_connection(&mut self, conn: &Arc<Connection>) -> Attach {
        let conns = self.connections.entry(conn.username.clone()).or_default();
        if conns.iter().any(|c| c.id == conn.id) {
            return Attach::AlreadySubscribed;
        }
        let first = conns.is_empty();
        conns.push(Arc::clone(conn));
        if first { Attach::Joined } else { Attach::Added }
    }

    pub fn remove_connection(&mut self, conn: &Connection) -> Detach {
        let Some(conns) = self.connections.get_mut(&conn.username) else {
            return Detach::NotSubscribed;
        };
        let before = conns.len();
        conns.retain(|c| c.id != conn.id);
        if conns.len() == before {
            return Detach::NotSubscribed;
        }
        if conns.is_empty() {
            self.connections.remove(&conn.username);
            Detach::Parted
        } else {
            Detach::Removed
        }
    }

    pub fn is_subscribed(&self, conn: &Connection) -> bool {
        self.connections
            .get(&conn.username)
            .is_some_and(|conns| conns.iter().any(|c| c.id == conn.id))
    }

    pub fn has_user(&self, username: &str) -> bool {
        self.connections.contains_key(username)
    }

    /// Subscribed usernames, sorted.
    pub fn user_names(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub fn total_users(&self) -> usize {
        self.connections.len()
    }

    pub fn total_connections(&self) -> usize {
        self.connections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Enqueue `record` on every subscribed connection.
    ///
    /// Returns the number of connections that accepted a copy.
    pub fn fan_out(&self, record: &SharedRecord) -> usize {
        self.connections
            .values()
            .flatten()
            .filter(|conn| conn.deliver(record))
            .count()
    }

    /// Append to history, evicting the oldest entries past `history_size`.
    pub fn add_history(&mut self, record: &SharedRecord) {
        if !self.config.store_history {
            return;
        }
        self.history.push_back(Arc::clone(record));
        self.trim_history();
    }

    pub fn history(&self) -> impl Iterator<Item = &SharedRecord> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Apply a configuration patch; history shrinks to the new bound.
    pub fn reconfigure(&mut self, patch: &ChannelConfigPatch) {
        self.config.apply(patch);
        if !self.config.store_history {
            self.history.clear();
        }
        self.trim_history();
    }

    fn trim_history(&mut self) {
        while self.history.len() > self.config.history_size {
            self.history.pop_front();
        }
    }

    /// Empty, not salvageable, and idle longer than `threshold`.
    pub fn is_collectable(&self, now: NaiveDateTime, threshold: Duration) -> bool {
        self.is_empty()
            && !self.config.salvageable
            && idle_longer_than(now, self.last_active, threshold)
    }

    /// Report on this channel.
    pub fn info(&self, opts: &InfoOptions) -> ChannelInfo {
        let history = if opts.include_history {
            self.history.iter().map(|r| r.as_ref().clone()).collect()
        } else {
            Vec::new()
        };
        let users = self
            .connections
            .iter()
            .map(|(user, conns)| ChannelUser {
                user: user.clone(),
                connections: if opts.include_connections {
                    conns.iter().map(|c| c.id.clone()).collect()
                } else {
                    Vec::new()
                },
            })
            .collect();

        ChannelInfo {
            history,
            total_users: self.total_users(),
            total_connections: self.total_connections(),
            users,
            last_active: self.last_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::clock::Clock;
    use crate::state::clock::testing::ManualClock;
    use channelstream_proto::{MessagePayload, MessageRecord};

    fn conn(clock: &ManualClock, id: &str, user: &str) -> Arc<Connection> {
        Arc::new(Connection::new(id, user, clock.now()))
    }

    fn record(clock: &ManualClock, n: u32) -> SharedRecord {
        let payload = MessagePayload {
            channel: Some("c".into()),
            message: serde_json::json!(n),
            ..Default::default()
        };
        Arc::new(MessageRecord::from_payload(&payload, clock.now()).unwrap())
    }

    #[test]
    fn user_key_tracks_connection_list() {
        let clock = ManualClock::new();
        let mut chan = Channel::new("c", ChannelConfig::default(), clock.now());
        let a1 = conn(&clock, "a1", "alice");
        let a2 = conn(&clock, "a2", "alice");

        assert_eq!(chan.add_connection(&a1), Attach::Joined);
        assert_eq!(chan.add_connection(&a2), Attach::Added);
        assert_eq!(chan.add_connection(&a2), Attach::AlreadySubscribed);
        assert_eq!(chan.total_users(), 1);
        assert_eq!(chan.total_connections(), 2);

        assert_eq!(chan.remove_connection(&a1), Detach::Removed);
        assert!(chan.has_user("alice"));
        assert_eq!(chan.remove_connection(&a2), Detach::Parted);
        assert!(!chan.has_user("alice"));
        assert_eq!(chan.remove_connection(&a2), Detach::NotSubscribed);
        assert!(chan.is_empty());
    }

    #[test]
    fn fan_out_counts_connections_not_users() {
        let clock = ManualClock::new();
        let mut chan = Channel::new("c", ChannelConfig::default(), clock.now());
        for (id, user) in [("a1", "alice"), ("a2", "alice"), ("b1", "bob")] {
            let c = conn(&clock, id, user);
            c.queue();
            chan.add_connection(&c);
        }
        assert_eq!(chan.fan_out(&record(&clock, 1)), 3);
    }

    #[test]
    fn history_is_a_fifo_bound() {
        let clock = ManualClock::new();
        let config = ChannelConfig {
            store_history: true,
            history_size: 2,
            ..Default::default()
        };
        let mut chan = Channel::new("c", config, clock.now());
        for n in 1..=3 {
            chan.add_history(&record(&clock, n));
        }
        let kept: Vec<_> = chan.history().map(|r| r.message.clone()).collect();
        assert_eq!(kept, vec![serde_json::json!(2), serde_json::json!(3)]);
    }

    #[test]
    fn history_disabled_keeps_nothing() {
        let clock = ManualClock::new();
        let mut chan = Channel::new("c", ChannelConfig::default(), clock.now());
        chan.add_history(&record(&clock, 1));
        assert_eq!(chan.history_len(), 0);
    }

    #[test]
    fn reconfigure_shrinks_history() {
        let clock = ManualClock::new();
        let config = ChannelConfig {
            store_history: true,
            ..Default::default()
        };
        let mut chan = Channel::new("c", config, clock.now());
        for n in 1..=5 {
            chan.add_history(&record(&clock, n));
        }
        chan.reconfigure(&ChannelConfigPatch {
            history_size: Some(1),
            ..Default::default()
        });
        assert_eq!(chan.history_len(), 1);
        assert_eq!(chan.history().next().unwrap().message, 5);
    }

    #[test]
    fn salvageable_channels_are_never_collectable() {
        let clock = ManualClock::new();
        let mut chan = Channel::new("c", ChannelConfig::default(), clock.now());
        clock.advance(Duration::from_secs(61));
        assert!(chan.is_collectable(clock.now(), Duration::from_secs(60)));

        chan.config.salvageable = true;
        assert!(!chan.is_collectable(clock.now(), Duration::from_secs(60)));
    }
}
