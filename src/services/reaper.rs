//! Garbage collection of stale connections, channels and users.
//!
//! Two independent sweeps run on the same interval. Candidates are picked
//! from a snapshot, then each one is re-checked and removed under its own
//! store lock, so a client that reconnects between the two steps survives.

use crate::config::GcConfig;
use crate::state::Store;
use crate::telemetry::spans;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Remove connections that were disconnected or stayed idle past `idle`.
///
/// Removing a connection detaches it from every channel, which announces a
/// part on channels with presence enabled.
pub fn reap_connections(store: &Store, idle: Duration) -> usize {
    let now = store.now();
    let candidates: Vec<String> = store
        .connections_snapshot()
        .into_iter()
        .filter(|conn| conn.is_reapable(now, idle))
        .map(|conn| conn.id.clone())
        .collect();

    let mut reaped = 0;
    for id in candidates {
        let mut guard = store.lock();
        let now = guard.now();
        let still_stale = guard
            .connection(&id)
            .is_some_and(|conn| conn.is_reapable(now, idle));
        if still_stale && guard.remove_connection(&id).is_some() {
            reaped += 1;
            debug!(conn_id = %id, "Connection collected");
        }
    }

    crate::metrics::record_reaped("connection", reaped);
    if reaped > 0 {
        info!(reaped, "Connection sweep finished");
    }
    reaped
}

/// Remove empty channels and connection-less users idle past `idle`.
///
/// Salvageable channels are kept regardless of emptiness.
pub fn reap_channels_and_users(store: &Store, idle: Duration) -> (usize, usize) {
    let (channels, users) = {
        let guard = store.lock();
        let now = guard.now();
        let channels: Vec<String> = guard
            .channels()
            .filter(|chan| chan.is_collectable(now, idle))
            .map(|chan| chan.name.clone())
            .collect();
        let users: Vec<String> = guard
            .users()
            .filter(|user| user.is_collectable(now, idle))
            .map(|user| user.username.clone())
            .collect();
        (channels, users)
    };

    let mut channels_reaped = 0;
    for name in channels {
        let mut guard = store.lock();
        let now = guard.now();
        if guard
            .channel(&name)
            .is_some_and(|chan| chan.is_collectable(now, idle))
        {
            guard.remove_channel(&name);
            channels_reaped += 1;
            debug!(channel = %name, "Channel collected");
        }
    }

    let mut users_reaped = 0;
    for username in users {
        let mut guard = store.lock();
        let now = guard.now();
        if guard
            .user(&username)
            .is_some_and(|user| user.is_collectable(now, idle))
        {
            guard.remove_user(&username);
            users_reaped += 1;
            debug!(user = %username, "User collected");
        }
    }

    crate::metrics::record_reaped("channel", channels_reaped);
    crate::metrics::record_reaped("user", users_reaped);
    if channels_reaped + users_reaped > 0 {
        info!(channels = channels_reaped, users = users_reaped, "Channel sweep finished");
    }
    (channels_reaped, users_reaped)
}

async fn connection_sweeps(store: Arc<Store>, every: Duration, idle: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        spans::sweep("connections").in_scope(|| reap_connections(&store, idle));
    }
}

async fn channel_sweeps(store: Arc<Store>, every: Duration, idle: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        spans::sweep("channels").in_scope(|| reap_channels_and_users(&store, idle));
    }
}

/// Run `make()` as a task, starting a fresh one after `backoff` whenever it
/// panics. Returns when the task finishes normally or is cancelled.
fn supervise<F, Fut>(name: &'static str, backoff: Duration, make: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match tokio::spawn(make()).await {
                Ok(()) => {
                    warn!(sweep = name, "Sweep exited");
                    return;
                }
                Err(e) if e.is_panic() => {
                    error!(sweep = name, error = %e, "Sweep panicked; restarting");
                    crate::metrics::record_gc_restart();
                    tokio::time::sleep(backoff).await;
                }
                Err(_) => return,
            }
        }
    })
}

/// Spawn both sweeps under supervision.
pub fn spawn_reapers(store: Arc<Store>, gc: &GcConfig) -> Vec<JoinHandle<()>> {
    let every = gc.interval();
    let conns_after = gc.conns_after();
    let channels_after = gc.channels_after();
    info!(
        interval_secs = every.as_secs(),
        conns_after_secs = conns_after.as_secs(),
        channels_after_secs = channels_after.as_secs(),
        "Starting garbage collection"
    );

    let conn_store = Arc::clone(&store);
    let connections = supervise("connections", every, move || {
        connection_sweeps(Arc::clone(&conn_store), every, conns_after)
    });
    let channels = supervise("channels", every, move || {
        channel_sweeps(Arc::clone(&store), every, channels_after)
    });
    vec![connections, channels]
}
