//! Message dispatch.

use super::Api;
use crate::error::ApiResult;
use crate::state::Store;
use crate::telemetry::OperationTimer;
use channelstream_proto::api::MessageAccepted;
use channelstream_proto::{MessagePayload, MessageRecord, ProtocolError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolve one payload to its recipients and enqueue it.
///
/// A channel target wins over `pm_users`. Unknown channels and users
/// receive nothing. Returns the number of connections that got a copy.
pub fn pass_message(store: &Store, payload: &MessagePayload) -> Result<usize, ProtocolError> {
    let record = Arc::new(MessageRecord::from_payload(payload, store.now())?);
    let mut guard = store.lock();
    let now = guard.now();

    let delivered = if let Some(name) = record.channel.as_deref() {
        match guard.channel_mut(name) {
            Some(chan) => {
                chan.add_history(&record);
                chan.last_active = now;
                chan.fan_out(&record)
            }
            None => {
                debug!(channel = %name, "Message for unknown channel dropped");
                0
            }
        }
    } else {
        let mut delivered = 0;
        for username in &record.pm_users {
            let Some(user) = guard.user_mut(username) else {
                continue;
            };
            user.last_active = now;
            for conn_id in &user.connections {
                if let Some(conn) = store.connection(conn_id)
                    && conn.deliver(&record)
                {
                    delivered += 1;
                }
            }
        }
        delivered
    };
    drop(guard);

    store.stats().message_dispatched(delivered);
    crate::metrics::record_dispatch(delivered);
    debug!(uuid = %record.uuid, delivered, "Message dispatched");
    Ok(delivered)
}

impl Api {
    /// Hand a batch to the dispatcher without waiting for delivery.
    ///
    /// Payloads naming neither a channel nor direct recipients are skipped.
    /// Each accepted payload is dispatched by its own task, so one failure
    /// never affects its siblings.
    pub fn message(&self, batch: Vec<MessagePayload>) -> ApiResult<MessageAccepted> {
        let _timer = OperationTimer::new("message");
        let mut accepted = 0;
        for payload in batch {
            if !payload.has_recipients() {
                crate::metrics::record_rejected("no_recipients");
                continue;
            }
            accepted += 1;
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                if let Err(e) = pass_message(&store, &payload) {
                    crate::metrics::record_rejected(e.error_code());
                    warn!(error = %e, "Message dropped");
                }
            });
        }
        Ok(MessageAccepted { accepted })
    }
}
