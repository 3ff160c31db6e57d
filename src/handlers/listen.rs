//! Long-poll delivery.

use super::{Api, observe, required};
use crate::error::{ApiError, ApiResult};
use crate::state::{DeliveryQueue, SharedRecord};
use crate::telemetry::{OperationTimer, spans};
use channelstream_proto::MessageRecord;
use channelstream_proto::api::ListenQuery;
use std::time::Duration;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{Instrument, debug, error};

/// Drain a delivery queue the way a poll does.
///
/// Waits up to `wake_after` for the first record and returns an empty batch
/// if none arrives. The wait includes time spent behind another poll still
/// holding the queue. After that, keeps receiving until `drain_window` passes
/// without a new record.
pub async fn collect_batch(
    queue: &DeliveryQueue,
    wake_after: Duration,
    drain_window: Duration,
) -> Vec<SharedRecord> {
    let deadline = Instant::now() + wake_after;
    let mut batch = Vec::new();
    let Ok(mut rx) = timeout_at(deadline, queue.consumer()).await else {
        return batch;
    };

    match timeout_at(deadline, rx.recv()).await {
        Ok(Some(record)) => batch.push(record),
        _ => return batch,
    }
    while let Ok(Some(record)) = timeout(drain_window, rx.recv()).await {
        batch.push(record);
    }
    batch
}

/// JSONP callback names may only contain `[A-Za-z0-9_$.]`.
pub fn validate_callback(callback: &str) -> ApiResult<()> {
    let valid = callback
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ApiError::invalid(format!("invalid callback name: {callback}")))
    }
}

/// Encode a batch as a JSON array, wrapped in `callback(...)` when given.
pub fn render_batch(batch: &[SharedRecord], callback: Option<&str>) -> String {
    let records: Vec<&MessageRecord> = batch.iter().map(|r| r.as_ref()).collect();
    let body = serde_json::to_string(&records).unwrap_or_else(|e| {
        error!(error = %e, "Failed to encode delivery batch");
        "[]".to_string()
    });
    match callback {
        Some(cb) => format!("{cb}({body})"),
        None => body,
    }
}

impl Api {
    /// Long-poll a connection's queue and return the rendered batch.
    pub async fn listen(&self, query: ListenQuery) -> ApiResult<String> {
        let _timer = OperationTimer::new("listen");
        let span = spans::operation("listen", query.conn_id.as_deref());
        let result = self.listen_inner(query).instrument(span).await;
        observe("listen", result)
    }

    async fn listen_inner(&self, query: ListenQuery) -> ApiResult<String> {
        let conn_id = required(query.conn_id, "conn_id")?;
        let callback = query.callback.filter(|cb| !cb.is_empty());
        if let Some(cb) = callback.as_deref() {
            validate_callback(cb)?;
        }
        let conn = self
            .store
            .connection(&conn_id)
            .ok_or_else(|| ApiError::UnknownConnection(conn_id.clone()))?;

        conn.touch(self.store.now());
        let batch = collect_batch(conn.queue(), self.wake_after, self.drain_window).await;
        // The poll itself may have outlasted the idle threshold.
        conn.touch(self.store.now());

        debug!(conn_id = %conn_id, records = batch.len(), "Poll answered");
        Ok(render_batch(&batch, callback.as_deref()))
    }
}
