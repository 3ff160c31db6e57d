//! Connections: the unit of delivery.

use channelstream_proto::MessageRecord;
use chrono::NaiveDateTime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, mpsc};

use super::clock::{ActivityStamp, idle_longer_than};

/// Records are shared between every connection they are fanned out to.
pub type SharedRecord = Arc<MessageRecord>;

/// Pending records of one connection.
///
/// Any number of dispatch tasks push; one poll or socket task drains. The
/// receiver sits behind an async mutex so a second concurrent consumer
/// waits for the first instead of splitting the stream.
#[derive(Debug)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<SharedRecord>,
    rx: Mutex<mpsc::UnboundedReceiver<SharedRecord>>,
}

impl DeliveryQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Exclusive access to the consuming end.
    pub async fn consumer(&self) -> MutexGuard<'_, mpsc::UnboundedReceiver<SharedRecord>> {
        self.rx.lock().await
    }

    fn push(&self, record: &SharedRecord) -> bool {
        self.tx.send(Arc::clone(record)).is_ok()
    }
}

/// An addressable client attachment point.
///
/// Channel membership is recorded on the channels themselves; the
/// connection only knows its owner.
#[derive(Debug)]
pub struct Connection {
    pub id: String,
    pub username: String,
    last_active: ActivityStamp,
    marked_for_gc: AtomicBool,
    queue: OnceLock<DeliveryQueue>,
}

impl Connection {
    pub fn new(id: impl Into<String>, username: impl Into<String>, now: NaiveDateTime) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            last_active: ActivityStamp::new(now),
            marked_for_gc: AtomicBool::new(false),
            queue: OnceLock::new(),
        }
    }

    pub fn touch(&self, now: NaiveDateTime) {
        self.last_active.touch(now);
    }

    pub fn last_active(&self) -> NaiveDateTime {
        self.last_active.get()
    }

    pub fn mark_for_gc(&self) {
        self.marked_for_gc.store(true, Ordering::Relaxed);
    }

    pub fn clear_gc_mark(&self) {
        self.marked_for_gc.store(false, Ordering::Relaxed);
    }

    pub fn is_marked_for_gc(&self) -> bool {
        self.marked_for_gc.load(Ordering::Relaxed)
    }

    /// Explicitly disconnected, or idle longer than `threshold`.
    pub fn is_reapable(&self, now: NaiveDateTime, threshold: Duration) -> bool {
        self.is_marked_for_gc() || idle_longer_than(now, self.last_active(), threshold)
    }

    /// The delivery queue, created on first use by a consumer.
    pub fn queue(&self) -> &DeliveryQueue {
        self.queue.get_or_init(DeliveryQueue::new)
    }

    /// Enqueue a record.
    ///
    /// Returns `false` when no consumer has ever attached; the record is not
    /// kept in that case.
    pub fn deliver(&self, record: &SharedRecord) -> bool {
        match self.queue.get() {
            Some(queue) => queue.push(record),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::clock::Clock;
    use crate::state::clock::testing::ManualClock;
    use channelstream_proto::MessagePayload;

    fn record(clock: &ManualClock, body: &str) -> SharedRecord {
        let payload = MessagePayload {
            channel: Some("c".into()),
            message: serde_json::json!(body),
            ..Default::default()
        };
        Arc::new(MessageRecord::from_payload(&payload, clock.now()).unwrap())
    }

    #[tokio::test]
    async fn records_before_attach_are_not_kept() {
        let clock = ManualClock::new();
        let conn = Connection::new("c1", "alice", clock.now());

        assert!(!conn.deliver(&record(&clock, "lost")));

        let queue = conn.queue();
        assert!(conn.deliver(&record(&clock, "kept")));

        let mut rx = queue.consumer().await;
        let got = rx.try_recv().unwrap();
        assert_eq!(got.message, "kept");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reapable_when_marked_or_idle() {
        let clock = ManualClock::new();
        let conn = Connection::new("c1", "alice", clock.now());
        let threshold = Duration::from_secs(30);

        assert!(!conn.is_reapable(clock.now(), threshold));
        conn.mark_for_gc();
        assert!(conn.is_reapable(clock.now(), threshold));
        conn.clear_gc_mark();

        clock.advance(Duration::from_secs(31));
        assert!(conn.is_reapable(clock.now(), threshold));
        conn.touch(clock.now());
        assert!(!conn.is_reapable(clock.now(), threshold));
    }
}
