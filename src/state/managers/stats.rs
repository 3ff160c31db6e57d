//! Runtime statistics manager.
//!
//! Provides atomic counters for the admin report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Manages server runtime statistics with atomic counters.
///
/// All counters are thread-safe and use relaxed ordering for performance.
/// Exact consistency is not required for statistics.
#[derive(Debug)]
pub struct StatsManager {
    /// Record copies enqueued on connections.
    total_messages: AtomicU64,
    /// Messages resolved by the dispatcher.
    total_unique_messages: AtomicU64,
    /// Server startup time.
    started_at: Instant,
}

impl Default for StatsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsManager {
    /// Create a new stats manager.
    pub fn new() -> Self {
        Self {
            total_messages: AtomicU64::new(0),
            total_unique_messages: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Count one dispatched message and the copies it produced.
    pub fn message_dispatched(&self, delivered: usize) {
        self.total_unique_messages.fetch_add(1, Ordering::Relaxed);
        self.total_messages
            .fetch_add(delivered as u64, Ordering::Relaxed);
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    pub fn total_unique_messages(&self) -> u64 {
        self.total_unique_messages.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_messages_and_copies() {
        let stats = StatsManager::new();
        stats.message_dispatched(3);
        stats.message_dispatched(0);

        assert_eq!(stats.total_unique_messages(), 2);
        assert_eq!(stats.total_messages(), 3);
    }
}
