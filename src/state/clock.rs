//! Time source and activity stamps.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Supplies the current time for activity tracking.
pub trait Clock: Send + Sync + 'static {
    /// Current UTC time.
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Whether `since` lies further than `threshold` in the past of `now`.
pub fn idle_longer_than(now: NaiveDateTime, since: NaiveDateTime, threshold: Duration) -> bool {
    let threshold = TimeDelta::from_std(threshold).unwrap_or(TimeDelta::MAX);
    now.signed_duration_since(since) > threshold
}

/// Last-activity timestamp readable and writable without the store lock.
///
/// Stored as microseconds since the Unix epoch.
#[derive(Debug)]
pub struct ActivityStamp(AtomicI64);

impl ActivityStamp {
    pub fn new(now: NaiveDateTime) -> Self {
        Self(AtomicI64::new(now.and_utc().timestamp_micros()))
    }

    pub fn touch(&self, now: NaiveDateTime) {
        self.0
            .store(now.and_utc().timestamp_micros(), Ordering::Relaxed);
    }

    pub fn get(&self) -> NaiveDateTime {
        let micros = self.0.load(Ordering::Relaxed);
        DateTime::from_timestamp_micros(micros)
            .map(|dt| dt.naive_utc())
            .unwrap_or_default()
    }
}

#[cfg(test)]
pub mod testing {
    //! A clock tests can move forward by hand.

    use super::Clock;
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Debug)]
    pub struct ManualClock {
        now: Mutex<NaiveDateTime>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            let start = NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|d| d.and_hms_opt(12, 0, 0))
                .unwrap();
            Self {
                now: Mutex::new(start),
            }
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock();
            *now += TimeDelta::from_std(by).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> NaiveDateTime {
            *self.now.lock()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ManualClock;
    use super::*;

    #[test]
    fn stamp_round_trips_microseconds() {
        let clock = ManualClock::new();
        let stamp = ActivityStamp::new(clock.now());
        assert_eq!(stamp.get(), clock.now());

        clock.advance(Duration::from_millis(1500));
        stamp.touch(clock.now());
        assert_eq!(stamp.get(), clock.now());
    }

    #[test]
    fn idle_threshold_is_strict() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(30));
        assert!(!idle_longer_than(clock.now(), start, Duration::from_secs(30)));
        clock.advance(Duration::from_secs(1));
        assert!(idle_longer_than(clock.now(), start, Duration::from_secs(30)));
    }
}
