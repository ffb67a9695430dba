//! Capture timestamps.
//!
//! Stamps are host wall time, the same clock every lookup is made
//! against, so a record is always findable at the instant it was taken.
//! Readings are strictly increasing at microsecond precision: a reading
//! that would not advance past the previous one (same microsecond, or the
//! host clock stepped back) is bumped one microsecond past it. Durations
//! and scheduling use `tokio::time::Instant` instead.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Mutex;

#[derive(Default)]
pub struct CaptureClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl CaptureClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the floor so the next reading is strictly after `at`.
    /// Used to continue past history persisted by an earlier run.
    pub fn observe(&self, at: DateTime<Utc>) {
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let at = truncate(at);
        if last.map_or(true, |current| current < at) {
            *last = Some(at);
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.stamp(Utc::now())
    }

    /// Turns a wall-clock reading into the next stamp.
    pub(crate) fn stamp(&self, wall: DateTime<Utc>) -> DateTime<Utc> {
        let candidate = truncate(wall);
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let reading = match *last {
            Some(previous) if candidate <= previous => previous + ChronoDuration::microseconds(1),
            _ => candidate,
        };
        *last = Some(reading);
        reading
    }
}

fn truncate(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(at.timestamp_micros()).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn wall(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn follows_wall_clock() {
        let clock = CaptureClock::new();
        assert_eq!(clock.stamp(wall(0)), wall(0));
        assert_eq!(clock.stamp(wall(5)), wall(5));
    }

    #[test]
    fn repeated_or_stepped_back_readings_still_increase() {
        let clock = CaptureClock::new();
        let first = clock.stamp(wall(10));
        let second = clock.stamp(wall(10));
        assert_eq!(second - first, ChronoDuration::microseconds(1));

        // Host clock stepped back two seconds.
        let third = clock.stamp(wall(8));
        assert_eq!(third - second, ChronoDuration::microseconds(1));

        // Once the wall clock is ahead again it is followed exactly.
        assert_eq!(clock.stamp(wall(20)), wall(20));
    }

    #[test]
    fn observed_history_sets_floor() {
        let clock = CaptureClock::new();
        clock.observe(wall(60));
        assert_eq!(clock.stamp(wall(0)), wall(60) + ChronoDuration::microseconds(1));

        // An older observation never lowers the floor.
        clock.observe(wall(0));
        assert!(clock.stamp(wall(0)) > wall(60));
    }

    #[tokio::test(start_paused = true)]
    async fn monotonic_time_does_not_move_stamps() {
        let clock = CaptureClock::new();
        tokio::time::advance(Duration::from_secs(3600)).await;
        let stamped = clock.now();
        let drift = (stamped - Utc::now()).num_seconds().abs();
        assert!(drift < 5, "stamp {stamped} is {drift}s away from wall time");
    }
}
