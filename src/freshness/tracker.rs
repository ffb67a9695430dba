use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::db::CaptureEvent;

use super::evaluator::{classify, Freshness, Thresholds};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessState {
    pub device_id: String,
    pub last_success: Option<DateTime<Utc>>,
    /// Classification as of the most recent event.
    pub classification: Freshness,
    pub consecutive_failures: u32,
    pub last_event_at: Option<DateTime<Utc>>,
    pub attempts: u64,
}

impl FreshnessState {
    fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            last_success: None,
            classification: Freshness::Stale,
            consecutive_failures: 0,
            last_event_at: None,
            attempts: 0,
        }
    }
}

struct DeviceEntry {
    thresholds: Thresholds,
    state: RwLock<FreshnessState>,
}

/// Liveness state for every configured device.
///
/// The device set is fixed at construction, so the map itself is never
/// locked; each device has its own lock and writers for one device never
/// block readers of another.
pub struct FreshnessTracker {
    devices: HashMap<String, DeviceEntry>,
}

impl FreshnessTracker {
    pub fn new<'a, I>(devices: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Thresholds)>,
    {
        let devices = devices
            .into_iter()
            .map(|(id, thresholds)| {
                (
                    id.to_string(),
                    DeviceEntry {
                        thresholds,
                        state: RwLock::new(FreshnessState::new(id)),
                    },
                )
            })
            .collect();
        Self { devices }
    }

    /// Seeds the last success from persisted history, e.g. after a restart.
    /// Newer successes already recorded win.
    pub fn seed_last_success(&self, device_id: &str, last_success: DateTime<Utc>) {
        let Some(entry) = self.devices.get(device_id) else {
            return;
        };
        let mut state = write(&entry.state);
        if state.last_success.map_or(true, |current| current < last_success) {
            state.last_success = Some(last_success);
        }
    }

    /// Applies one capture event. Returns the updated state, or `None` for an
    /// unknown device.
    pub fn record(&self, event: &CaptureEvent) -> Option<FreshnessState> {
        let entry = self.devices.get(&event.device_id)?;
        let mut state = write(&entry.state);

        if event.is_success() {
            state.consecutive_failures = 0;
            if state.last_success.map_or(true, |current| current < event.started_at) {
                state.last_success = Some(event.started_at);
            }
        } else if event.outcome.is_device_failure() {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        }
        // Discarded: the device did its part, the streak neither grows nor
        // resets.

        state.attempts = state.attempts.saturating_add(1);
        state.last_event_at = Some(event.started_at);
        state.classification = classify(event.finished_at, state.last_success, &entry.thresholds);
        Some(state.clone())
    }

    pub fn snapshot(&self, device_id: &str) -> Option<FreshnessState> {
        self.devices
            .get(device_id)
            .map(|entry| read(&entry.state).clone())
    }

    pub fn thresholds(&self, device_id: &str) -> Option<Thresholds> {
        self.devices.get(device_id).map(|entry| entry.thresholds)
    }

    pub fn consecutive_failures(&self, device_id: &str) -> u32 {
        self.devices
            .get(device_id)
            .map_or(0, |entry| read(&entry.state).consecutive_failures)
    }

    /// Live classification of the device at `now`. Unknown devices are stale.
    pub fn evaluate(&self, device_id: &str, now: DateTime<Utc>) -> Freshness {
        match self.devices.get(device_id) {
            Some(entry) => classify(now, read(&entry.state).last_success, &entry.thresholds),
            None => Freshness::Stale,
        }
    }
}

fn read(lock: &RwLock<FreshnessState>) -> RwLockReadGuard<'_, FreshnessState> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(lock: &RwLock<FreshnessState>) -> RwLockWriteGuard<'_, FreshnessState> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CaptureOutcome;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(secs: i64, outcome: CaptureOutcome) -> CaptureEvent {
        CaptureEvent {
            id: None,
            attempt_id: format!("attempt-{secs}"),
            device_id: "porch".to_string(),
            started_at: at(secs),
            finished_at: at(secs) + ChronoDuration::milliseconds(100),
            outcome,
            size_bytes: None,
            record_id: None,
            error: None,
        }
    }

    fn tracker() -> FreshnessTracker {
        let thresholds =
            Thresholds::new(Duration::from_secs(30), Duration::from_secs(90)).unwrap();
        FreshnessTracker::new([("porch", thresholds)])
    }

    #[test]
    fn failures_count_up_and_success_resets() {
        let tracker = tracker();
        for secs in [0, 5, 10] {
            tracker.record(&event(secs, CaptureOutcome::Timeout));
        }
        assert_eq!(tracker.consecutive_failures("porch"), 3);

        let state = tracker.record(&event(15, CaptureOutcome::Success)).unwrap();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_success, Some(at(15)));
        assert_eq!(state.classification, Freshness::Fresh);
        assert_eq!(state.attempts, 4);
    }

    #[test]
    fn discarded_leaves_streak_alone() {
        let tracker = tracker();
        tracker.record(&event(0, CaptureOutcome::TransportError));
        tracker.record(&event(5, CaptureOutcome::Discarded));
        let state = tracker.snapshot("porch").unwrap();
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.last_success, None);
        assert_eq!(state.classification, Freshness::Stale);
    }

    #[test]
    fn evaluate_uses_callers_now() {
        let tracker = tracker();
        assert_eq!(tracker.evaluate("porch", at(0)), Freshness::Stale);
        tracker.record(&event(0, CaptureOutcome::Success));
        assert_eq!(tracker.evaluate("porch", at(20)), Freshness::Fresh);
        assert_eq!(tracker.evaluate("porch", at(60)), Freshness::Delayed);
        assert_eq!(tracker.evaluate("porch", at(100)), Freshness::Stale);
        assert_eq!(tracker.evaluate("garage", at(0)), Freshness::Stale);
    }

    #[test]
    fn seeding_never_moves_backwards() {
        let tracker = tracker();
        tracker.record(&event(50, CaptureOutcome::Success));
        tracker.seed_last_success("porch", at(10));
        assert_eq!(tracker.snapshot("porch").unwrap().last_success, Some(at(50)));
        assert!(tracker.record(&CaptureEvent {
            device_id: "garage".into(),
            ..event(60, CaptureOutcome::Success)
        })
        .is_none());
    }
}
