//! Pure liveness classification.
//!
//! Nothing here reads a clock: every function takes `now` from the caller,
//! so identical inputs always give identical answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Freshness {
    Fresh,
    Delayed,
    Stale,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Delayed => "delayed",
            Freshness::Stale => "stale",
        }
    }
}

/// Per-device classification boundaries. `warn_after < stale_after`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thresholds {
    pub warn_after: Duration,
    pub stale_after: Duration,
}

impl Thresholds {
    pub fn new(warn_after: Duration, stale_after: Duration) -> Option<Self> {
        (warn_after < stale_after).then_some(Self {
            warn_after,
            stale_after,
        })
    }
}

/// Classifies the age of the last success as seen at `now`.
///
/// A success stamped after `now` counts as zero age. No success at all is
/// always `Stale`.
pub fn classify(
    now: DateTime<Utc>,
    last_success: Option<DateTime<Utc>>,
    thresholds: &Thresholds,
) -> Freshness {
    let Some(last_success) = last_success else {
        return Freshness::Stale;
    };

    // Negative ages fail the conversion and clamp to zero.
    let elapsed = (now - last_success).to_std().unwrap_or(Duration::ZERO);
    if elapsed < thresholds.warn_after {
        Freshness::Fresh
    } else if elapsed < thresholds.stale_after {
        Freshness::Delayed
    } else {
        Freshness::Stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn thresholds() -> Thresholds {
        Thresholds::new(Duration::from_secs(30), Duration::from_secs(90)).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn boundaries_are_half_open() {
        let t = thresholds();
        assert_eq!(classify(at(29), Some(at(0)), &t), Freshness::Fresh);
        assert_eq!(classify(at(30), Some(at(0)), &t), Freshness::Delayed);
        assert_eq!(classify(at(89), Some(at(0)), &t), Freshness::Delayed);
        assert_eq!(classify(at(90), Some(at(0)), &t), Freshness::Stale);
    }

    #[test]
    fn never_succeeded_is_stale() {
        assert_eq!(classify(at(0), None, &thresholds()), Freshness::Stale);
    }

    #[test]
    fn future_success_counts_as_fresh() {
        assert_eq!(classify(at(0), Some(at(5)), &thresholds()), Freshness::Fresh);
    }

    #[test]
    fn same_inputs_same_answer() {
        let t = thresholds();
        let first = classify(at(60), Some(at(0)), &t);
        for _ in 0..10 {
            assert_eq!(classify(at(60), Some(at(0)), &t), first);
        }
    }

    #[test]
    fn thresholds_must_be_ordered() {
        assert!(Thresholds::new(Duration::from_secs(90), Duration::from_secs(30)).is_none());
        assert!(Thresholds::new(Duration::from_secs(30), Duration::from_secs(30)).is_none());
    }
}
