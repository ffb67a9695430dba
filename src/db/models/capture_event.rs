//! Capture attempt log model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CaptureOutcome {
    Success,
    Timeout,
    TransportError,
    DeviceError,
    /// The device answered with a frame but the store did not keep it.
    Discarded,
}

impl CaptureOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureOutcome::Success => "success",
            CaptureOutcome::Timeout => "timeout",
            CaptureOutcome::TransportError => "transport_error",
            CaptureOutcome::DeviceError => "device_error",
            CaptureOutcome::Discarded => "discarded",
        }
    }

    /// True for outcomes that count against the device's failure streak.
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            CaptureOutcome::Timeout | CaptureOutcome::TransportError | CaptureOutcome::DeviceError
        )
    }
}

/// One capture attempt against one device. Never mutated once emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureEvent {
    pub id: Option<i64>,
    pub attempt_id: String,
    pub device_id: String,
    /// Attempt start on the monotonic capture clock.
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: CaptureOutcome,
    pub size_bytes: Option<u64>,
    /// Set only for `Success`.
    pub record_id: Option<String>,
    pub error: Option<String>,
}

impl CaptureEvent {
    pub fn is_success(&self) -> bool {
        self.outcome == CaptureOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_device_side_outcomes_count_as_failures() {
        let failing: Vec<_> = [
            CaptureOutcome::Success,
            CaptureOutcome::Timeout,
            CaptureOutcome::TransportError,
            CaptureOutcome::DeviceError,
            CaptureOutcome::Discarded,
        ]
        .into_iter()
        .filter(CaptureOutcome::is_device_failure)
        .collect();
        assert_eq!(
            failing,
            vec![
                CaptureOutcome::Timeout,
                CaptureOutcome::TransportError,
                CaptureOutcome::DeviceError
            ]
        );
    }
}
