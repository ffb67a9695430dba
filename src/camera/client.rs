use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::Device;
use crate::db::CaptureOutcome;
use crate::error::FailureClass;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaptureError {
    /// The attempt hit the device's hard timeout.
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),

    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected device response: {0}")]
    ProtocolError(String),

    #[error("device busy: {0}")]
    DeviceBusy(String),
}

impl CaptureError {
    pub fn outcome(&self) -> CaptureOutcome {
        match self {
            CaptureError::Timeout(_) => CaptureOutcome::Timeout,
            CaptureError::Unreachable(_) => CaptureOutcome::TransportError,
            CaptureError::ProtocolError(_) | CaptureError::DeviceBusy(_) => {
                CaptureOutcome::DeviceError
            }
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            CaptureError::Timeout(_) | CaptureError::Unreachable(_) => {
                FailureClass::TransportFailure
            }
            CaptureError::ProtocolError(_) | CaptureError::DeviceBusy(_) => {
                FailureClass::ProtocolFailure
            }
        }
    }
}

/// Health report from a device's status endpoint.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DeviceStatus {
    pub framesize: Option<String>,
    pub raw: serde_json::Value,
}

/// Transport to one kind of camera.
///
/// Implementations make exactly one outbound call per method invocation,
/// never retry, and keep no state between calls. Every call must return
/// within `device.timeout`.
#[async_trait]
pub trait CameraClient: Send + Sync {
    async fn capture(&self, device: &Device, attempt_id: &str) -> Result<Vec<u8>, CaptureError>;

    async fn status(&self, device: &Device) -> Result<DeviceStatus, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_unreachable_stay_distinct() {
        let timeout = CaptureError::Timeout(Duration::from_secs(5));
        let down = CaptureError::Unreachable("connection refused".into());
        assert_eq!(timeout.outcome(), CaptureOutcome::Timeout);
        assert_eq!(down.outcome(), CaptureOutcome::TransportError);
        assert_eq!(timeout.class(), down.class());
        assert_eq!(
            CaptureError::DeviceBusy("503".into()).class(),
            FailureClass::ProtocolFailure
        );
    }
}
