use std::convert::TryFrom;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::db::models::CaptureOutcome;

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

/// Timestamps are keyed by whole microseconds since the Unix epoch.
pub fn to_micros(value: &DateTime<Utc>) -> i64 {
    value.timestamp_micros()
}

pub fn from_micros(value: i64, field: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| anyhow!("{field} is not a representable timestamp: {value}"))
}

pub fn parse_outcome(value: &str) -> Result<CaptureOutcome> {
    match value {
        "success" => Ok(CaptureOutcome::Success),
        "timeout" => Ok(CaptureOutcome::Timeout),
        "transport_error" => Ok(CaptureOutcome::TransportError),
        "device_error" => Ok(CaptureOutcome::DeviceError),
        "discarded" => Ok(CaptureOutcome::Discarded),
        other => Err(anyhow!("unknown capture outcome {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_round_trip_keeps_precision() {
        let now = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        assert_eq!(from_micros(to_micros(&now), "t").unwrap(), now);
    }

    #[test]
    fn rejects_unknown_outcome() {
        assert!(parse_outcome("exploded").is_err());
        assert_eq!(parse_outcome("timeout").unwrap(), CaptureOutcome::Timeout);
    }
}
