use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard,
};
use thiserror::Error;

use crate::clock::CaptureClock;
use crate::config::Device;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DevicePhase {
    Idle,
    Capturing,
    Succeeded,
    Failed,
}

impl Default for DevicePhase {
    fn default() -> Self {
        DevicePhase::Idle
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("a capture for device '{0}' is already in flight")]
    CaptureBusy(String),

    #[error("unknown device '{0}'")]
    UnknownDevice(String),
}

/// Everything one device's attempts share, whether they come from the
/// polling loop or an on-demand trigger.
pub(crate) struct DeviceSlot {
    pub(crate) device: Device,
    pub(crate) clock: CaptureClock,
    in_flight: AtomicBool,
    phase: Mutex<DevicePhase>,
    last_hash: Mutex<Option<String>>,
}

impl DeviceSlot {
    pub(crate) fn new(device: Device, clock: CaptureClock) -> Self {
        Self {
            device,
            clock,
            in_flight: AtomicBool::new(false),
            phase: Mutex::new(DevicePhase::Idle),
            last_hash: Mutex::new(None),
        }
    }

    /// Claims the device for one attempt. Fails if another attempt holds it.
    pub(crate) fn try_begin(&self) -> Result<InFlightGuard<'_>, TriggerError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TriggerError::CaptureBusy(self.device.id.clone()));
        }
        self.set_phase(DevicePhase::Capturing);
        Ok(InFlightGuard { slot: self })
    }

    pub(crate) fn phase(&self) -> DevicePhase {
        *lock(&self.phase)
    }

    pub(crate) fn set_phase(&self, phase: DevicePhase) {
        *lock(&self.phase) = phase;
    }

    /// Stores `hash` as the latest frame hash and returns the previous one.
    pub(crate) fn swap_last_hash(&self, hash: String) -> Option<String> {
        lock(&self.last_hash).replace(hash)
    }
}

/// Held for the lifetime of one attempt; releasing it returns the device
/// to `Idle`.
pub(crate) struct InFlightGuard<'a> {
    slot: &'a DeviceSlot,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.slot.set_phase(DevicePhase::Idle);
        self.slot.in_flight.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::test_support::device;

    #[test]
    fn second_claim_is_refused_until_release() {
        let slot = DeviceSlot::new(device("porch"), CaptureClock::new());
        let guard = slot.try_begin().unwrap();
        assert_eq!(slot.phase(), DevicePhase::Capturing);
        assert_eq!(
            slot.try_begin().err(),
            Some(TriggerError::CaptureBusy("porch".into()))
        );

        drop(guard);
        assert_eq!(slot.phase(), DevicePhase::Idle);
        assert!(slot.try_begin().is_ok());
    }

    #[test]
    fn remembers_previous_hash() {
        let slot = DeviceSlot::new(device("porch"), CaptureClock::new());
        assert_eq!(slot.swap_last_hash("a".into()), None);
        assert_eq!(slot.swap_last_hash("b".into()), Some("a".into()));
    }
}
