//! Per-device capture scheduling.
//!
//! Each device gets one polling task. Attempts for a device are
//! single-flight whether they come from the loop or from
//! [`CaptureController::trigger`]; every attempt ends in exactly one
//! [`crate::db::CaptureEvent`].

mod attempt;
pub mod backoff;
mod controller;
mod loop_worker;
mod state;

pub use backoff::next_delay;
pub use controller::CaptureController;
pub use state::{DevicePhase, TriggerError};

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };
    use tokio::time::Instant;

    use crate::camera::{CameraClient, CaptureError, DeviceStatus};
    use crate::config::Device;
    use crate::db::Database;
    use crate::freshness::Thresholds;
    use crate::store::ImageStore;

    pub(crate) fn device(id: &str) -> Device {
        Device {
            id: id.into(),
            capture_url: "http://127.0.0.1/capture".into(),
            status_url: None,
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            thresholds: Thresholds::new(Duration::from_secs(30), Duration::from_secs(90)).unwrap(),
            rotation: None,
        }
    }

    pub(crate) fn store() -> (tempfile::TempDir, ImageStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("db.sqlite3")).unwrap();
        let store = ImageStore::new(db, dir.path().join("images")).unwrap();
        (dir, store)
    }

    /// Scripted camera. Queued results are served first, then `frame`.
    pub(crate) struct FakeCamera {
        frame: Vec<u8>,
        script: Mutex<VecDeque<Result<Vec<u8>, CaptureError>>>,
        status: Option<DeviceStatus>,
        delay: Duration,
        calls: Mutex<Vec<Instant>>,
        attempt_ids: Mutex<Vec<String>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl FakeCamera {
        pub(crate) fn new(frame: Vec<u8>) -> Self {
            Self {
                frame,
                script: Mutex::new(VecDeque::new()),
                status: None,
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
                attempt_ids: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn with_status(mut self, status: DeviceStatus) -> Self {
            self.status = Some(status);
            self
        }

        pub(crate) fn push(&self, result: Result<Vec<u8>, CaptureError>) {
            self.script.lock().unwrap().push_back(result);
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Call instants relative to the first call.
        pub(crate) fn call_offsets(&self) -> Vec<Duration> {
            let calls = self.calls.lock().unwrap();
            let Some(first) = calls.first().copied() else {
                return Vec::new();
            };
            calls.iter().map(|at| *at - first).collect()
        }

        pub(crate) fn attempt_ids(&self) -> Vec<String> {
            self.attempt_ids.lock().unwrap().clone()
        }

        pub(crate) fn max_concurrency(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CameraClient for FakeCamera {
        async fn capture(&self, _device: &Device, attempt_id: &str) -> Result<Vec<u8>, CaptureError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.attempt_ids.lock().unwrap().push(attempt_id.to_string());
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();

            self.active.fetch_sub(1, Ordering::SeqCst);
            next.unwrap_or_else(|| Ok(self.frame.clone()))
        }

        async fn status(&self, _device: &Device) -> Result<DeviceStatus, CaptureError> {
            self.status
                .clone()
                .ok_or_else(|| CaptureError::ProtocolError("no status".into()))
        }
    }
}
