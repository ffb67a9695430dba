use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, time::Instant};
use uuid::Uuid;

use crate::camera::{hash_distance, inspect_frame, CameraClient, CaptureError};
use crate::db::{CaptureEvent, CaptureOutcome, ImageMetadata};
use crate::error::FailureClass;
use crate::freshness::FreshnessTracker;
use crate::store::{ImageStore, StoreError};

use super::state::{DevicePhase, DeviceSlot, TriggerError};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Collaborators every attempt writes through.
pub(crate) struct Pipeline {
    pub(crate) client: Arc<dyn CameraClient>,
    pub(crate) store: ImageStore,
    pub(crate) tracker: Arc<FreshnessTracker>,
    pub(crate) events: broadcast::Sender<CaptureEvent>,
}

enum Attempt {
    Stored { record_id: String, size_bytes: u64 },
    Rejected { err: StoreError, size_bytes: u64 },
    Failed(CaptureError),
}

/// Runs one capture attempt end to end and returns the event it produced.
///
/// Refuses with `CaptureBusy` if the device already has an attempt in
/// flight. Every other failure is folded into the returned event.
pub(crate) async fn run_attempt(
    pipeline: &Pipeline,
    slot: &DeviceSlot,
) -> Result<CaptureEvent, TriggerError> {
    let _guard = slot.try_begin()?;
    let device = &slot.device;

    let started = Instant::now();
    let started_at = slot.clock.now();
    let attempt_id = Uuid::new_v4().to_string();

    let captured = match tokio::time::timeout(
        device.timeout,
        pipeline.client.capture(device, &attempt_id),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(CaptureError::Timeout(device.timeout)),
    };

    let attempt = match captured {
        Ok(bytes) => keep_frame(pipeline, slot, &attempt_id, started_at, bytes).await,
        Err(err) => Attempt::Failed(err),
    };

    let finished_at = started_at
        .checked_add_signed(elapsed_since(started))
        .unwrap_or(started_at);
    let event = match attempt {
        Attempt::Stored {
            record_id,
            size_bytes,
        } => {
            slot.set_phase(DevicePhase::Succeeded);
            log_debug!(
                "{}: captured {} bytes in {}ms",
                device.id,
                size_bytes,
                (finished_at - started_at).num_milliseconds()
            );
            CaptureEvent {
                id: None,
                attempt_id,
                device_id: device.id.clone(),
                started_at,
                finished_at,
                outcome: CaptureOutcome::Success,
                size_bytes: Some(size_bytes),
                record_id: Some(record_id),
                error: None,
            }
        }
        Attempt::Rejected { err, size_bytes } => {
            slot.set_phase(DevicePhase::Failed);
            match err.class() {
                FailureClass::InvariantViolation => {
                    log_error!("{}: discarding capture at {started_at}: {err}", device.id)
                }
                _ => log_error!("{}: could not persist capture at {started_at}: {err}", device.id),
            }
            CaptureEvent {
                id: None,
                attempt_id,
                device_id: device.id.clone(),
                started_at,
                finished_at,
                outcome: CaptureOutcome::Discarded,
                size_bytes: Some(size_bytes),
                record_id: None,
                error: Some(err.to_string()),
            }
        }
        Attempt::Failed(err) => {
            slot.set_phase(DevicePhase::Failed);
            match err.class() {
                FailureClass::ProtocolFailure => log_error!("{}: capture failed: {err}", device.id),
                _ => log_warn!("{}: capture failed: {err}", device.id),
            }
            CaptureEvent {
                id: None,
                attempt_id,
                device_id: device.id.clone(),
                started_at,
                finished_at,
                outcome: err.outcome(),
                size_bytes: None,
                record_id: None,
                error: Some(err.to_string()),
            }
        }
    };

    Ok(publish(pipeline, event).await)
}

async fn keep_frame(
    pipeline: &Pipeline,
    slot: &DeviceSlot,
    attempt_id: &str,
    started_at: DateTime<Utc>,
    bytes: Vec<u8>,
) -> Attempt {
    let device = &slot.device;
    let rotation = device.rotation;

    let frame = match tokio::task::spawn_blocking(move || inspect_frame(bytes, rotation)).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(err)) => return Attempt::Failed(err),
        Err(err) => {
            return Attempt::Failed(CaptureError::ProtocolError(format!(
                "frame inspection worker failed: {err}"
            )))
        }
    };

    if let Some(previous) = slot.swap_last_hash(frame.content_hash.clone()) {
        if hash_distance(&previous, &frame.content_hash) == 0 {
            log_warn!("{}: frame identical to the previous capture, camera may be frozen", device.id);
        }
    }

    let framesize = match device.status_url {
        Some(_) => query_framesize(pipeline, slot).await,
        None => None,
    };

    let size_bytes = frame.bytes.len() as u64;
    let metadata = ImageMetadata {
        size_bytes,
        content_hash: Some(frame.content_hash),
        width: Some(frame.width),
        height: Some(frame.height),
        framesize,
    };

    match pipeline
        .store
        .write_as(attempt_id, &device.id, started_at, frame.bytes, metadata)
        .await
    {
        Ok(record_id) => Attempt::Stored {
            record_id,
            size_bytes,
        },
        Err(err) => Attempt::Rejected { err, size_bytes },
    }
}

/// Frame size from the status endpoint. A failing status call never costs
/// the frame.
async fn query_framesize(pipeline: &Pipeline, slot: &DeviceSlot) -> Option<String> {
    let device = &slot.device;
    match tokio::time::timeout(device.timeout, pipeline.client.status(device)).await {
        Ok(Ok(status)) => status.framesize,
        Ok(Err(err)) => {
            log_warn!("{}: status query failed: {err}", device.id);
            None
        }
        Err(_) => {
            log_warn!("{}: status query timed out after {:?}", device.id, device.timeout);
            None
        }
    }
}

/// Appends the event to the capture log, folds it into freshness and
/// broadcasts it. Logging failures are reported but never block the rest.
async fn publish(pipeline: &Pipeline, mut event: CaptureEvent) -> CaptureEvent {
    match pipeline.store.database().insert_capture_event(&event).await {
        Ok(id) => event.id = Some(id),
        Err(err) => log_error!("{}: failed to log capture event: {err:#}", event.device_id),
    }

    if let Some(state) = pipeline.tracker.record(&event) {
        if state.consecutive_failures > 0 && state.consecutive_failures % 10 == 0 {
            log_info!(
                "{}: {} consecutive failures, last success {:?}",
                event.device_id,
                state.consecutive_failures,
                state.last_success
            );
        }
    }

    // No subscribers is not an error.
    let _ = pipeline.events.send(event.clone());
    event
}

fn elapsed_since(started: Instant) -> ChronoDuration {
    let elapsed: Duration = started.elapsed();
    ChronoDuration::from_std(elapsed).unwrap_or(ChronoDuration::MAX)
}
