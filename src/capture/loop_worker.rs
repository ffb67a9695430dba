use std::sync::Arc;
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;

use super::attempt::{run_attempt, Pipeline};
use super::backoff::next_delay;
use super::state::{DeviceSlot, TriggerError};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Polls one device until cancelled.
///
/// Attempts are scheduled from the previous attempt's start so slow
/// devices do not drift. Cancellation and pausing are only observed
/// between attempts; an attempt that has started always runs to the end.
pub(crate) async fn capture_loop(
    pipeline: Arc<Pipeline>,
    slot: Arc<DeviceSlot>,
    mut recording: watch::Receiver<bool>,
    cancel_token: CancellationToken,
) {
    let device = &slot.device;
    log_info!(
        "{}: capture loop started (every {:?}, backoff up to {:?})",
        device.id,
        device.poll_interval,
        device.max_backoff
    );

    let mut next_attempt = Instant::now();

    loop {
        if !*recording.borrow_and_update() {
            log_debug!("{}: recording paused", device.id);
            tokio::select! {
                changed = recording.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = cancel_token.cancelled() => break,
            }
        }

        tokio::select! {
            _ = tokio::time::sleep_until(next_attempt) => {}
            changed = recording.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = cancel_token.cancelled() => break,
        }

        let attempt_start = Instant::now();
        match run_attempt(&pipeline, &slot).await {
            Ok(_) => {}
            Err(TriggerError::CaptureBusy(_)) => {
                log_debug!("{}: on-demand capture in flight, skipping poll", device.id);
            }
            Err(TriggerError::UnknownDevice(_)) => break,
        }

        let failures = pipeline.tracker.consecutive_failures(&device.id);
        let delay = next_delay(device.poll_interval, device.max_backoff, failures);
        if failures > 0 {
            log_debug!("{}: {failures} consecutive failures, retrying in {delay:?}", device.id);
        }
        next_attempt = attempt_start + delay;
    }

    log_info!("{}: capture loop shutting down", device.id);
}
