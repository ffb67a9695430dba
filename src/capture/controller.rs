use anyhow::{bail, Context, Result};
use log::info;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::camera::CameraClient;
use crate::clock::CaptureClock;
use crate::config::Config;
use crate::db::CaptureEvent;
use crate::freshness::FreshnessTracker;
use crate::store::ImageStore;

use super::attempt::{run_attempt, Pipeline};
use super::loop_worker::capture_loop;
use super::state::{DevicePhase, DeviceSlot, TriggerError};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Owns one polling task per configured device.
pub struct CaptureController {
    pipeline: Arc<Pipeline>,
    slots: HashMap<String, Arc<DeviceSlot>>,
    recording_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl CaptureController {
    pub fn new(
        config: &Config,
        client: Arc<dyn CameraClient>,
        store: ImageStore,
        tracker: Arc<FreshnessTracker>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (recording_tx, _) = watch::channel(true);
        let slots = config
            .devices
            .iter()
            .map(|device| {
                (
                    device.id.clone(),
                    Arc::new(DeviceSlot::new(device.clone(), CaptureClock::new())),
                )
            })
            .collect();

        Self {
            pipeline: Arc::new(Pipeline {
                client,
                store,
                tracker,
                events,
            }),
            slots,
            recording_tx,
            handles: Vec::new(),
            cancel_token: None,
        }
    }

    /// Continues from persisted history: each device's clock starts after
    /// its newest record and its freshness starts from that record.
    pub async fn seed_from_store(&self) -> Result<()> {
        for (device_id, slot) in &self.slots {
            let latest = self
                .pipeline
                .store
                .most_recent(device_id)
                .await
                .with_context(|| format!("failed to read latest record for {device_id}"))?;
            if let Some(record) = latest {
                slot.clock.observe(record.captured_at);
                self.pipeline
                    .tracker
                    .seed_last_success(device_id, record.captured_at);
            }
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.cancel_token.is_some() {
            bail!("capture already running");
        }

        let cancel_token = CancellationToken::new();
        for slot in self.slots.values() {
            let handle = tokio::spawn(capture_loop(
                Arc::clone(&self.pipeline),
                Arc::clone(slot),
                self.recording_tx.subscribe(),
                cancel_token.clone(),
            ));
            self.handles.push(handle);
        }
        info!("capture started for {} device(s)", self.slots.len());
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Stops contacting devices until [`resume`](Self::resume). Attempts
    /// already in flight finish.
    pub fn pause(&self) {
        self.recording_tx.send_replace(false);
        info!("recording paused");
    }

    pub fn resume(&self) {
        self.recording_tx.send_replace(true);
        info!("recording resumed");
    }

    pub fn is_recording(&self) -> bool {
        *self.recording_tx.borrow()
    }

    /// One on-demand attempt outside the polling cadence.
    pub async fn trigger(&self, device_id: &str) -> Result<CaptureEvent, TriggerError> {
        let slot = self
            .slots
            .get(device_id)
            .ok_or_else(|| TriggerError::UnknownDevice(device_id.to_string()))?;
        run_attempt(&self.pipeline, slot).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.pipeline.events.subscribe()
    }

    pub fn phase(&self, device_id: &str) -> Option<DevicePhase> {
        self.slots.get(device_id).map(|slot| slot.phase())
    }

    pub fn tracker(&self) -> &Arc<FreshnessTracker> {
        &self.pipeline.tracker
    }

    /// Cancels every loop and waits for in-flight attempts to finish.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        for handle in self.handles.drain(..) {
            handle.await.context("capture loop task failed to join")?;
        }
        Ok(())
    }
}
