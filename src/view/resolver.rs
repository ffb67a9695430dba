use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Serialize, Serializer};
use std::{sync::Arc, time::Duration};

use crate::config::Viewpoint;
use crate::db::ImageRecord;
use crate::freshness::{classify, Freshness, FreshnessTracker};
use crate::store::{ImageStore, StoreError};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_error;

/// What one viewpoint shows right now.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedView {
    pub label: String,
    pub device_id: String,
    #[serde(rename = "delaySecs", serialize_with = "serialize_secs")]
    pub delay: Duration,
    /// `now - delay`: the instant this viewpoint looks at.
    pub target: DateTime<Utc>,
    pub image: Option<ImageRecord>,
    /// Freshness of `image` as seen from `target`.
    pub classification: Freshness,
    /// Capture time of `image`, which may be earlier than `target`.
    pub effective_timestamp: Option<DateTime<Utc>>,
    /// Live classification of the device, independent of the delay.
    pub device_freshness: Freshness,
}

/// Read side of the pipeline. Holds no state of its own; every call reads
/// the store and the tracker afresh.
#[derive(Clone)]
pub struct ViewResolver {
    store: ImageStore,
    tracker: Arc<FreshnessTracker>,
    viewpoints: Vec<Viewpoint>,
}

impl ViewResolver {
    pub fn new(store: ImageStore, tracker: Arc<FreshnessTracker>, viewpoints: Vec<Viewpoint>) -> Self {
        Self {
            store,
            tracker,
            viewpoints,
        }
    }

    pub fn viewpoints(&self) -> &[Viewpoint] {
        &self.viewpoints
    }

    /// Picks the newest image at or before `now - delay`.
    ///
    /// The image is classified by its age at the target instant, so a
    /// deliberate delay does not make a view stale but a device that had
    /// already stopped by then does. Never fails: a store error yields an
    /// empty, stale view.
    pub async fn resolve(&self, viewpoint: &Viewpoint, now: DateTime<Utc>) -> ResolvedView {
        let target = target_for(now, viewpoint.delay);
        let device_freshness = self.tracker.evaluate(&viewpoint.device_id, now);

        let image = match self.store.at_or_before(&viewpoint.device_id, target).await {
            Ok(image) => image,
            Err(err) => {
                log_error!(
                    "failed to resolve '{}' for {} at {target}: {err}",
                    viewpoint.label,
                    viewpoint.device_id
                );
                None
            }
        };

        let effective_timestamp = image.as_ref().map(|record| record.captured_at);
        let classification = match (effective_timestamp, self.tracker.thresholds(&viewpoint.device_id)) {
            (Some(effective), Some(thresholds)) => classify(target, Some(effective), &thresholds),
            _ => Freshness::Stale,
        };

        ResolvedView {
            label: viewpoint.label.clone(),
            device_id: viewpoint.device_id.clone(),
            delay: viewpoint.delay,
            target,
            image,
            classification,
            effective_timestamp,
            device_freshness,
        }
    }

    pub async fn resolve_all(&self, now: DateTime<Utc>) -> Vec<ResolvedView> {
        let mut views = Vec::with_capacity(self.viewpoints.len());
        for viewpoint in &self.viewpoints {
            views.push(self.resolve(viewpoint, now).await);
        }
        views
    }

    pub async fn most_recent(&self, device_id: &str) -> Result<Option<ImageRecord>, StoreError> {
        self.store.most_recent(device_id).await
    }

    pub async fn at_or_before(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ImageRecord>, StoreError> {
        self.store.at_or_before(device_id, at).await
    }

    pub async fn in_range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ImageRecord>, StoreError> {
        self.store.in_range(device_id, from, to).await
    }
}

fn target_for(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_sub_signed(delay))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn serialize_secs<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(delay.as_secs())
}
