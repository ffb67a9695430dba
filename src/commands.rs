//! Handlers behind each CLI subcommand. Query commands print JSON to
//! stdout; logs go to stderr.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::{collections::HashMap, io::Write, path::Path, sync::Arc};
use tokio::sync::broadcast::error::RecvError;

use crate::camera::HttpCameraClient;
use crate::capture::CaptureController;
use crate::config::Config;
use crate::db::{Database, ImageRecord};
use crate::freshness::{Freshness, FreshnessTracker};
use crate::settings::AppSettings;
use crate::store::ImageStore;
use crate::view::ViewResolver;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const DEFAULT_HISTORY_WINDOW_HOURS: i64 = 24;

/// Everything a subcommand needs, opened from one configuration file.
pub(crate) struct App {
    config: Config,
    store: ImageStore,
    tracker: Arc<FreshnessTracker>,
}

impl App {
    pub(crate) async fn open(config_path: &Path) -> Result<Self> {
        let settings = AppSettings::load(config_path)?;
        let config = Config::from_settings(settings)
            .with_context(|| format!("invalid configuration in {}", config_path.display()))?;

        let db = Database::new(config.storage.database_path.clone())?;
        let store = ImageStore::new(db, config.storage.image_dir.clone())?;
        let tracker = Arc::new(FreshnessTracker::new(
            config
                .devices
                .iter()
                .map(|device| (device.id.as_str(), device.thresholds)),
        ));

        for device in &config.devices {
            if let Some(record) = store.most_recent(&device.id).await? {
                tracker.seed_last_success(&device.id, record.captured_at);
            }
        }

        Ok(Self {
            config,
            store,
            tracker,
        })
    }

    fn ensure_device(&self, device_id: &str) -> Result<()> {
        if self.config.device(device_id).is_none() {
            bail!("unknown device '{device_id}'");
        }
        Ok(())
    }

    fn controller(&self) -> Result<CaptureController> {
        let client = Arc::new(HttpCameraClient::new()?);
        Ok(CaptureController::new(
            &self.config,
            client,
            self.store.clone(),
            Arc::clone(&self.tracker),
        ))
    }

    fn resolver(&self) -> ViewResolver {
        ViewResolver::new(
            self.store.clone(),
            Arc::clone(&self.tracker),
            self.config.viewpoints.clone(),
        )
    }
}

/// Captures from every device until Ctrl-C.
pub(crate) async fn run_daemon(app: App) -> Result<()> {
    let mut controller = app.controller()?;
    controller.seed_from_store().await?;
    let mut events = controller.subscribe();
    controller.start()?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last_seen: HashMap<String, Freshness> = HashMap::new();
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("failed to listen for Ctrl-C")?;
                log_info!("shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let Some(state) = app.tracker.snapshot(&event.device_id) else {
                        continue;
                    };
                    let previous = last_seen.insert(event.device_id.clone(), state.classification);
                    if previous != Some(state.classification) {
                        log_info!(
                            "{} is now {} ({} consecutive failures)",
                            event.device_id,
                            state.classification.as_str(),
                            state.consecutive_failures
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log_warn!("event listener fell behind by {skipped} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    controller.shutdown().await
}

/// One on-demand attempt against `device_id`.
pub(crate) async fn capture_once(app: App, device_id: &str) -> Result<()> {
    app.ensure_device(device_id)?;
    let controller = app.controller()?;
    controller.seed_from_store().await?;
    let event = controller.trigger(device_id).await?;
    print_json(&event)
}

pub(crate) async fn show_views(app: App, at: Option<DateTime<Utc>>) -> Result<()> {
    let views = app.resolver().resolve_all(at.unwrap_or_else(Utc::now)).await;
    print_json(&views)
}

pub(crate) async fn show_history(
    app: App,
    device_id: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<()> {
    app.ensure_device(device_id)?;
    let to = to.unwrap_or_else(Utc::now);
    let from = from.unwrap_or(to - ChronoDuration::hours(DEFAULT_HISTORY_WINDOW_HOURS));
    if from > to {
        bail!("--from must not be after --to");
    }
    let records = app.resolver().in_range(device_id, from, to).await?;
    print_json(&records)
}

/// The newest image at least `seconds_ago` old; zero means the latest.
pub(crate) async fn show_past(app: App, device_id: &str, seconds_ago: u64) -> Result<()> {
    let record = find_past(&app, device_id, seconds_ago, Utc::now()).await?;
    print_json(&record)
}

async fn find_past(
    app: &App,
    device_id: &str,
    seconds_ago: u64,
    now: DateTime<Utc>,
) -> Result<Option<ImageRecord>> {
    app.ensure_device(device_id)?;
    let resolver = app.resolver();
    if seconds_ago == 0 {
        return Ok(resolver.most_recent(device_id).await?);
    }
    let target = i64::try_from(seconds_ago)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .and_then(|ago| now.checked_sub_signed(ago))
        .context("--seconds-ago is out of range")?;
    Ok(resolver.at_or_before(device_id, target).await?)
}

/// Writes a stored frame to `out`, or raw to stdout when no path is given.
pub(crate) async fn export_image(app: App, record_id: &str, out: Option<&Path>) -> Result<()> {
    let (record, bytes) = load_image(&app, record_id).await?;
    match out {
        Some(path) => {
            tokio::fs::write(path, &bytes)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            log_info!(
                "wrote {} ({} bytes, {} at {}) to {}",
                record.id,
                bytes.len(),
                record.device_id,
                record.captured_at,
                path.display()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes).context("failed to write image")?;
            stdout.flush().context("failed to write image")?;
        }
    }
    Ok(())
}

async fn load_image(app: &App, record_id: &str) -> Result<(ImageRecord, Vec<u8>)> {
    let record = app
        .store
        .by_id(record_id)
        .await?
        .with_context(|| format!("no image with id '{record_id}'"))?;
    let bytes = app.store.load_payload(&record).await?;
    Ok((record, bytes))
}

pub(crate) async fn show_log(app: App, device_id: &str, limit: usize) -> Result<()> {
    app.ensure_device(device_id)?;
    let events = app
        .store
        .database()
        .recent_capture_events(device_id, limit)
        .await?;
    print_json(&events)
}

pub(crate) async fn reset(app: App, confirm: bool) -> Result<()> {
    if !confirm {
        bail!("refusing to erase history without --confirm");
    }
    let removed = app.store.database().reset_history().await?;
    app.store.clear_payloads().await?;
    log_info!("history reset, {removed} image record(s) removed");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value).context("failed to write output")?;
    writeln!(out).context("failed to write output")?;
    Ok(())
}
