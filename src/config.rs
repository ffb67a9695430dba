//! Validated, immutable runtime configuration.
//!
//! Built once from [`AppSettings`] at startup and shared by reference (or
//! `Arc`) with every component. Nothing reloads it while the process runs.

use std::{collections::HashSet, path::PathBuf, time::Duration};

use serde::Serialize;
use thiserror::Error;

use crate::freshness::Thresholds;
use crate::settings::{AppSettings, DeviceSettings, ViewpointSettings};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no devices configured")]
    NoDevices,

    #[error("device id must not be empty")]
    EmptyDeviceId,

    #[error("device '{0}' is configured more than once")]
    DuplicateDevice(String),

    #[error("device '{device}': {field} must be greater than zero")]
    ZeroDuration { device: String, field: &'static str },

    #[error("device '{0}': warn_after must be shorter than stale_after")]
    ThresholdOrder(String),

    #[error("device '{device}': unsupported rotation {degrees} (use 90, 180 or 270)")]
    Rotation { device: String, degrees: u16 },

    #[error("device '{0}': capture_url must be an http(s) URL")]
    CaptureUrl(String),

    #[error("viewpoint '{label}' refers to unknown device '{device}'")]
    UnknownViewpointDevice { label: String, device: String },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Rotation {
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Device {
    pub id: String,
    /// `{}` in the URL is replaced with the attempt id, which is also the
    /// record id the frame is stored under.
    pub capture_url: String,
    pub status_url: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub max_backoff: Duration,
    pub thresholds: Thresholds,
    pub rotation: Option<Rotation>,
}

impl Device {
    /// Capture URL for one attempt.
    pub fn capture_url_for(&self, attempt_id: &str) -> String {
        self.capture_url.replace("{}", attempt_id)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Viewpoint {
    pub device_id: String,
    pub delay: Duration,
    pub label: String,
}

impl Viewpoint {
    pub fn new(device_id: impl Into<String>, delay: Duration, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            delay,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub image_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub storage: StorageConfig,
    pub devices: Vec<Device>,
    pub viewpoints: Vec<Viewpoint>,
}

impl Config {
    pub fn from_settings(settings: AppSettings) -> Result<Self, ConfigError> {
        if settings.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        let mut seen = HashSet::new();
        let mut devices = Vec::with_capacity(settings.devices.len());
        for raw in settings.devices {
            let device = device_from_settings(raw)?;
            if !seen.insert(device.id.clone()) {
                return Err(ConfigError::DuplicateDevice(device.id));
            }
            devices.push(device);
        }

        let viewpoints = settings
            .viewpoints
            .into_iter()
            .map(|raw| viewpoint_from_settings(raw, &seen))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            storage: StorageConfig {
                database_path: settings.storage.database_path,
                image_dir: settings.storage.image_dir,
            },
            devices,
            viewpoints,
        })
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.id == device_id)
    }
}

fn device_from_settings(raw: DeviceSettings) -> Result<Device, ConfigError> {
    if raw.id.trim().is_empty() {
        return Err(ConfigError::EmptyDeviceId);
    }
    if !(raw.capture_url.starts_with("http://") || raw.capture_url.starts_with("https://")) {
        return Err(ConfigError::CaptureUrl(raw.id));
    }

    let positive = |secs: u64, field: &'static str| {
        if secs == 0 {
            Err(ConfigError::ZeroDuration {
                device: raw.id.clone(),
                field,
            })
        } else {
            Ok(Duration::from_secs(secs))
        }
    };
    let poll_interval = positive(raw.poll_interval_secs, "poll_interval_secs")?;
    let timeout = positive(raw.timeout_secs, "timeout_secs")?;
    let warn_after = positive(raw.warn_after_secs, "warn_after_secs")?;
    let stale_after = positive(raw.stale_after_secs, "stale_after_secs")?;
    // Backoff never drops below the regular cadence.
    let max_backoff = Duration::from_secs(raw.max_backoff_secs).max(poll_interval);

    let thresholds = Thresholds::new(warn_after, stale_after)
        .ok_or_else(|| ConfigError::ThresholdOrder(raw.id.clone()))?;

    let rotation = match raw.rotate {
        None | Some(0) => None,
        Some(degrees) => Some(Rotation::from_degrees(degrees).ok_or(ConfigError::Rotation {
            device: raw.id.clone(),
            degrees,
        })?),
    };

    Ok(Device {
        id: raw.id,
        capture_url: raw.capture_url,
        status_url: raw.status_url,
        poll_interval,
        timeout,
        max_backoff,
        thresholds,
        rotation,
    })
}

fn viewpoint_from_settings(
    raw: ViewpointSettings,
    devices: &HashSet<String>,
) -> Result<Viewpoint, ConfigError> {
    let label = raw.label.unwrap_or_else(|| match raw.delay_secs {
        0 => format!("{} (live)", raw.device),
        secs => format!("{} ({secs}s ago)", raw.device),
    });
    if !devices.contains(&raw.device) {
        return Err(ConfigError::UnknownViewpointDevice {
            label,
            device: raw.device,
        });
    }
    Ok(Viewpoint::new(raw.device, Duration::from_secs(raw.delay_secs), label))
}
