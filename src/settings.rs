//! On-disk configuration file model.
//!
//! The file is plain JSON and is read exactly once at startup. Missing
//! per-device tuning falls back to the defaults below; everything else is
//! validated by [`crate::config::Config::from_settings`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
// Matches the capture timeout the recorder has always used.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 300;
pub const DEFAULT_WARN_AFTER_SECS: u64 = 30;
pub const DEFAULT_STALE_AFTER_SECS: u64 = 90;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub database_path: PathBuf,
    pub image_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("camwatch.sqlite3"),
            image_dir: PathBuf::from("images"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub id: String,
    pub capture_url: String,
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_warn_after_secs")]
    pub warn_after_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Clockwise rotation in degrees applied before the frame is stored.
    #[serde(default)]
    pub rotate: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewpointSettings {
    pub device: String,
    #[serde(default)]
    pub delay_secs: u64,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub storage: StorageSettings,
    pub devices: Vec<DeviceSettings>,
    #[serde(default)]
    pub viewpoints: Vec<ViewpointSettings>,
}

impl AppSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_backoff_secs() -> u64 {
    DEFAULT_MAX_BACKOFF_SECS
}

fn default_warn_after_secs() -> u64 {
    DEFAULT_WARN_AFTER_SECS
}

fn default_stale_after_secs() -> u64 {
    DEFAULT_STALE_AFTER_SECS
}
