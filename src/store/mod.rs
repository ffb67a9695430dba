//! Durable image history.
//!
//! A write puts the payload on disk first (temp file, fsync, rename) and
//! only then commits the metadata row that makes it visible. Readers find
//! records exclusively through metadata, so a half-written record is never
//! observable: either the row is missing and the file is ignored, or both
//! exist.

use anyhow::Context;
use chrono::{DateTime, Utc};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, ImageMetadata, ImageRecord, InsertOutcome};
use crate::error::FailureClass;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device '{device_id}' already has a record at {timestamp}")]
    DuplicateTimestamp {
        device_id: String,
        timestamp: DateTime<Utc>,
    },

    #[error("device '{device_id}' record at {timestamp} is older than its latest at {latest}")]
    NonMonotonicTimestamp {
        device_id: String,
        timestamp: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl StoreError {
    pub fn class(&self) -> FailureClass {
        match self {
            StoreError::DuplicateTimestamp { .. } | StoreError::NonMonotonicTimestamp { .. } => {
                FailureClass::InvariantViolation
            }
            StoreError::PersistenceFailure(_) => FailureClass::PersistenceFailure,
        }
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::PersistenceFailure(format!("{err:#}"))
    }
}

#[derive(Clone)]
pub struct ImageStore {
    db: Database,
    image_dir: PathBuf,
}

impl ImageStore {
    pub fn new(db: Database, image_dir: PathBuf) -> anyhow::Result<Self> {
        fs::create_dir_all(&image_dir).with_context(|| {
            format!("failed to create image directory {}", image_dir.display())
        })?;
        Ok(Self { db, image_dir })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Persists one frame under a fresh record id and returns that id.
    ///
    /// `timestamp` is truncated to microseconds, the precision of the
    /// ordering key.
    pub async fn write(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
        bytes: Vec<u8>,
        metadata: ImageMetadata,
    ) -> Result<String, StoreError> {
        let record_id = Uuid::new_v4().to_string();
        self.write_as(&record_id, device_id, timestamp, bytes, metadata)
            .await
    }

    /// Like [`write`](Self::write) with a caller-chosen record id. The
    /// capture path reuses the attempt id so the id the device was asked
    /// for names the stored frame.
    pub async fn write_as(
        &self,
        record_id: &str,
        device_id: &str,
        timestamp: DateTime<Utc>,
        bytes: Vec<u8>,
        metadata: ImageMetadata,
    ) -> Result<String, StoreError> {
        let timestamp = truncate_to_micros(timestamp);
        let record_id = record_id.to_string();
        let device_dir = self.image_dir.join(safe_dir_name(device_id));
        let final_path = device_dir.join(format!("{record_id}.jpg"));

        let size_bytes = bytes.len() as u64;
        let payload_path = final_path.clone();
        tokio::task::spawn_blocking(move || write_payload(&device_dir, &payload_path, &bytes))
            .await
            .map_err(|err| StoreError::PersistenceFailure(format!("payload writer join failed: {err}")))?
            .map_err(StoreError::from)?;

        let record = ImageRecord {
            id: record_id.clone(),
            device_id: device_id.to_string(),
            captured_at: timestamp,
            payload_path: final_path.clone(),
            metadata: ImageMetadata {
                size_bytes,
                ..metadata
            },
        };

        let outcome = self.db.insert_image_record(&record).await;
        let err = match outcome {
            Ok(InsertOutcome::Inserted) => {
                log_debug!("stored {} bytes for {device_id} at {timestamp} as {record_id}", size_bytes);
                return Ok(record_id);
            }
            Ok(InsertOutcome::Duplicate) => StoreError::DuplicateTimestamp {
                device_id: device_id.to_string(),
                timestamp,
            },
            Ok(InsertOutcome::OutOfOrder { latest }) => StoreError::NonMonotonicTimestamp {
                device_id: device_id.to_string(),
                timestamp,
                latest,
            },
            Err(err) => StoreError::from(err),
        };

        // The row never landed, so the payload is unreachable; drop it.
        if let Err(remove_err) = fs::remove_file(&final_path) {
            log_warn!(
                "failed to remove orphaned payload {}: {remove_err}",
                final_path.display()
            );
        }
        Err(err)
    }

    pub async fn most_recent(&self, device_id: &str) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self.db.latest_image_record(device_id).await?)
    }

    /// The record with the greatest timestamp not exceeding `at`.
    pub async fn at_or_before(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self.db.image_record_at_or_before(device_id, at).await?)
    }

    pub async fn in_range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ImageRecord>, StoreError> {
        Ok(self.db.image_records_in_range(device_id, from, to).await?)
    }

    pub async fn by_id(&self, record_id: &str) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self.db.image_record_by_id(record_id).await?)
    }

    pub async fn load_payload(&self, record: &ImageRecord) -> Result<Vec<u8>, StoreError> {
        let path = record.payload_path.clone();
        tokio::task::spawn_blocking(move || {
            fs::read(&path).with_context(|| format!("failed to read payload {}", path.display()))
        })
        .await
        .map_err(|err| StoreError::PersistenceFailure(format!("payload reader join failed: {err}")))?
        .map_err(StoreError::from)
    }

    /// Removes every stored payload. Only meant to follow
    /// [`Database::reset_history`].
    pub async fn clear_payloads(&self) -> Result<(), StoreError> {
        let dir = self.image_dir.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("failed to clear {}", dir.display()))?;
            }
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to recreate {}", dir.display()))?;
            Ok(())
        })
        .await
        .map_err(|err| StoreError::PersistenceFailure(format!("payload cleaner join failed: {err}")))?
        .map_err(StoreError::from)
    }
}

fn truncate_to_micros(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(timestamp.timestamp_micros()).unwrap_or(timestamp)
}

/// Device ids become directory names; anything but `[A-Za-z0-9_-]` is
/// replaced.
fn safe_dir_name(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn write_payload(dir: &Path, final_path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let tmp_path = final_path.with_extension("jpg.tmp");
    {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", tmp_path.display()))?;
    }
    if let Err(err) = fs::rename(&tmp_path, final_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(anyhow::Error::new(err)
            .context(format!("failed to move payload into {}", final_path.display())));
    }
    // Persist the rename itself. Directories cannot be opened for sync on
    // every platform, so failure here is not fatal.
    if let Ok(dir_handle) = fs::File::open(dir) {
        let _ = dir_handle.sync_all();
    }
    Ok(())
}
