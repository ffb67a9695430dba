//! Stored image model.
//!
//! An `ImageRecord` is the metadata row committed after its payload file is
//! durable. The payload itself is read on demand through
//! [`crate::store::ImageStore::load_payload`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Content metadata captured alongside a payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub size_bytes: u64,
    /// Perceptual hash of the decoded frame, base64.
    pub content_hash: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Frame size label reported by the device status endpoint.
    pub framesize: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: String,
    pub device_id: String,
    pub captured_at: DateTime<Utc>,
    pub payload_path: PathBuf,
    #[serde(flatten)]
    pub metadata: ImageMetadata,
}
