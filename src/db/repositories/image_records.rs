use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Params, Row};
use std::path::PathBuf;

use crate::db::{
    connection::Database,
    helpers::{from_micros, to_i64, to_micros, to_u32, to_u64},
    models::{ImageMetadata, ImageRecord},
};

/// Result of trying to commit a metadata row.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same device and timestamp already exists.
    Duplicate,
    /// The device already has a newer record.
    OutOfOrder { latest: DateTime<Utc> },
}

const SELECT_COLUMNS: &str = "SELECT id, device_id, captured_at_us, payload_path, size_bytes,
        content_hash, width, height, framesize
     FROM image_records";

fn row_to_image_record(row: &Row) -> Result<ImageRecord> {
    let captured_at_us: i64 = row.get("captured_at_us")?;
    let payload_path: String = row.get("payload_path")?;
    let size_bytes: i64 = row.get("size_bytes")?;
    let width: Option<i64> = row.get("width")?;
    let height: Option<i64> = row.get("height")?;

    Ok(ImageRecord {
        id: row.get("id")?,
        device_id: row.get("device_id")?,
        captured_at: from_micros(captured_at_us, "captured_at_us")?,
        payload_path: PathBuf::from(payload_path),
        metadata: ImageMetadata {
            size_bytes: to_u64(size_bytes, "size_bytes")?,
            content_hash: row.get("content_hash")?,
            width: width.map(|w| to_u32(w, "width")).transpose()?,
            height: height.map(|h| to_u32(h, "height")).transpose()?,
            framesize: row.get("framesize")?,
        },
    })
}

fn query_one<P: Params>(
    conn: &rusqlite::Connection,
    sql: &str,
    params: P,
) -> Result<Option<ImageRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_image_record(row)?)),
        None => Ok(None),
    }
}

impl Database {
    /// Commits a metadata row if it keeps the device's timestamps strictly
    /// increasing. The check and the insert share one transaction.
    pub async fn insert_image_record(&self, record: &ImageRecord) -> Result<InsertOutcome> {
        let record = record.clone();
        self.execute(move |conn| {
            let captured_at_us = to_micros(&record.captured_at);
            let tx = conn
                .transaction()
                .context("failed to open image insert transaction")?;

            let latest_us: Option<i64> = tx
                .query_row(
                    "SELECT MAX(captured_at_us) FROM image_records WHERE device_id = ?1",
                    params![record.device_id],
                    |row| row.get(0),
                )
                .context("failed to read latest capture time")?;

            if let Some(latest_us) = latest_us {
                if latest_us >= captured_at_us {
                    let exact: Option<String> = tx
                        .query_row(
                            "SELECT id FROM image_records
                             WHERE device_id = ?1 AND captured_at_us = ?2",
                            params![record.device_id, captured_at_us],
                            |row| row.get(0),
                        )
                        .optional()?;
                    return Ok(match exact {
                        Some(_) => InsertOutcome::Duplicate,
                        None => InsertOutcome::OutOfOrder {
                            latest: from_micros(latest_us, "captured_at_us")?,
                        },
                    });
                }
            }

            let inserted = tx.execute(
                "INSERT INTO image_records (
                    id, device_id, captured_at_us, captured_at, payload_path, size_bytes,
                    content_hash, width, height, framesize, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id,
                    record.device_id,
                    captured_at_us,
                    record.captured_at.to_rfc3339(),
                    record.payload_path.to_string_lossy(),
                    to_i64(record.metadata.size_bytes)?,
                    record.metadata.content_hash,
                    record.metadata.width,
                    record.metadata.height,
                    record.metadata.framesize,
                    Utc::now().to_rfc3339(),
                ],
            );

            match inserted {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    return Ok(InsertOutcome::Duplicate);
                }
                Err(err) => return Err(anyhow::Error::new(err).context("failed to insert image record")),
            }

            tx.commit().context("failed to commit image record")?;
            Ok(InsertOutcome::Inserted)
        })
        .await
    }

    pub async fn latest_image_record(&self, device_id: &str) -> Result<Option<ImageRecord>> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            query_one(
                conn,
                &format!(
                    "{SELECT_COLUMNS} WHERE device_id = ?1 ORDER BY captured_at_us DESC LIMIT 1"
                ),
                params![device_id],
            )
        })
        .await
    }

    /// Greatest timestamp not exceeding `at`.
    pub async fn image_record_at_or_before(
        &self,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ImageRecord>> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            query_one(
                conn,
                &format!(
                    "{SELECT_COLUMNS}
                     WHERE device_id = ?1 AND captured_at_us <= ?2
                     ORDER BY captured_at_us DESC
                     LIMIT 1"
                ),
                params![device_id, to_micros(&at)],
            )
        })
        .await
    }

    /// Inclusive on both ends, oldest first.
    pub async fn image_records_in_range(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ImageRecord>> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS}
                 WHERE device_id = ?1 AND captured_at_us >= ?2 AND captured_at_us <= ?3
                 ORDER BY captured_at_us ASC"
            ))?;
            let mut rows = stmt.query(params![device_id, to_micros(&from), to_micros(&to)])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_image_record(row)?);
            }
            Ok(records)
        })
        .await
    }

    pub async fn image_record_by_id(&self, record_id: &str) -> Result<Option<ImageRecord>> {
        let record_id = record_id.to_string();
        self.execute(move |conn| {
            query_one(
                conn,
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![record_id],
            )
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(device: &str, secs: i64) -> ImageRecord {
        ImageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device.to_string(),
            captured_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            payload_path: PathBuf::from(format!("/tmp/{device}-{secs}.jpg")),
            metadata: ImageMetadata {
                size_bytes: 10,
                width: Some(4),
                height: Some(3),
                ..ImageMetadata::default()
            },
        }
    }

    async fn database() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("db.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let (_dir, db) = database().await;
        let stored = record("porch", 0);
        assert_eq!(db.insert_image_record(&stored).await.unwrap(), InsertOutcome::Inserted);

        let latest = db.latest_image_record("porch").await.unwrap().unwrap();
        assert_eq!(latest, stored);
        let by_id = db.image_record_by_id(&stored.id).await.unwrap().unwrap();
        assert_eq!(by_id.payload_path, stored.payload_path);
        assert!(db.latest_image_record("garage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_duplicate_and_older_timestamps() {
        let (_dir, db) = database().await;
        db.insert_image_record(&record("porch", 10)).await.unwrap();
        db.insert_image_record(&record("porch", 20)).await.unwrap();

        assert_eq!(
            db.insert_image_record(&record("porch", 20)).await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(
            db.insert_image_record(&record("porch", 10)).await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert!(matches!(
            db.insert_image_record(&record("porch", 15)).await.unwrap(),
            InsertOutcome::OutOfOrder { .. }
        ));
        // Other devices are unaffected.
        assert_eq!(
            db.insert_image_record(&record("garage", 10)).await.unwrap(),
            InsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn range_is_inclusive_and_ordered() {
        let (_dir, db) = database().await;
        for secs in [0, 10, 20, 30] {
            db.insert_image_record(&record("porch", secs)).await.unwrap();
        }
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let found = db
            .image_records_in_range(
                "porch",
                base + chrono::Duration::seconds(10),
                base + chrono::Duration::seconds(20),
            )
            .await
            .unwrap();
        let offsets: Vec<i64> = found
            .iter()
            .map(|r| (r.captured_at - base).num_seconds())
            .collect();
        assert_eq!(offsets, vec![10, 20]);
    }
}
