use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{from_micros, parse_outcome, to_i64, to_micros, to_u64},
    models::CaptureEvent,
};

fn row_to_capture_event(row: &Row) -> Result<CaptureEvent> {
    let started_at_us: i64 = row.get("started_at_us")?;
    let finished_at_us: i64 = row.get("finished_at_us")?;
    let outcome: String = row.get("outcome")?;
    let size_bytes: Option<i64> = row.get("size_bytes")?;

    Ok(CaptureEvent {
        id: row.get("id")?,
        attempt_id: row.get("attempt_id")?,
        device_id: row.get("device_id")?,
        started_at: from_micros(started_at_us, "started_at_us")?,
        finished_at: from_micros(finished_at_us, "finished_at_us")?,
        outcome: parse_outcome(&outcome)?,
        size_bytes: size_bytes.map(|s| to_u64(s, "size_bytes")).transpose()?,
        record_id: row.get("record_id")?,
        error: row.get("error")?,
    })
}

impl Database {
    pub async fn insert_capture_event(&self, event: &CaptureEvent) -> Result<i64> {
        let record = event.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO capture_events (
                    attempt_id,
                    device_id,
                    started_at_us,
                    finished_at_us,
                    outcome,
                    size_bytes,
                    record_id,
                    error
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.attempt_id,
                    record.device_id,
                    to_micros(&record.started_at),
                    to_micros(&record.finished_at),
                    record.outcome.as_str(),
                    record.size_bytes.map(to_i64).transpose()?,
                    record.record_id,
                    record.error,
                ],
            )
            .context("failed to insert capture event")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Newest first.
    pub async fn recent_capture_events(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<CaptureEvent>> {
        let device_id = device_id.to_string();
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT
                    id,
                    attempt_id,
                    device_id,
                    started_at_us,
                    finished_at_us,
                    outcome,
                    size_bytes,
                    record_id,
                    error
                FROM capture_events
                WHERE device_id = ?1
                ORDER BY started_at_us DESC, id DESC
                LIMIT ?2",
            )?;

            let mut rows = stmt.query(params![device_id, limit])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_capture_event(row)?);
            }
            Ok(events)
        })
        .await
    }
}
