//! Schema migrations keyed on SQLite's `user_version` pragma.
//!
//! Migration N is `MIGRATIONS[N - 1]`; append new scripts, never edit old
//! ones.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

const MIGRATIONS: &[&str] = &[
    include_str!("schemas/schema_v1.sql"),
    include_str!("schemas/schema_v2.sql"),
];

const CURRENT_SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database schema v{version} is newer than this build understands (v{CURRENT_SCHEMA_VERSION})"
        );
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    // All pending steps land together or not at all.
    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    for (index, script) in MIGRATIONS.iter().enumerate().skip(version.max(0) as usize) {
        let target = index + 1;
        tx.execute_batch(script)
            .with_context(|| format!("migration to schema v{target} failed"))?;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}
