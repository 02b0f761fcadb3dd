//! The `_migrations` table: which migrations have been applied to this
//! database, and when.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use schemastep_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::migration::MigrationKey;

/// A row of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub key: MigrationKey,
    pub applied_at: DateTime<Utc>,
}

pub fn ensure_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            app TEXT NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL,
            PRIMARY KEY (app, name)
        );",
    )
    .map_err(|e| Error::Database(format!("failed to create migration ledger: {e}")))
}

pub fn applied(conn: &Connection) -> Result<Vec<AppliedMigration>> {
    let mut stmt = conn
        .prepare("SELECT app, name, applied_at FROM _migrations ORDER BY applied_at, app, name")
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(AppliedMigration {
                key: MigrationKey {
                    app_label: row.get(0)?,
                    name: row.get(1)?,
                },
                applied_at: parse_datetime(row.get::<_, String>(2)?),
            })
        })
        .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

    let mut applied = Vec::new();
    for row in rows {
        applied.push(row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?);
    }
    Ok(applied)
}

pub fn applied_at(conn: &Connection, key: &MigrationKey) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT applied_at FROM _migrations WHERE app = ?1 AND name = ?2",
            params![key.app_label, key.name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to look up {key}: {e}")))?;
    Ok(value.map(parse_datetime))
}

pub fn is_applied(conn: &Connection, key: &MigrationKey) -> Result<bool> {
    Ok(applied_at(conn, key)?.is_some())
}

pub fn record_applied(conn: &Connection, key: &MigrationKey) -> Result<()> {
    conn.execute(
        "INSERT INTO _migrations (app, name, applied_at) VALUES (?1, ?2, ?3)",
        params![key.app_label, key.name, Utc::now().to_rfc3339()],
    )
    .map_err(|e| Error::Database(format!("failed to record {key}: {e}")))?;
    Ok(())
}

pub fn record_unapplied(conn: &Connection, key: &MigrationKey) -> Result<()> {
    conn.execute(
        "DELETE FROM _migrations WHERE app = ?1 AND name = ?2",
        params![key.app_label, key.name],
    )
    .map_err(|e| Error::Database(format!("failed to remove {key} from ledger: {e}")))?;
    Ok(())
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // rows written by hand via datetime('now') use "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        })
}
