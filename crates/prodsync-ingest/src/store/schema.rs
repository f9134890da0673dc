//! SQLite schema for checkpoints and quarantined items

use crate::error::Result;
use rusqlite::Connection;

/// Create tables and indexes if they do not exist yet.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_checkpoints (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            last_page INTEGER NOT NULL DEFAULT 0,
            meta TEXT NOT NULL DEFAULT '{}',  -- JSON
            last_processed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    // No uniqueness: a reprocessed page quarantines its items again
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS quarantine_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            page INTEGER NOT NULL,
            external_id TEXT,
            payload TEXT NOT NULL,  -- JSON
            errors TEXT NOT NULL,   -- JSON
            created_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quarantine_source ON quarantine_items(source, id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quarantine_external_id ON quarantine_items(external_id)",
        [],
    )?;

    Ok(())
}
