//! SQLite-backed checkpoint and quarantine store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::store::schema;
use crate::store::{Checkpoint, CheckpointStore, QuarantineRecord, QuarantineStore};

/// Both stores on one connection. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        schema::init_schema(&conn)?;

        debug!(path = %path.display(), "Opened ingestion database");

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| IngestError::Lock(format!("Failed to acquire database lock: {}", e)))
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw = row.get::<_, String>(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        })
        .transpose()
}

fn checkpoint_from_row(row: &Row<'_>) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        name: row.get(0)?,
        last_page: from_sql_int(row.get(1)?),
        meta: json_column(row, 2)?,
        last_processed_at: timestamp_column(row, 3)?,
    })
}

fn quarantine_from_row(row: &Row<'_>) -> rusqlite::Result<QuarantineRecord> {
    let errors = serde_json::from_value(json_column(row, 5)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(QuarantineRecord {
        id: Some(row.get(0)?),
        source: row.get(1)?,
        page: from_sql_int(row.get(2)?),
        external_id: row.get(3)?,
        payload: json_column(row, 4)?,
        errors,
        created_at: timestamp_column(row, 6)?.unwrap_or_default(),
    })
}

const SELECT_CHECKPOINT: &str =
    "SELECT name, last_page, meta, last_processed_at FROM ingest_checkpoints WHERE name = ?1";

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get_or_create(&self, name: &str) -> Result<Checkpoint> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let created = conn.execute(
            r#"
            INSERT OR IGNORE INTO ingest_checkpoints (name, last_page, meta, created_at, updated_at)
            VALUES (?1, 0, '{}', ?2, ?2)
            "#,
            params![name, now],
        )?;
        if created > 0 {
            debug!(checkpoint = name, "Created checkpoint");
        }

        let checkpoint = conn.query_row(SELECT_CHECKPOINT, params![name], checkpoint_from_row)?;
        Ok(checkpoint)
    }

    async fn get(&self, name: &str) -> Result<Option<Checkpoint>> {
        let conn = self.conn()?;
        let checkpoint = conn
            .query_row(SELECT_CHECKPOINT, params![name], checkpoint_from_row)
            .optional()?;
        Ok(checkpoint)
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let meta = serde_json::to_string(&checkpoint.meta)?;
        let now = Utc::now().to_rfc3339();

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO ingest_checkpoints (name, last_page, meta, last_processed_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(name) DO UPDATE SET
                last_page = excluded.last_page,
                meta = excluded.meta,
                last_processed_at = excluded.last_processed_at,
                updated_at = excluded.updated_at
            "#,
            params![
                checkpoint.name,
                to_sql_int(checkpoint.last_page),
                meta,
                checkpoint.last_processed_at.map(|ts| ts.to_rfc3339()),
                now,
            ],
        )?;

        Ok(())
    }
}

#[async_trait]
impl QuarantineStore for SqliteStore {
    async fn append(&self, record: &QuarantineRecord) -> Result<i64> {
        let payload = serde_json::to_string(&record.payload)?;
        let errors = serde_json::to_string(&record.errors)?;

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO quarantine_items (source, page, external_id, payload, errors, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.source,
                to_sql_int(record.page),
                record.external_id,
                payload,
                errors,
                record.created_at.to_rfc3339(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    async fn list(&self, source: &str, limit: usize) -> Result<Vec<QuarantineRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, source, page, external_id, payload, errors, created_at
            FROM quarantine_items
            WHERE source = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map(params![source, limit], quarantine_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    async fn count(&self, source: &str) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM quarantine_items WHERE source = ?1",
            params![source],
            |row| row.get(0),
        )?;
        Ok(from_sql_int(count))
    }
}
