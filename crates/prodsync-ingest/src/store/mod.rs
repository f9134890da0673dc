//! Durable ingestion state
//!
//! Two stores back a run: the checkpoint store records the last fully
//! processed page per named source, and the quarantine store collects items
//! that could not be accepted. Both are traits so the orchestrator can be
//! driven against in-memory or failing implementations.

pub mod schema;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::validator::ValidationErrors;

pub use sqlite::SqliteStore;

/// Progress marker for one named source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique name, e.g. `thirdparty_products_default`
    pub name: String,

    /// Highest page whose items were all routed. 0 means nothing done yet.
    pub last_page: u64,

    /// Opaque metadata, preserved across saves
    pub meta: JsonValue,

    /// When `last_page` was last written by a run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Fresh checkpoint at page 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_page: 0,
            meta: JsonValue::Object(Default::default()),
            last_processed_at: None,
        }
    }

    /// Record `page` as the last processed page, stamped now.
    pub fn mark(&mut self, page: u64) {
        self.last_page = page;
        self.last_processed_at = Some(Utc::now());
    }
}

/// One rejected item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    /// Row ID (assigned by the store)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Source the item was ingested from
    pub source: String,

    /// Page the item appeared on
    pub page: u64,

    /// The item's `id`, when it had a usable one
    pub external_id: Option<String>,

    /// The item exactly as received
    pub payload: JsonValue,

    /// Field name → messages
    pub errors: ValidationErrors,

    pub created_at: DateTime<Utc>,
}

impl QuarantineRecord {
    pub fn new(
        source: impl Into<String>,
        page: u64,
        external_id: Option<String>,
        payload: JsonValue,
        errors: ValidationErrors,
    ) -> Self {
        Self {
            id: None,
            source: source.into(),
            page,
            external_id,
            payload,
            errors,
            created_at: Utc::now(),
        }
    }
}

/// Checkpoint persistence (dependency injection)
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint, creating it at page 0 when absent.
    async fn get_or_create(&self, name: &str) -> Result<Checkpoint>;

    /// Load the checkpoint without creating it.
    async fn get(&self, name: &str) -> Result<Option<Checkpoint>>;

    /// Durably upsert `last_page`, `meta` and `last_processed_at`.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// Append-only quarantine persistence (dependency injection)
#[async_trait]
pub trait QuarantineStore: Send + Sync {
    /// Insert a record, returning its row ID.
    async fn append(&self, record: &QuarantineRecord) -> Result<i64>;

    /// Most recent records for `source`, newest first.
    async fn list(&self, source: &str, limit: usize) -> Result<Vec<QuarantineRecord>>;

    async fn count(&self, source: &str) -> Result<u64>;
}
