//! Ingestion configuration
//!
//! Settings come from the environment (a `.env` file is loaded by the
//! binary). Page size and the rate budget are fixed for the product feed but
//! live on [`IngestConfig`] so embedders and tests can adjust them.

use prodsync_common::env;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{IngestError, Result};

// ============================================================================
// Ingestion Constants
// ============================================================================

/// Items requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Rate budget against the remote source: one full page cycle every 6 seconds.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 10;

/// Per-request HTTP timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Retries after the first attempt, per page fetch.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Wait applied to a 429 response without a usable `Retry-After` header.
pub const DEFAULT_RATE_LIMIT_FALLBACK_SECS: u64 = 6;

/// Remote collection path appended to the base URL.
pub const DEFAULT_RESOURCE: &str = "products";

/// Checkpoint names are `<prefix>_<source>`.
pub const DEFAULT_CHECKPOINT_PREFIX: &str = "thirdparty_products";

/// SQLite database holding checkpoints and quarantined items.
pub const DEFAULT_DB_PATH: &str = "./data/prodsync.db";

/// Source name used when none is given.
pub const DEFAULT_SOURCE: &str = "default";

/// Settings shared by every source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Remote collection path, e.g. "products"
    pub resource: String,
    /// SQLite database path for checkpoints and quarantine
    pub db_path: PathBuf,
    /// Prefix for checkpoint names
    pub checkpoint_prefix: String,
    /// HTTP timeout per request in seconds
    pub timeout_secs: u64,
    /// Retries per page fetch (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Items per page
    pub page_size: u32,
    /// Full page cycles allowed per minute
    pub requests_per_minute: u32,
    /// Wait for a 429 without Retry-After, in seconds
    pub rate_limit_fallback_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            resource: DEFAULT_RESOURCE.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            checkpoint_prefix: DEFAULT_CHECKPOINT_PREFIX.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            page_size: DEFAULT_PAGE_SIZE,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            rate_limit_fallback_secs: DEFAULT_RATE_LIMIT_FALLBACK_SECS,
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables
    ///
    /// Storage settings as in [`IngestConfig::storage_from_env`], plus:
    /// - `INGEST_RESOURCE` (default "products")
    /// - `INGEST_TIMEOUT_SECS` (default 30)
    /// - `INGEST_MAX_RETRIES` (default 3)
    pub fn from_env() -> Result<Self> {
        let storage = Self::storage_from_env()?;
        let config = Self {
            resource: env::var("INGEST_RESOURCE").unwrap_or(storage.resource.clone()),
            timeout_secs: env::parse_or("INGEST_TIMEOUT_SECS", storage.timeout_secs)?,
            max_retries: env::parse_or("INGEST_MAX_RETRIES", storage.max_retries)?,
            ..storage
        };

        config.validate()?;
        Ok(config)
    }

    /// Load only the settings needed to read stored state; fetch settings
    /// keep their defaults.
    ///
    /// - `INGEST_DB_PATH` (default "./data/prodsync.db")
    /// - `INGEST_CHECKPOINT_PREFIX` (default "thirdparty_products")
    pub fn storage_from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            db_path: env::var("INGEST_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            checkpoint_prefix: env::var("INGEST_CHECKPOINT_PREFIX")
                .unwrap_or(defaults.checkpoint_prefix),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.resource.trim_matches('/').is_empty() {
            return Err(IngestError::config("INGEST_RESOURCE cannot be empty"));
        }
        if self.checkpoint_prefix.is_empty() {
            return Err(IngestError::config("INGEST_CHECKPOINT_PREFIX cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(IngestError::config("INGEST_TIMEOUT_SECS must be greater than 0"));
        }
        if self.page_size == 0 {
            return Err(IngestError::config("page size must be greater than 0"));
        }
        if self.requests_per_minute == 0 {
            return Err(IngestError::config("rate budget must be greater than 0"));
        }
        Ok(())
    }

    /// Checkpoint name for a source, e.g. `thirdparty_products_default`.
    pub fn checkpoint_name(&self, source: &str) -> String {
        format!("{}_{}", self.checkpoint_prefix, source)
    }

    /// Minimum wall time between the starts of two page cycles.
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_secs(60) / self.requests_per_minute
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn rate_limit_fallback(&self) -> Duration {
        Duration::from_secs(self.rate_limit_fallback_secs)
    }
}

/// Connection details for one named remote source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub base_url: String,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
        }
    }

    /// Resolve the base URL for `name` from the environment.
    ///
    /// Looks up `INGEST_BASE_URL_<NAME>` first (upper-cased, `-` and `.`
    /// replaced by `_`), then the shared `INGEST_BASE_URL`.
    pub fn from_env(name: &str) -> Result<Self> {
        let key = Self::env_key(name);
        let base_url = env::var(&key)
            .or_else(|| env::var("INGEST_BASE_URL"))
            .ok_or_else(|| {
                IngestError::config(format!(
                    "no base URL for source '{name}': set {key} or INGEST_BASE_URL"
                ))
            })?;

        let source = Self::new(name, base_url);
        source.validate()?;
        Ok(source)
    }

    /// Environment variable holding this source's base URL.
    pub fn env_key(name: &str) -> String {
        let suffix: String = name
            .chars()
            .map(|c| match c {
                '-' | '.' | ' ' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("INGEST_BASE_URL_{suffix}")
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(IngestError::config("source name cannot be empty"));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(IngestError::config(format!(
                "base URL for source '{}' must start with http:// or https://, got '{}'",
                self.name, self.base_url
            )));
        }
        Ok(())
    }
}
