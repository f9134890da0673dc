//! Prodsync Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Resumable ingestion of a paginated third-party product feed.
//!
//! # Components
//!
//! - **Fetcher**: [`RateLimitedFetcher`] issues GETs with retry, backoff and 429 handling
//! - **Validator**: [`SchemaValidator`] checks each item against the product schema
//! - **Stores**: [`store::CheckpointStore`] and [`store::QuarantineStore`], backed by SQLite
//! - **Orchestrator**: [`IngestOrchestrator`] drives pagination and persists progress
//!
//! # Example
//!
//! ```no_run
//! use prodsync_ingest::{
//!     IngestConfig, IngestOrchestrator, RateLimitedFetcher, SourceConfig, SqliteStore, TokioClock,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let source = SourceConfig::from_env("default")?;
//!     let clock = Arc::new(TokioClock);
//!     let store = Arc::new(SqliteStore::new(&config.db_path)?);
//!
//!     let fetcher = RateLimitedFetcher::new(&source, &config, clock.clone())?;
//!     let orchestrator =
//!         IngestOrchestrator::new(config, fetcher, store.clone(), store, clock);
//!
//!     let report = orchestrator.run(&source.name, true).await?;
//!     println!("halted: {} at page {}", report.halt, report.last_page);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod item;
pub mod orchestrator;
pub mod sink;
pub mod store;
pub mod validator;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{IngestConfig, SourceConfig};
pub use error::{IngestError, Result};
pub use fetcher::{AttemptOutcome, FetchResponse, RateLimitedFetcher};
pub use item::{FieldError, Item, Page};
pub use orchestrator::{HaltReason, IngestOrchestrator, RunReport};
pub use sink::{ItemSink, LogSink};
pub use store::{Checkpoint, CheckpointStore, QuarantineRecord, QuarantineStore, SqliteStore};
pub use validator::{ItemValidator, SchemaValidator, ValidationErrors, ValidationResult};
