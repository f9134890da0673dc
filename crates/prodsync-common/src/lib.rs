//! Prodsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing used by every prodsync workspace member.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the crate [`Result`] alias
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//! - **Environment**: typed helpers for reading settings from the process environment
//! - **Backoff**: exponential retry delay schedule shared by remote clients
//!
//! # Example
//!
//! ```no_run
//! use prodsync_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> prodsync_common::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod env;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use backoff::BackoffPolicy;
pub use error::{CommonError, Result};
