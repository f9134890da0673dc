//! Downstream destination for validated items

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::item::Item;

/// Receives every item that passed validation.
///
/// An `Err` does not stop the run: the orchestrator quarantines the item with
/// the error message and moves on.
#[async_trait]
pub trait ItemSink: Send + Sync {
    async fn accept(&self, item: &Item) -> Result<()>;
}

/// Default sink: logs the item and keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ItemSink for LogSink {
    async fn accept(&self, item: &Item) -> Result<()> {
        debug!(
            external_id = item.external_id().as_deref().unwrap_or("-"),
            sku = item.str_field("sku").unwrap_or("-"),
            "Accepted item"
        );
        Ok(())
    }
}
