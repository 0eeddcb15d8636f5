//! Collaborators consumed by the engine.
//!
//! Both are replaceable: an ERP client in production, in-memory fakes in tests.
//! Every call is a suspension point.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use forgeerp_core::ReservedLookupError;

use crate::batch::AvailableBatch;

/// Infrastructure failure while consulting a collaborator.
///
/// These propagate; stock shortfalls never use this type.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("stock source unavailable: {0}")]
    Stock(String),

    #[error("item metadata unavailable: {0}")]
    ItemMetadata(String),

    #[error(transparent)]
    Reserved(#[from] ReservedLookupError),
}

/// Physical stock on hand.
#[async_trait]
pub trait StockSource: Send + Sync {
    /// Physical quantity (inventory unit) of a non-batch item in a warehouse.
    async fn available_quantity(&self, item_code: &str, warehouse_code: &str) -> Result<Decimal, SourceError>;

    /// Batches of an item with stock in a warehouse.
    async fn available_batches(
        &self,
        item_code: &str,
        warehouse_code: &str,
    ) -> Result<Vec<AvailableBatch>, SourceError>;
}

/// Item master data.
#[async_trait]
pub trait ItemMetadataSource: Send + Sync {
    /// `None` when the item does not exist.
    async fn is_batch_managed(&self, item_code: &str) -> Result<Option<bool>, SourceError>;

    /// Inventory units per one `uom_code`; `None` when the unit is unknown.
    async fn uom_conversion(&self, item_code: &str, uom_code: &str) -> Result<Option<Decimal>, SourceError>;
}
