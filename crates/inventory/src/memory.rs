//! In-memory collaborators for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::batch::AvailableBatch;
use crate::sources::{ItemMetadataSource, SourceError, StockSource};

type StockKey = (String, String);

fn stock_key(item_code: &str, warehouse_code: &str) -> StockKey {
    (item_code.to_string(), warehouse_code.to_string())
}

/// In-memory stock levels.
#[derive(Debug, Default)]
pub struct InMemoryStockSource {
    quantities: RwLock<HashMap<StockKey, Decimal>>,
    batches: RwLock<HashMap<StockKey, Vec<AvailableBatch>>>,
}

impl InMemoryStockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quantity(&self, item_code: &str, warehouse_code: &str, quantity: Decimal) {
        let mut quantities = self.quantities.write().unwrap_or_else(|p| p.into_inner());
        quantities.insert(stock_key(item_code, warehouse_code), quantity);
    }

    pub fn set_batches(&self, item_code: &str, warehouse_code: &str, batches: Vec<AvailableBatch>) {
        let mut all = self.batches.write().unwrap_or_else(|p| p.into_inner());
        all.insert(stock_key(item_code, warehouse_code), batches);
    }
}

#[async_trait]
impl StockSource for InMemoryStockSource {
    async fn available_quantity(&self, item_code: &str, warehouse_code: &str) -> Result<Decimal, SourceError> {
        let quantities = self
            .quantities
            .read()
            .map_err(|_| SourceError::Stock("stock table poisoned".to_string()))?;
        Ok(quantities
            .get(&stock_key(item_code, warehouse_code))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn available_batches(
        &self,
        item_code: &str,
        warehouse_code: &str,
    ) -> Result<Vec<AvailableBatch>, SourceError> {
        let batches = self
            .batches
            .read()
            .map_err(|_| SourceError::Stock("batch table poisoned".to_string()))?;
        Ok(batches
            .get(&stock_key(item_code, warehouse_code))
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default)]
struct ItemRecord {
    batch_managed: bool,
    uoms: HashMap<String, Decimal>,
}

/// In-memory item master.
///
/// Counts batch-flag lookups so tests can observe the engine's cache.
#[derive(Debug, Default)]
pub struct InMemoryItemCatalog {
    items: RwLock<HashMap<String, ItemRecord>>,
    batch_flag_lookups: AtomicUsize,
}

impl InMemoryItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&self, item_code: &str, batch_managed: bool) {
        let mut items = self.items.write().unwrap_or_else(|p| p.into_inner());
        items.entry(item_code.to_string()).or_default().batch_managed = batch_managed;
    }

    pub fn add_uom(&self, item_code: &str, uom_code: &str, factor: Decimal) {
        let mut items = self.items.write().unwrap_or_else(|p| p.into_inner());
        items
            .entry(item_code.to_string())
            .or_default()
            .uoms
            .insert(uom_code.to_string(), factor);
    }

    pub fn batch_flag_lookups(&self) -> usize {
        self.batch_flag_lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ItemMetadataSource for InMemoryItemCatalog {
    async fn is_batch_managed(&self, item_code: &str) -> Result<Option<bool>, SourceError> {
        self.batch_flag_lookups.fetch_add(1, Ordering::Relaxed);
        let items = self
            .items
            .read()
            .map_err(|_| SourceError::ItemMetadata("item table poisoned".to_string()))?;
        Ok(items.get(item_code).map(|i| i.batch_managed))
    }

    async fn uom_conversion(&self, item_code: &str, uom_code: &str) -> Result<Option<Decimal>, SourceError> {
        let items = self
            .items
            .read()
            .map_err(|_| SourceError::ItemMetadata("item table poisoned".to_string()))?;
        Ok(items.get(item_code).and_then(|i| i.uoms.get(uom_code).copied()))
    }
}
