//! Batch snapshots and allocation results.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order in which batches are consumed by automatic allocation.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationStrategy {
    /// First expired, first out: earliest expiry date first.
    #[default]
    Fefo,
    /// First in, first out: earliest admission date first.
    Fifo,
}

/// Read-only view of one batch's stock, recomputed per query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableBatch {
    pub batch_number: String,
    pub available_quantity: Decimal,
    pub expiry_date: Option<NaiveDate>,
    pub admission_date: Option<NaiveDate>,
}

impl AvailableBatch {
    pub fn new(batch_number: impl Into<String>, available_quantity: Decimal) -> Self {
        Self {
            batch_number: batch_number.into(),
            available_quantity,
            expiry_date: None,
            admission_date: None,
        }
    }

    pub fn with_expiry(mut self, expiry: NaiveDate) -> Self {
        self.expiry_date = Some(expiry);
        self
    }

    pub fn with_admission(mut self, admission: NaiveDate) -> Self {
        self.admission_date = Some(admission);
        self
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|d| d < today)
    }
}

/// A batch (and quantity, in inventory units) chosen explicitly by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedBatch {
    pub batch_number: String,
    pub quantity: Decimal,
}

impl RequestedBatch {
    pub fn new(batch_number: impl Into<String>, quantity: Decimal) -> Self {
        Self {
            batch_number: batch_number.into(),
            quantity,
        }
    }
}

/// One batch's share of an allocated line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedBatch {
    pub batch_number: String,
    pub quantity_allocated: Decimal,
    /// Effective availability of the batch when it was picked.
    pub available_before: Decimal,
    pub remaining_after: Decimal,
    /// 1-based position in consumption order.
    pub allocation_order: u32,
    pub expiry_date: Option<NaiveDate>,
}

/// Allocation outcome for one document line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedBatchLine {
    pub line_number: u32,
    pub item_code: String,
    pub warehouse_code: String,
    /// Quantity in the line's own unit of measure.
    pub requested_quantity: Decimal,
    pub uom_code: Option<String>,
    pub conversion_factor: Decimal,
    /// `requested_quantity × conversion_factor`.
    pub inventory_quantity: Decimal,
    pub total_allocated: Decimal,
    pub batch_managed: bool,
    /// Empty for items that are not batch-managed.
    pub batches: Vec<AllocatedBatch>,
}

impl AllocatedBatchLine {
    pub fn batch(&self, batch_number: &str) -> Option<&AllocatedBatch> {
        self.batches.iter().find(|b| b.batch_number == batch_number)
    }
}
