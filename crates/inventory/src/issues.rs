//! Structured line errors and warnings.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeerp_core::ErrorCode;

use crate::batch::AvailableBatch;

/// Physical / reserved / available split reported on stock shortfalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBreakdown {
    pub physical: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
}

/// A fatal problem with one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineIssue {
    pub line_number: u32,
    pub code: ErrorCode,
    pub message: String,
    pub item_code: String,
    pub warehouse_code: String,
    pub batch_number: Option<String>,
    pub requested: Option<Decimal>,
    pub available: Option<Decimal>,
    pub stock: Option<StockBreakdown>,
    /// Other batches the caller could pick instead (bounded).
    pub alternatives: Vec<AvailableBatch>,
    pub suggested_action: String,
}

impl LineIssue {
    pub fn new(
        code: ErrorCode,
        line_number: u32,
        item_code: &str,
        warehouse_code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            line_number,
            code,
            message: message.into(),
            item_code: item_code.to_string(),
            warehouse_code: warehouse_code.to_string(),
            batch_number: None,
            requested: None,
            available: None,
            stock: None,
            alternatives: Vec::new(),
            suggested_action: code.suggested_action().to_string(),
        }
    }

    pub fn with_batch(mut self, batch_number: impl Into<String>) -> Self {
        self.batch_number = Some(batch_number.into());
        self
    }

    pub fn with_quantities(mut self, requested: Decimal, available: Decimal) -> Self {
        self.requested = Some(requested);
        self.available = Some(available);
        self
    }

    pub fn with_stock(mut self, stock: StockBreakdown) -> Self {
        self.available = Some(stock.available);
        self.stock = Some(stock);
        self
    }

    pub fn with_alternatives(mut self, alternatives: Vec<AvailableBatch>) -> Self {
        self.alternatives = alternatives;
        self
    }
}

/// Non-fatal observation attached to a line.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarningCode {
    /// A batch past its expiry date was selected.
    ExpiredBatch,
    /// A batch from the earlier allocation is no longer part of it.
    BatchNoLongerAvailable,
    /// A batch's availability dropped since the earlier allocation.
    AvailabilityDecreased,
    /// Batch picks were sent for an item that is not batch-managed.
    BatchesIgnored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineWarning {
    pub line_number: u32,
    pub code: WarningCode,
    pub message: String,
    pub batch_number: Option<String>,
}

impl LineWarning {
    pub fn new(code: WarningCode, line_number: u32, message: impl Into<String>) -> Self {
        Self {
            line_number,
            code,
            message: message.into(),
            batch_number: None,
        }
    }

    pub fn with_batch(mut self, batch_number: impl Into<String>) -> Self {
        self.batch_number = Some(batch_number.into());
        self
    }
}
