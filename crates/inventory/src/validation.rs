//! Line requests and aggregated validation results.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeerp_core::ErrorCode;

use crate::batch::{AllocatedBatchLine, AllocationStrategy, RequestedBatch};
use crate::issues::{LineIssue, LineWarning};

/// One document line to validate and allocate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    pub line_number: u32,
    pub item_code: String,
    pub warehouse_code: String,
    /// Quantity in `uom_code` units (inventory unit when `uom_code` is `None`).
    pub quantity: Decimal,
    pub uom_code: Option<String>,
    /// Explicit batch picks, in inventory units. Takes precedence over auto-allocation.
    pub batches: Vec<RequestedBatch>,
    pub auto_allocate: bool,
    pub strategy: AllocationStrategy,
}

impl LineRequest {
    pub fn new(
        line_number: u32,
        item_code: impl Into<String>,
        warehouse_code: impl Into<String>,
        quantity: Decimal,
    ) -> Self {
        Self {
            line_number,
            item_code: item_code.into(),
            warehouse_code: warehouse_code.into(),
            quantity,
            uom_code: None,
            batches: Vec::new(),
            auto_allocate: false,
            strategy: AllocationStrategy::default(),
        }
    }

    pub fn with_uom(mut self, uom_code: impl Into<String>) -> Self {
        self.uom_code = Some(uom_code.into());
        self
    }

    pub fn with_batches(mut self, batches: Vec<RequestedBatch>) -> Self {
        self.batches = batches;
        self
    }

    pub fn auto_allocate(mut self, strategy: AllocationStrategy) -> Self {
        self.auto_allocate = true;
        self.strategy = strategy;
        self
    }

    /// Replay a previous allocation as explicit batch picks.
    pub fn from_allocation(line: &AllocatedBatchLine) -> Self {
        let mut request = Self::new(
            line.line_number,
            line.item_code.clone(),
            line.warehouse_code.clone(),
            line.requested_quantity,
        );
        request.uom_code = line.uom_code.clone();
        request.batches = line
            .batches
            .iter()
            .map(|b| RequestedBatch::new(b.batch_number.clone(), b.quantity_allocated))
            .collect();
        request
    }
}

/// Result of validating a single line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineValidation {
    pub line_number: u32,
    /// Present only when the line passed.
    pub allocation: Option<AllocatedBatchLine>,
    pub errors: Vec<LineIssue>,
    pub warnings: Vec<LineWarning>,
}

impl LineValidation {
    pub(crate) fn new(line_number: u32) -> Self {
        Self {
            line_number,
            allocation: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.allocation.is_some()
    }

    pub(crate) fn reject(&mut self, issue: LineIssue) {
        self.errors.push(issue);
    }

    pub(crate) fn warn(&mut self, warning: LineWarning) {
        self.warnings.push(warning);
    }

    pub(crate) fn accept(&mut self, allocation: AllocatedBatchLine) {
        if self.errors.is_empty() {
            self.allocation = Some(allocation);
        }
    }
}

/// Aggregate over every line of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentValidation {
    pub lines: Vec<LineValidation>,
    pub total_lines: usize,
    pub lines_passed: usize,
    /// All line errors, in line order.
    pub errors: Vec<LineIssue>,
    /// All line warnings, in line order.
    pub warnings: Vec<LineWarning>,
    /// One remediation per distinct error category observed.
    pub suggestions: Vec<String>,
}

impl DocumentValidation {
    pub fn from_lines(lines: Vec<LineValidation>) -> Self {
        let total_lines = lines.len();
        let lines_passed = lines.iter().filter(|l| l.is_valid()).count();
        let errors: Vec<LineIssue> = lines.iter().flat_map(|l| l.errors.iter().cloned()).collect();
        let warnings: Vec<LineWarning> = lines.iter().flat_map(|l| l.warnings.iter().cloned()).collect();
        let suggestions = suggestions_for(&errors);

        Self {
            lines,
            total_lines,
            lines_passed,
            errors,
            warnings,
            suggestions,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lines_passed == self.total_lines
    }

    /// Allocations of the lines that passed, in line order.
    pub fn allocations(&self) -> Vec<AllocatedBatchLine> {
        self.lines.iter().filter_map(|l| l.allocation.clone()).collect()
    }

    pub fn error_codes(&self) -> Vec<ErrorCode> {
        let mut codes = Vec::new();
        for issue in &self.errors {
            if !codes.contains(&issue.code) {
                codes.push(issue.code);
            }
        }
        codes
    }
}

fn suggestions_for(errors: &[LineIssue]) -> Vec<String> {
    let mut categories: Vec<Category> = Vec::new();
    for issue in errors {
        let category = Category::of(issue.code);
        if !categories.contains(&category) {
            categories.push(category);
        }
    }
    categories.into_iter().map(|c| c.suggestion().to_string()).collect()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Category {
    Warehouse,
    BatchSelection,
    UnknownBatch,
    BatchTotals,
    Stock,
    Item,
    Quantity,
    Other(ErrorCode),
}

impl Category {
    fn of(code: ErrorCode) -> Self {
        match code {
            ErrorCode::WarehouseRequired => Category::Warehouse,
            ErrorCode::BatchAllocationRequired => Category::BatchSelection,
            ErrorCode::BatchNotFound => Category::UnknownBatch,
            ErrorCode::BatchQuantityMismatch => Category::BatchTotals,
            ErrorCode::InsufficientBatchQuantity | ErrorCode::InsufficientTotalStock => Category::Stock,
            ErrorCode::ItemNotFound => Category::Item,
            ErrorCode::InvalidQuantity => Category::Quantity,
            other => Category::Other(other),
        }
    }

    fn suggestion(&self) -> &'static str {
        match self {
            Category::Warehouse => "Assign a warehouse to every line before submitting.",
            Category::BatchSelection => {
                "Select batches for batch-managed items or turn on automatic batch allocation."
            }
            Category::UnknownBatch => "Some batches no longer hold stock; pick from the suggested alternatives.",
            Category::BatchTotals => "Adjust batch quantities so each line's batches add up to its quantity.",
            Category::Stock => {
                "Reduce quantities, split lines across batches or warehouses, or wait for replenishment."
            }
            Category::Item => "Verify the item codes against the item master.",
            Category::Quantity => "Use quantities greater than zero.",
            Category::Other(code) => code.suggested_action(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(line: u32, code: ErrorCode) -> LineIssue {
        LineIssue::new(code, line, "ITEM", "WH", "boom")
    }

    fn failed(line: u32, codes: &[ErrorCode]) -> LineValidation {
        let mut v = LineValidation::new(line);
        for code in codes {
            v.reject(issue(line, *code));
        }
        v
    }

    #[test]
    fn one_suggestion_per_category() {
        let doc = DocumentValidation::from_lines(vec![
            failed(1, &[ErrorCode::InsufficientTotalStock]),
            failed(2, &[ErrorCode::InsufficientBatchQuantity, ErrorCode::BatchNotFound]),
            failed(3, &[ErrorCode::InsufficientTotalStock]),
        ]);

        assert_eq!(doc.total_lines, 3);
        assert_eq!(doc.lines_passed, 0);
        assert_eq!(doc.errors.len(), 4);
        assert_eq!(doc.suggestions.len(), 2);
        assert_eq!(
            doc.error_codes(),
            vec![
                ErrorCode::InsufficientTotalStock,
                ErrorCode::InsufficientBatchQuantity,
                ErrorCode::BatchNotFound
            ]
        );
    }

    #[test]
    fn errors_keep_line_order() {
        let doc = DocumentValidation::from_lines(vec![
            failed(1, &[ErrorCode::WarehouseRequired]),
            failed(2, &[ErrorCode::ItemNotFound]),
        ]);
        let lines: Vec<u32> = doc.errors.iter().map(|e| e.line_number).collect();
        assert_eq!(lines, vec![1, 2]);
        assert!(!doc.is_valid());
    }
}
