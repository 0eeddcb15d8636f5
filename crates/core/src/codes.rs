//! Stable error codes shared by the allocation engine and the reservation ledger.

use serde::{Deserialize, Serialize};

/// Category of a structured, user-facing failure.
///
/// Every code carries a suggested remediation; callers surface it to end users
/// alongside the message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorCode {
    WarehouseRequired,
    BatchAllocationRequired,
    BatchNotFound,
    BatchQuantityMismatch,
    InsufficientBatchQuantity,
    InsufficientTotalStock,
    ItemNotFound,
    InvalidQuantity,
    LockAcquisitionFailed,
    DuplicateReference,
    ReservationNotFound,
    ReservationAlreadyConfirmed,
    ReservationExpired,
    InvalidState,
    RenewalLimitReached,
    PostingFailed,
    ValidationFailed,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::WarehouseRequired => "WAREHOUSE_REQUIRED",
            ErrorCode::BatchAllocationRequired => "BATCH_ALLOCATION_REQUIRED",
            ErrorCode::BatchNotFound => "BATCH_NOT_FOUND",
            ErrorCode::BatchQuantityMismatch => "BATCH_QUANTITY_MISMATCH",
            ErrorCode::InsufficientBatchQuantity => "INSUFFICIENT_BATCH_QUANTITY",
            ErrorCode::InsufficientTotalStock => "INSUFFICIENT_TOTAL_STOCK",
            ErrorCode::ItemNotFound => "ITEM_NOT_FOUND",
            ErrorCode::InvalidQuantity => "INVALID_QUANTITY",
            ErrorCode::LockAcquisitionFailed => "LOCK_ACQUISITION_FAILED",
            ErrorCode::DuplicateReference => "DUPLICATE_REFERENCE",
            ErrorCode::ReservationNotFound => "RESERVATION_NOT_FOUND",
            ErrorCode::ReservationAlreadyConfirmed => "RESERVATION_ALREADY_CONFIRMED",
            ErrorCode::ReservationExpired => "RESERVATION_EXPIRED",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::RenewalLimitReached => "RENEWAL_LIMIT_REACHED",
            ErrorCode::PostingFailed => "POSTING_FAILED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Human-readable remediation for this category.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            ErrorCode::WarehouseRequired => "Specify a warehouse code for every line.",
            ErrorCode::BatchAllocationRequired => {
                "This item is batch-managed: select batches explicitly or enable automatic allocation."
            }
            ErrorCode::BatchNotFound => {
                "Pick one of the listed alternative batches or refresh the available batch list."
            }
            ErrorCode::BatchQuantityMismatch => {
                "Make the batch quantities add up to the line quantity (after unit conversion)."
            }
            ErrorCode::InsufficientBatchQuantity => {
                "Reduce the quantity taken from this batch or split it across the listed alternatives."
            }
            ErrorCode::InsufficientTotalStock => {
                "Reduce the requested quantity, choose another warehouse or wait for replenishment."
            }
            ErrorCode::ItemNotFound => "Check the item code against the item master.",
            ErrorCode::InvalidQuantity => "Enter a quantity greater than zero.",
            ErrorCode::LockAcquisitionFailed => {
                "Another operation is using this stock; retry after the suggested delay."
            }
            ErrorCode::DuplicateReference => {
                "A reservation already exists for this reference; use the existing reservation."
            }
            ErrorCode::ReservationNotFound => "Check the reservation id.",
            ErrorCode::ReservationAlreadyConfirmed => {
                "The reservation was already posted; use the existing document reference."
            }
            ErrorCode::ReservationExpired => "Create a new reservation; the previous hold was released.",
            ErrorCode::InvalidState => "Reload the reservation; its status no longer allows this operation.",
            ErrorCode::RenewalLimitReached => {
                "The reservation cannot be extended further; confirm it or create a new one."
            }
            ErrorCode::PostingFailed => {
                "Posting to the ledger of record failed; review the error and create a new reservation."
            }
            ErrorCode::ValidationFailed => "Fix the listed line errors and submit again.",
            ErrorCode::ServiceUnavailable => "A backing service is unavailable; retry later.",
        }
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
