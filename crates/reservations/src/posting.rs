//! The ledger of record that turns a confirmed reservation into a document.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgeerp_core::ReservationId;

use crate::reservation::Reservation;

/// Downstream posting failure. Always terminal for the reservation.
#[derive(Debug, Clone, Error)]
pub enum PostingError {
    #[error("document rejected: {0}")]
    Rejected(String),

    #[error("posting service unavailable: {0}")]
    Unavailable(String),
}

/// Document handed to the posting collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRequest {
    pub reservation_id: ReservationId,
    pub external_reference_id: String,
    pub source_system: String,
    pub counterparty_code: String,
    pub currency: String,
    pub total_value: Decimal,
    pub lines: Vec<PostingLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingLine {
    pub line_number: u32,
    pub item_code: String,
    pub warehouse_code: String,
    pub quantity: Decimal,
    pub uom_code: Option<String>,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub batches: Vec<PostingBatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingBatch {
    pub batch_number: String,
    pub quantity: Decimal,
    pub expiry_date: Option<NaiveDate>,
}

impl PostingRequest {
    pub fn from_reservation(reservation: &Reservation) -> Self {
        Self {
            reservation_id: reservation.id,
            external_reference_id: reservation.external_reference_id.clone(),
            source_system: reservation.source_system.clone(),
            counterparty_code: reservation.counterparty_code.clone(),
            currency: reservation.currency.clone(),
            total_value: reservation.total_value,
            lines: reservation
                .lines
                .iter()
                .map(|line| PostingLine {
                    line_number: line.line_number,
                    item_code: line.item_code.clone(),
                    warehouse_code: line.warehouse_code.clone(),
                    quantity: line.quantity,
                    uom_code: line.uom_code.clone(),
                    unit_price: line.unit_price,
                    line_total: line.line_total,
                    batches: line
                        .batches
                        .iter()
                        .map(|b| PostingBatch {
                            batch_number: b.batch_number.clone(),
                            quantity: b.reserved_quantity,
                            expiry_date: b.expiry_date,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Creates the sales document for a confirmed reservation.
#[async_trait]
pub trait PostingCollaborator: Send + Sync {
    /// Returns the reference of the created document.
    async fn post_document(&self, request: &PostingRequest) -> Result<String, PostingError>;
}
