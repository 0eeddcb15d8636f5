//! Reservation record and its lines.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use forgeerp_core::ReservationId;
use forgeerp_inventory::{AllocatedBatchLine, AllocationStrategy, LineRequest, RequestedBatch};

/// Lifecycle of a reservation.
///
/// Only `Pending` holds stock. Every other status is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
    Failed,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Expired => "expired",
            ReservationStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-bounded hold on stock for a pending sales document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    /// Caller-supplied idempotency key.
    pub external_reference_id: String,
    pub source_system: String,
    pub counterparty_code: String,
    pub currency: String,
    pub total_value: Decimal,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub failure_reason: Option<String>,
    /// Document created by the ledger of record on confirmation.
    pub document_reference: Option<String>,
    pub renewal_count: u32,
    pub lines: Vec<ReservationLine>,
}

impl Reservation {
    /// Whether this reservation counts against available stock at `now`.
    pub fn holds_stock(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && self.expires_at > now
    }

    /// Pending, but past its expiry and not yet swept.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && self.expires_at <= now
    }

    /// Quantity (inventory unit) this reservation holds for an item in a warehouse.
    pub fn held_quantity(&self, item_code: &str, warehouse_code: &str) -> Decimal {
        self.lines
            .iter()
            .filter(|l| l.item_code == item_code && l.warehouse_code == warehouse_code)
            .map(ReservationLine::reserved_quantity)
            .sum()
    }

    /// Quantity (inventory unit) this reservation holds from one batch.
    pub fn held_batch_quantity(&self, item_code: &str, warehouse_code: &str, batch_number: &str) -> Decimal {
        self.lines
            .iter()
            .filter(|l| l.item_code == item_code && l.warehouse_code == warehouse_code)
            .flat_map(|l| l.batches.iter())
            .filter(|b| b.batch_number == batch_number)
            .map(|b| b.reserved_quantity)
            .sum()
    }

    /// Lines replayed as explicit picks, for revalidation.
    pub fn line_requests(&self) -> Vec<LineRequest> {
        self.lines.iter().map(ReservationLine::to_request).collect()
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub line_number: u32,
    pub item_code: String,
    pub warehouse_code: String,
    /// As requested, in `uom_code`.
    pub quantity: Decimal,
    pub uom_code: Option<String>,
    /// `quantity` converted to the inventory unit.
    pub inventory_quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub batches: Vec<ReservationBatchAllocation>,
}

impl ReservationLine {
    /// Build a line from an engine allocation.
    pub fn from_allocation(allocation: &AllocatedBatchLine, unit_price: Decimal) -> Self {
        let batches = allocation
            .batches
            .iter()
            .map(|b| ReservationBatchAllocation {
                item_code: allocation.item_code.clone(),
                batch_number: b.batch_number.clone(),
                warehouse_code: allocation.warehouse_code.clone(),
                reserved_quantity: b.quantity_allocated,
                expiry_date: b.expiry_date,
            })
            .collect();
        Self {
            line_number: allocation.line_number,
            item_code: allocation.item_code.clone(),
            warehouse_code: allocation.warehouse_code.clone(),
            quantity: allocation.requested_quantity,
            uom_code: allocation.uom_code.clone(),
            inventory_quantity: allocation.inventory_quantity,
            unit_price,
            line_total: allocation.requested_quantity * unit_price,
            batches,
        }
    }

    /// Held quantity: the batch total for batch lines, the inventory quantity otherwise.
    pub fn reserved_quantity(&self) -> Decimal {
        if self.batches.is_empty() {
            self.inventory_quantity
        } else {
            self.batches.iter().map(|b| b.reserved_quantity).sum()
        }
    }

    fn to_request(&self) -> LineRequest {
        let mut request = LineRequest::new(
            self.line_number,
            self.item_code.clone(),
            self.warehouse_code.clone(),
            self.quantity,
        );
        request.uom_code = self.uom_code.clone();
        request.batches = self
            .batches
            .iter()
            .map(|b| RequestedBatch::new(b.batch_number.clone(), b.reserved_quantity))
            .collect();
        request
    }
}

/// Quantity held from one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationBatchAllocation {
    pub item_code: String,
    pub batch_number: String,
    pub warehouse_code: String,
    pub reserved_quantity: Decimal,
    pub expiry_date: Option<NaiveDate>,
}

/// Input to `create_reservation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReservationRequest {
    pub external_reference_id: String,
    pub source_system: String,
    pub counterparty_code: String,
    pub currency: String,
    /// How long stock is held; the ledger default applies when absent.
    pub duration: Option<Duration>,
    pub lines: Vec<ReservationLineRequest>,
}

impl CreateReservationRequest {
    pub fn new(
        external_reference_id: impl Into<String>,
        source_system: impl Into<String>,
        counterparty_code: impl Into<String>,
    ) -> Self {
        Self {
            external_reference_id: external_reference_id.into(),
            source_system: source_system.into(),
            counterparty_code: counterparty_code.into(),
            currency: String::new(),
            duration: None,
            lines: Vec::new(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_duration_minutes(self, minutes: u64) -> Self {
        self.with_duration(Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn with_line(mut self, line: ReservationLineRequest) -> Self {
        self.lines.push(line);
        self
    }

    /// Lines numbered from 1 in request order.
    pub(crate) fn line_requests(&self) -> Vec<LineRequest> {
        self.lines
            .iter()
            .zip(1u32..)
            .map(|(line, number)| line.to_request(number))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLineRequest {
    pub item_code: String,
    pub warehouse_code: String,
    pub quantity: Decimal,
    pub uom_code: Option<String>,
    pub unit_price: Decimal,
    pub batches: Vec<RequestedBatch>,
    pub auto_allocate: bool,
    pub strategy: AllocationStrategy,
}

impl ReservationLineRequest {
    pub fn new(item_code: impl Into<String>, warehouse_code: impl Into<String>, quantity: Decimal) -> Self {
        Self {
            item_code: item_code.into(),
            warehouse_code: warehouse_code.into(),
            quantity,
            uom_code: None,
            unit_price: Decimal::ZERO,
            batches: Vec::new(),
            auto_allocate: false,
            strategy: AllocationStrategy::default(),
        }
    }

    pub fn with_uom(mut self, uom_code: impl Into<String>) -> Self {
        self.uom_code = Some(uom_code.into());
        self
    }

    pub fn with_unit_price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = unit_price;
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

    fn to_request(&self, line_number: u32) -> LineRequest {
        let mut request = LineRequest::new(
            line_number,
            self.item_code.clone(),
            self.warehouse_code.clone(),
            self.quantity,
        )
        .with_batches(self.batches.clone());
        request.uom_code = self.uom_code.clone();
        if self.auto_allocate {
            request = request.auto_allocate(self.strategy);
        }
        request
    }
}
