//! Reserved-quantity oracle.
//!
//! The allocation engine needs to know how much stock is already promised to
//! open reservations; the reservation ledger is the one that knows. Neither
//! depends on the other: the engine receives an implementation of this trait at
//! construction time and the ledger crate provides it.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::id::ReservationId;

/// Failure to read reservation state (storage unreachable, etc.).
#[derive(Debug, Clone, Error)]
#[error("reserved quantity lookup failed: {0}")]
pub struct ReservedLookupError(pub String);

/// Answers "how much of this stock is currently held by live reservations?".
///
/// Implementations must recompute on every call; this is the basis of the
/// no-oversell guarantee and must never be served from a cache.
#[async_trait]
pub trait ReservedQuantityProvider: Send + Sync {
    /// Quantity (inventory unit) reserved for `item` in `warehouse`.
    ///
    /// `exclude` removes one reservation from the sum (used when a reservation
    /// re-validates itself).
    async fn reserved_quantity(
        &self,
        item_code: &str,
        warehouse_code: &str,
        exclude: Option<ReservationId>,
    ) -> Result<Decimal, ReservedLookupError>;

    /// Quantity reserved for a single batch of `item` in `warehouse`.
    async fn reserved_batch_quantity(
        &self,
        item_code: &str,
        warehouse_code: &str,
        batch_number: &str,
        exclude: Option<ReservationId>,
    ) -> Result<Decimal, ReservedLookupError>;
}

/// Oracle that reports nothing reserved.
///
/// Useful when the engine runs without a ledger (e.g. pure document checks).
#[derive(Debug, Default, Copy, Clone)]
pub struct NoReservations;

#[async_trait]
impl ReservedQuantityProvider for NoReservations {
    async fn reserved_quantity(
        &self,
        _item_code: &str,
        _warehouse_code: &str,
        _exclude: Option<ReservationId>,
    ) -> Result<Decimal, ReservedLookupError> {
        Ok(Decimal::ZERO)
    }

    async fn reserved_batch_quantity(
        &self,
        _item_code: &str,
        _warehouse_code: &str,
        _batch_number: &str,
        _exclude: Option<ReservationId>,
    ) -> Result<Decimal, ReservedLookupError> {
        Ok(Decimal::ZERO)
    }
}
