//! `forgeerp-core`: shared building blocks for the stock reservation subsystem.
//!
//! This crate contains **pure** primitives (no infrastructure concerns): typed
//! identifiers, the error taxonomy, time abstraction and the reserved-quantity
//! oracle that sits between the allocation engine and the reservation ledger.

pub mod clock;
pub mod codes;
pub mod error;
pub mod id;
pub mod reserved;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codes::ErrorCode;
pub use error::{DomainError, DomainResult};
pub use id::{LockToken, ReservationId};
pub use reserved::{NoReservations, ReservedLookupError, ReservedQuantityProvider};
