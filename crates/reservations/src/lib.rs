//! Reservation ledger.
//!
//! A reservation holds stock for a pending sales document until it is
//! confirmed (posted downstream), cancelled, or expires. Live reservations are
//! what the allocation engine subtracts from physical stock; [`ReservedStock`]
//! is the view it reads them through.
//!
//! ```text
//!             confirm ok
//!   Pending ─────────────► Confirmed
//!     │ │ │   confirm err
//!     │ │ └──────────────► Failed
//!     │ └─ cancel ───────► Cancelled
//!     └─── expiry ───────► Expired
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod posting;
pub mod reservation;
pub mod store;

pub use config::LedgerConfig;
pub use error::LedgerError;
pub use ledger::ReservationLedger;
pub use oracle::ReservedStock;
pub use posting::{PostingBatch, PostingCollaborator, PostingError, PostingLine, PostingRequest};
pub use reservation::{
    CreateReservationRequest, Reservation, ReservationBatchAllocation, ReservationLine, ReservationLineRequest,
    ReservationStatus,
};
pub use store::{InMemoryReservationStore, InsertOutcome, ReservationStore, StoreError};
