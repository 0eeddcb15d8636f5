//! Batch allocation engine.
//!
//! Decides how much of a requested document line can be served, and from which
//! batches, given physical stock, stock already held by live reservations and
//! the line's unit of measure. Shortfalls are reported as structured results;
//! only collaborator failures surface as errors.

pub mod batch;
pub mod clearance;
pub mod engine;
pub mod issues;
pub mod memory;
pub mod ordering;
pub mod sources;
pub mod validation;

pub use batch::{AllocatedBatch, AllocatedBatchLine, AllocationStrategy, AvailableBatch, RequestedBatch};
pub use clearance::PostingClearance;
pub use engine::{BatchAllocationEngine, EngineConfig};
pub use issues::{LineIssue, LineWarning, StockBreakdown, WarningCode};
pub use memory::{InMemoryItemCatalog, InMemoryStockSource};
pub use sources::{ItemMetadataSource, SourceError, StockSource};
pub use validation::{DocumentValidation, LineRequest, LineValidation};

/// Two quantities closer than this are considered equal.
pub const QUANTITY_TOLERANCE: rust_decimal::Decimal = rust_decimal::Decimal::from_parts(1, 0, 0, false, 4);

/// Upper bound on alternative batches attached to one issue.
pub const MAX_ALTERNATIVES: usize = 5;
