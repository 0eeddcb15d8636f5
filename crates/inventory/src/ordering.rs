//! FEFO/FIFO ordering and greedy batch consumption.
//!
//! Pure functions: no IO, deterministic for a given input.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::batch::{AllocatedBatch, AllocationStrategy, AvailableBatch};

/// Missing dates sort after every real date.
const UNDATED: NaiveDate = NaiveDate::MAX;

/// Sort batches in consumption order for `strategy`.
///
/// FEFO: expiry ascending, then admission ascending.
/// FIFO: admission ascending, then expiry ascending.
/// The sort is stable, so fully tied batches keep their source order.
pub fn sort_batches(batches: &mut [AvailableBatch], strategy: AllocationStrategy) {
    match strategy {
        AllocationStrategy::Fefo => batches.sort_by_key(|b| {
            (
                b.expiry_date.unwrap_or(UNDATED),
                b.admission_date.unwrap_or(UNDATED),
            )
        }),
        AllocationStrategy::Fifo => batches.sort_by_key(|b| {
            (
                b.admission_date.unwrap_or(UNDATED),
                b.expiry_date.unwrap_or(UNDATED),
            )
        }),
    }
}

/// Take `needed` from `sorted` batches in order.
///
/// Batches must already hold their *effective* availability. Stops as soon as
/// `needed` is covered; if the batches cannot cover it, everything available
/// is taken and the caller decides what a shortfall means.
pub fn allocate_greedy(sorted: &[AvailableBatch], needed: Decimal) -> Vec<AllocatedBatch> {
    let mut remaining = needed;
    let mut allocated = Vec::new();

    for batch in sorted {
        if remaining <= Decimal::ZERO {
            break;
        }
        if batch.available_quantity <= Decimal::ZERO {
            continue;
        }
        let take = remaining.min(batch.available_quantity);
        remaining -= take;
        allocated.push(AllocatedBatch {
            batch_number: batch.batch_number.clone(),
            quantity_allocated: take,
            available_before: batch.available_quantity,
            remaining_after: batch.available_quantity - take,
            allocation_order: allocated.len() as u32 + 1,
            expiry_date: batch.expiry_date,
        });
    }

    allocated
}
