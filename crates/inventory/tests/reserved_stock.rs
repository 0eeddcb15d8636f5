use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use forgeerp_core::{ErrorCode, ManualClock, ReservationId, ReservedLookupError, ReservedQuantityProvider};
use forgeerp_inventory::{
    AllocationStrategy, AvailableBatch, BatchAllocationEngine, EngineConfig, InMemoryItemCatalog,
    InMemoryStockSource, LineRequest, RequestedBatch,
};
use forgeerp_locking::{LockManager, LockManagerConfig};

fn qty(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Fixed reservations, keyed by batch number ("" for the item total).
#[derive(Default)]
struct FixedReservations {
    held: HashMap<String, Decimal>,
    owner: Option<ReservationId>,
}

#[async_trait]
impl ReservedQuantityProvider for FixedReservations {
    async fn reserved_quantity(
        &self,
        _item: &str,
        _warehouse: &str,
        exclude: Option<ReservationId>,
    ) -> Result<Decimal, ReservedLookupError> {
        if exclude.is_some() && exclude == self.owner {
            return Ok(Decimal::ZERO);
        }
        Ok(self.held.get("").copied().unwrap_or_default())
    }

    async fn reserved_batch_quantity(
        &self,
        _item: &str,
        _warehouse: &str,
        batch: &str,
        exclude: Option<ReservationId>,
    ) -> Result<Decimal, ReservedLookupError> {
        if exclude.is_some() && exclude == self.owner {
            return Ok(Decimal::ZERO);
        }
        Ok(self.held.get(batch).copied().unwrap_or_default())
    }
}

fn engine(reserved: FixedReservations) -> BatchAllocationEngine {
    let clock = Arc::new(ManualClock::default());
    let stock = Arc::new(InMemoryStockSource::new());
    let items = Arc::new(InMemoryItemCatalog::new());

    items.add_item("SUGAR", false);
    stock.set_quantity("SUGAR", "WH1", qty("10"));

    items.add_item("FLOUR", true);
    stock.set_batches(
        "FLOUR",
        "WH1",
        vec![
            AvailableBatch::new("F1", qty("4")),
            AvailableBatch::new("F2", qty("4")),
            AvailableBatch::new("F3", qty("4")),
        ],
    );

    BatchAllocationEngine::new(
        stock,
        items,
        Arc::new(reserved),
        Arc::new(LockManager::new(clock.clone(), LockManagerConfig::default())),
        clock,
        EngineConfig::default(),
    )
}

#[tokio::test]
async fn reserved_stock_is_not_available() {
    let owner = ReservationId::new();
    let engine = engine(FixedReservations {
        held: HashMap::from([("".to_string(), qty("7")), ("F1".to_string(), qty("4"))]),
        owner: Some(owner),
    });

    let sugar = LineRequest::new(1, "SUGAR", "WH1", qty("4"));
    let result = engine.validate_and_allocate(&sugar).await.unwrap();
    let issue = &result.errors[0];
    assert_eq!(issue.code, ErrorCode::InsufficientTotalStock);
    let stock = issue.stock.unwrap();
    assert_eq!((stock.physical, stock.reserved, stock.available), (qty("10"), qty("7"), qty("3")));

    // The owner re-validating itself is not blocked by its own hold.
    let result = engine.validate_and_allocate_excluding(&sugar, owner).await.unwrap();
    assert!(result.is_valid());
}

#[tokio::test]
async fn fully_reserved_batches_are_skipped_by_auto_allocation() {
    let engine = engine(FixedReservations {
        held: HashMap::from([("F1".to_string(), qty("4")), ("F2".to_string(), qty("1"))]),
        owner: None,
    });

    let line = LineRequest::new(1, "FLOUR", "WH1", qty("5")).auto_allocate(AllocationStrategy::Fifo);
    let result = engine.validate_and_allocate(&line).await.unwrap();
    let allocation = result.allocation.expect("allocated");

    let picks: Vec<(&str, Decimal)> = allocation
        .batches
        .iter()
        .map(|b| (b.batch_number.as_str(), b.quantity_allocated))
        .collect();
    assert_eq!(picks, vec![("F2", qty("3")), ("F3", qty("2"))]);
    assert_eq!(allocation.batches[0].available_before, qty("3"));
}

#[tokio::test]
async fn explicit_pick_of_reserved_batch_fails() {
    let engine = engine(FixedReservations {
        held: HashMap::from([("F1".to_string(), qty("3"))]),
        owner: None,
    });

    let line = LineRequest::new(1, "FLOUR", "WH1", qty("2"))
        .with_batches(vec![RequestedBatch::new("F1", qty("2"))]);
    let result = engine.validate_and_allocate(&line).await.unwrap();
    assert_eq!(result.errors[0].code, ErrorCode::InsufficientBatchQuantity);
    let alternatives: Vec<&str> = result.errors[0]
        .alternatives
        .iter()
        .map(|b| b.batch_number.as_str())
        .collect();
    assert_eq!(alternatives, vec!["F2", "F3"]);
}

#[tokio::test]
async fn document_lines_validate_independently() {
    let engine = engine(FixedReservations::default());
    let lines = vec![
        LineRequest::new(1, "SUGAR", "WH1", qty("2")),
        LineRequest::new(2, "FLOUR", "WH1", qty("2")),
        LineRequest::new(3, "FLOUR", "WH1", qty("20")).auto_allocate(AllocationStrategy::Fefo),
        LineRequest::new(4, "SUGAR", "", qty("1")),
    ];

    let doc = engine.validate_document(&lines).await.unwrap();
    assert_eq!(doc.total_lines, 4);
    assert_eq!(doc.lines_passed, 1);
    let failed: Vec<(u32, ErrorCode)> = doc.errors.iter().map(|e| (e.line_number, e.code)).collect();
    assert_eq!(
        failed,
        vec![
            (2, ErrorCode::BatchAllocationRequired),
            (3, ErrorCode::InsufficientTotalStock),
            (4, ErrorCode::WarehouseRequired),
        ]
    );
    assert_eq!(doc.suggestions.len(), 3);
}
