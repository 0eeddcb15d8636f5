mod common;

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;

use forgeerp_core::ErrorCode;
use forgeerp_inventory::{AllocationStrategy, RequestedBatch};
use forgeerp_reservations::{
    CreateReservationRequest, LedgerError, Reservation, ReservationLedger, ReservationLineRequest,
};

use common::{Harness, qty, sugar_order};

/// Retry on lock contention only; every other outcome is final.
async fn create_with_retry(
    ledger: Arc<ReservationLedger>,
    request: CreateReservationRequest,
) -> Result<Reservation, LedgerError> {
    loop {
        match ledger.create_reservation(request.clone()).await {
            Err(err) if err.retry_after().is_some() => tokio::task::yield_now().await,
            other => return other,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_never_exceed_stock() {
    let h = Harness::new();
    h.stock.set_quantity("SUGAR", "WH1", qty("5"));

    let tasks = (0..20).map(|i| {
        let ledger = h.ledger.clone();
        tokio::spawn(create_with_retry(ledger, sugar_order(&format!("SO-{i}"), "1")))
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    let created = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 5);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }
    assert_eq!(h.ledger.reserved_quantity("SUGAR", "WH1").await.unwrap(), qty("5"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_collapse_to_one_reservation() {
    let h = Harness::new();

    let tasks = (0..8).map(|_| {
        let ledger = h.ledger.clone();
        tokio::spawn(create_with_retry(ledger, sugar_order("SO-DUP", "3")))
    });
    let ids: HashSet<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap().id)
        .collect();

    assert_eq!(ids.len(), 1);
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.ledger.reserved_quantity("SUGAR", "WH1").await.unwrap(), qty("3"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_batch_and_plain_creates_stay_within_stock() {
    let h = Harness::new();

    let tasks = (0..12).map(|i| {
        let ledger = h.ledger.clone();
        let request = CreateReservationRequest::new(format!("MIX-{i}"), "webshop", "C-1")
            .with_line(ReservationLineRequest::new("SUGAR", "WH1", qty("2")))
            .with_line(
                ReservationLineRequest::new("FLOUR", "WH1", qty("3"))
                    .auto_allocate(AllocationStrategy::Fefo),
            );
        tokio::spawn(create_with_retry(ledger, request))
    });
    let created = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();

    // SUGAR allows 5 x 2, FLOUR allows 4 x 3: flour is the binding constraint.
    assert_eq!(created, 4);
    assert_eq!(h.ledger.reserved_quantity("FLOUR", "WH1").await.unwrap(), qty("12"));
    assert_eq!(h.ledger.reserved_quantity("SUGAR", "WH1").await.unwrap(), qty("8"));
    for batch in ["F1", "F2", "F3"] {
        assert_eq!(
            h.ledger.reserved_batch_quantity("FLOUR", "WH1", batch).await.unwrap(),
            qty("4")
        );
    }
}

#[tokio::test]
async fn repeated_plain_lines_share_one_stock_level() {
    let h = Harness::new();
    let request = CreateReservationRequest::new("SO-1", "webshop", "C-1")
        .with_line(ReservationLineRequest::new("SUGAR", "WH1", qty("8")))
        .with_line(ReservationLineRequest::new("SUGAR", "WH1", qty("8")));

    let err = h.ledger.create_reservation(request).await.unwrap_err();
    let validation = err.validation().unwrap();
    assert_eq!(validation.lines_passed, 1);
    assert_eq!(validation.errors[0].line_number, 2);
    assert_eq!(validation.errors[0].code, ErrorCode::InsufficientTotalStock);
    assert_eq!(h.ledger.reserved_quantity("SUGAR", "WH1").await.unwrap(), qty("0"));

    let request = CreateReservationRequest::new("SO-2", "webshop", "C-1")
        .with_line(ReservationLineRequest::new("SUGAR", "WH1", qty("6")))
        .with_line(ReservationLineRequest::new("SUGAR", "WH1", qty("4")));
    h.ledger.create_reservation(request).await.unwrap();
    assert_eq!(h.ledger.reserved_quantity("SUGAR", "WH1").await.unwrap(), qty("10"));
}

#[tokio::test]
async fn repeated_batch_picks_cannot_take_a_batch_twice() {
    let h = Harness::new();
    let pick_f1 = || ReservationLineRequest::new("FLOUR", "WH1", qty("4")).with_batches(vec![RequestedBatch::new("F1", qty("4"))]);
    let request = CreateReservationRequest::new("SO-1", "webshop", "C-1")
        .with_line(pick_f1())
        .with_line(pick_f1());

    let err = h.ledger.create_reservation(request).await.unwrap_err();
    let validation = err.validation().unwrap();
    assert_eq!(validation.errors.len(), 1);
    assert_eq!(validation.errors[0].line_number, 2);
    assert_eq!(validation.errors[0].code, ErrorCode::InsufficientBatchQuantity);
    assert_eq!(h.ledger.reserved_batch_quantity("FLOUR", "WH1", "F1").await.unwrap(), qty("0"));
}

#[tokio::test]
async fn repeated_auto_lines_allocate_from_what_is_left() {
    let h = Harness::new();
    let fefo = |q: &str| ReservationLineRequest::new("FLOUR", "WH1", qty(q)).auto_allocate(AllocationStrategy::Fefo);

    let over = CreateReservationRequest::new("SO-1", "webshop", "C-1")
        .with_line(fefo("8"))
        .with_line(fefo("8"));
    let err = h.ledger.create_reservation(over).await.unwrap_err();
    assert_eq!(err.validation().unwrap().errors[0].code, ErrorCode::InsufficientTotalStock);

    let exact = CreateReservationRequest::new("SO-2", "webshop", "C-1")
        .with_line(fefo("6"))
        .with_line(fefo("6"));
    let reservation = h.ledger.create_reservation(exact).await.unwrap();
    let second: Vec<&str> = reservation.lines[1].batches.iter().map(|b| b.batch_number.as_str()).collect();
    assert_eq!(second, vec!["F1", "F3"]);
    for batch in ["F1", "F2", "F3"] {
        assert_eq!(
            h.ledger.reserved_batch_quantity("FLOUR", "WH1", batch).await.unwrap(),
            qty("4")
        );
    }
}
