#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use rust_decimal::Decimal;

use forgeerp_core::ManualClock;
use forgeerp_inventory::{AvailableBatch, BatchAllocationEngine, EngineConfig, InMemoryItemCatalog, InMemoryStockSource};
use forgeerp_locking::{LockManager, LockManagerConfig};
use forgeerp_reservations::{
    CreateReservationRequest, InMemoryReservationStore, LedgerConfig, PostingCollaborator, PostingError,
    PostingRequest, ReservationLedger, ReservationLineRequest, ReservedStock,
};

pub fn qty(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub type PostHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Posts documents as `INV-1`, `INV-2`, ... or fails when told to.
#[derive(Default)]
pub struct ScriptedPoster {
    posted: Mutex<Vec<PostingRequest>>,
    failure: Mutex<Option<PostingError>>,
    while_posting: Mutex<Option<PostHook>>,
    calls: AtomicUsize,
}

impl ScriptedPoster {
    /// Run `hook` in the middle of every post.
    pub fn while_posting(&self, hook: impl Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static) {
        *self.while_posting.lock().unwrap() = Some(Arc::new(hook));
    }

    pub fn fail_with(&self, err: PostingError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn posted(&self) -> Vec<PostingRequest> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostingCollaborator for ScriptedPoster {
    async fn post_document(&self, request: &PostingRequest) -> Result<String, PostingError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let hook = self.while_posting.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook().await;
        }
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.posted.lock().unwrap().push(request.clone());
        Ok(format!("INV-{n}"))
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub stock: Arc<InMemoryStockSource>,
    pub items: Arc<InMemoryItemCatalog>,
    pub store: Arc<InMemoryReservationStore>,
    pub poster: Arc<ScriptedPoster>,
    pub ledger: Arc<ReservationLedger>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    /// SUGAR: 10 on hand in WH1, not batch-managed.
    /// FLOUR: batches F1 (4, expires Mar), F2 (4, expires Feb), F3 (4, no expiry) in WH1.
    pub fn with_config(config: LedgerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 7, 9, 0, 0).unwrap()));
        let stock = Arc::new(InMemoryStockSource::new());
        let items = Arc::new(InMemoryItemCatalog::new());
        let store = InMemoryReservationStore::arc();
        let poster = Arc::new(ScriptedPoster::default());

        items.add_item("SUGAR", false);
        items.add_uom("SUGAR", "BOX", qty("2"));
        stock.set_quantity("SUGAR", "WH1", qty("10"));

        items.add_item("FLOUR", true);
        stock.set_batches(
            "FLOUR",
            "WH1",
            vec![
                AvailableBatch::new("F1", qty("4")).with_expiry(chrono::NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()),
                AvailableBatch::new("F2", qty("4")).with_expiry(chrono::NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()),
                AvailableBatch::new("F3", qty("4")),
            ],
        );

        let locks = Arc::new(LockManager::new(clock.clone(), LockManagerConfig::default()));
        let engine = Arc::new(BatchAllocationEngine::new(
            stock.clone(),
            items.clone(),
            Arc::new(ReservedStock::new(store.clone(), clock.clone())),
            locks,
            clock.clone(),
            EngineConfig::default(),
        ));
        let ledger = Arc::new(ReservationLedger::new(
            store.clone(),
            engine,
            poster.clone(),
            clock.clone(),
            config,
        ));

        Self {
            clock,
            stock,
            items,
            store,
            poster,
            ledger,
        }
    }
}

pub fn sugar_order(reference: &str, quantity: &str) -> CreateReservationRequest {
    CreateReservationRequest::new(reference, "webshop", "C-100")
        .with_currency("EUR")
        .with_line(ReservationLineRequest::new("SUGAR", "WH1", qty(quantity)).with_unit_price(qty("2.50")))
}
