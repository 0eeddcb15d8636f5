//! Wiring of the lock manager, allocation engine and reservation ledger.

use std::sync::Arc;

use forgeerp_core::{Clock, SystemClock};
use forgeerp_inventory::{
    BatchAllocationEngine, InMemoryItemCatalog, InMemoryStockSource, ItemMetadataSource, StockSource,
};
use forgeerp_locking::LockManager;
use forgeerp_reservations::{
    InMemoryReservationStore, PostingCollaborator, ReservationLedger, ReservationStore, ReservedStock,
};

use crate::config::InventoryConfig;
use crate::expiry_worker::ExpiryWorker;

/// Shared handles to the subsystem's components.
///
/// Construction order is fixed: store, reserved-stock view, engine, ledger.
/// The engine and the ledger share one lock manager.
#[derive(Clone)]
pub struct InventoryServices {
    pub clock: Arc<dyn Clock>,
    pub locks: Arc<LockManager>,
    pub engine: Arc<BatchAllocationEngine>,
    pub store: Arc<dyn ReservationStore>,
    pub ledger: Arc<ReservationLedger>,
    config: InventoryConfig,
}

impl InventoryServices {
    pub fn build(
        config: InventoryConfig,
        stock: Arc<dyn StockSource>,
        items: Arc<dyn ItemMetadataSource>,
        store: Arc<dyn ReservationStore>,
        poster: Arc<dyn PostingCollaborator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let locks = Arc::new(LockManager::new(clock.clone(), config.locks.clone()));
        let reserved = Arc::new(ReservedStock::new(store.clone(), clock.clone()));
        let engine = Arc::new(BatchAllocationEngine::new(
            stock,
            items,
            reserved,
            locks.clone(),
            clock.clone(),
            config.engine.clone(),
        ));
        let ledger = Arc::new(ReservationLedger::new(
            store.clone(),
            engine.clone(),
            poster,
            clock.clone(),
            config.ledger.clone(),
        ));

        tracing::debug!(
            default_minutes = config.ledger.default_duration.as_secs() / 60,
            max_renewals = config.ledger.max_renewals,
            "inventory services wired"
        );

        Self {
            clock,
            locks,
            engine,
            store,
            ledger,
            config,
        }
    }

    /// In-memory stock, item master and reservation store on the system clock (dev/test).
    pub fn in_memory(
        config: InventoryConfig,
        stock: Arc<InMemoryStockSource>,
        items: Arc<InMemoryItemCatalog>,
        poster: Arc<dyn PostingCollaborator>,
    ) -> Self {
        Self::build(
            config,
            stock,
            items,
            InMemoryReservationStore::arc(),
            poster,
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }

    /// Expiry worker over this ledger, not yet started.
    pub fn expiry_worker(&self) -> ExpiryWorker {
        ExpiryWorker::new(self.ledger.clone(), self.locks.clone(), self.config.expiry.clone())
    }
}
