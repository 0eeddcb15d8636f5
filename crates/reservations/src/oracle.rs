//! Reserved-quantity view over a [`ReservationStore`], handed to the allocation engine.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use forgeerp_core::{Clock, ReservationId, ReservedLookupError, ReservedQuantityProvider};

use crate::store::{ReservationStore, StoreError};

/// Answers the engine's reserved-stock queries from the store, at the clock's current time.
pub struct ReservedStock {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
}

impl ReservedStock {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

impl From<StoreError> for ReservedLookupError {
    fn from(err: StoreError) -> Self {
        ReservedLookupError(err.to_string())
    }
}

#[async_trait]
impl ReservedQuantityProvider for ReservedStock {
    async fn reserved_quantity(
        &self,
        item_code: &str,
        warehouse_code: &str,
        exclude: Option<ReservationId>,
    ) -> Result<Decimal, ReservedLookupError> {
        Ok(self
            .store
            .reserved_quantity(item_code, warehouse_code, self.clock.now(), exclude)
            .await?)
    }

    async fn reserved_batch_quantity(
        &self,
        item_code: &str,
        warehouse_code: &str,
        batch_number: &str,
        exclude: Option<ReservationId>,
    ) -> Result<Decimal, ReservedLookupError> {
        Ok(self
            .store
            .reserved_batch_quantity(item_code, warehouse_code, batch_number, self.clock.now(), exclude)
            .await?)
    }
}
