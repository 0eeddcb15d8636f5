//! Reservation storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use forgeerp_core::ReservationId;

use crate::reservation::{Reservation, ReservationStatus};

/// Reservation store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("reservation not found: {0}")]
    NotFound(ReservationId),
    #[error("reservation {id} is {actual}, expected {expected}")]
    Conflict {
        id: ReservationId,
        expected: ReservationStatus,
        actual: ReservationStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result of [`ReservationStore::insert`].
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted,
    /// A non-terminal reservation already uses the external reference.
    Existing(Reservation),
}

/// Reservation store abstraction.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Insert a new reservation.
    ///
    /// Atomically checks that no non-terminal reservation carries the same
    /// external reference; if one does it is returned instead.
    async fn insert(&self, reservation: Reservation) -> Result<InsertOutcome, StoreError>;

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// Replace a reservation if its stored status is still `expected`.
    async fn update(&self, reservation: &Reservation, expected: ReservationStatus) -> Result<(), StoreError>;

    /// The non-terminal reservation for an external reference, if any.
    async fn find_active_by_reference(&self, external_reference_id: &str) -> Result<Option<Reservation>, StoreError>;

    /// Pending reservations with `expires_at <= now`, oldest expiry first.
    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError>;

    /// Quantity held by live reservations for an item in a warehouse.
    async fn reserved_quantity(
        &self,
        item_code: &str,
        warehouse_code: &str,
        now: DateTime<Utc>,
        exclude: Option<ReservationId>,
    ) -> Result<Decimal, StoreError>;

    /// Quantity held by live reservations from one batch.
    async fn reserved_batch_quantity(
        &self,
        item_code: &str,
        warehouse_code: &str,
        batch_number: &str,
        now: DateTime<Utc>,
        exclude: Option<ReservationId>,
    ) -> Result<Decimal, StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    reservations: HashMap<ReservationId, Reservation>,
    /// External reference -> non-terminal reservation.
    active_references: HashMap<String, ReservationId>,
}

/// In-memory reservation store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryReservationStore {
    tables: RwLock<Tables>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.read().map(|t| t.reservations.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Storage("reservation table poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Storage("reservation table poisoned".to_string()))
    }

    fn sum_live<F>(&self, now: DateTime<Utc>, exclude: Option<ReservationId>, held: F) -> Result<Decimal, StoreError>
    where
        F: Fn(&Reservation) -> Decimal,
    {
        let tables = self.read()?;
        Ok(tables
            .reservations
            .values()
            .filter(|r| r.holds_stock(now) && Some(r.id) != exclude)
            .map(held)
            .sum())
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn insert(&self, reservation: Reservation) -> Result<InsertOutcome, StoreError> {
        let mut tables = self.write()?;
        if let Some(existing) = tables
            .active_references
            .get(&reservation.external_reference_id)
            .and_then(|id| tables.reservations.get(id))
            .filter(|r| !r.status.is_terminal())
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        if !reservation.status.is_terminal() {
            tables
                .active_references
                .insert(reservation.external_reference_id.clone(), reservation.id);
        }
        tables.reservations.insert(reservation.id, reservation);
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self.read()?.reservations.get(&id).cloned())
    }

    async fn update(&self, reservation: &Reservation, expected: ReservationStatus) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let stored = tables
            .reservations
            .get_mut(&reservation.id)
            .ok_or(StoreError::NotFound(reservation.id))?;
        if stored.status != expected {
            return Err(StoreError::Conflict {
                id: reservation.id,
                expected,
                actual: stored.status,
            });
        }
        *stored = reservation.clone();

        if reservation.status.is_terminal()
            && tables.active_references.get(&reservation.external_reference_id) == Some(&reservation.id)
        {
            tables.active_references.remove(&reservation.external_reference_id);
        }
        Ok(())
    }

    async fn find_active_by_reference(&self, external_reference_id: &str) -> Result<Option<Reservation>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .active_references
            .get(external_reference_id)
            .and_then(|id| tables.reservations.get(id))
            .filter(|r| !r.status.is_terminal())
            .cloned())
    }

    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>, StoreError> {
        let tables = self.read()?;
        let mut expired: Vec<_> = tables
            .reservations
            .values()
            .filter(|r| r.is_lapsed(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        Ok(expired)
    }

    async fn reserved_quantity(
        &self,
        item_code: &str,
        warehouse_code: &str,
        now: DateTime<Utc>,
        exclude: Option<ReservationId>,
    ) -> Result<Decimal, StoreError> {
        self.sum_live(now, exclude, |r| r.held_quantity(item_code, warehouse_code))
    }

    async fn reserved_batch_quantity(
        &self,
        item_code: &str,
        warehouse_code: &str,
        batch_number: &str,
        now: DateTime<Utc>,
        exclude: Option<ReservationId>,
    ) -> Result<Decimal, StoreError> {
        self.sum_live(now, exclude, |r| {
            r.held_batch_quantity(item_code, warehouse_code, batch_number)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservation::{ReservationBatchAllocation, ReservationLine};
    use chrono::Duration;

    fn qty(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn pending(reference: &str, now: DateTime<Utc>, batches: &[(&str, &str)]) -> Reservation {
        let quantity: Decimal = batches.iter().map(|(_, q)| qty(q)).sum();
        Reservation {
            id: ReservationId::new(),
            external_reference_id: reference.to_string(),
            source_system: "shop".into(),
            counterparty_code: "C1".into(),
            currency: "EUR".into(),
            total_value: Decimal::ZERO,
            status: ReservationStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::minutes(30),
            confirmed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            failure_reason: None,
            document_reference: None,
            renewal_count: 0,
            lines: vec![ReservationLine {
                line_number: 1,
                item_code: "FLOUR".into(),
                warehouse_code: "WH1".into(),
                quantity,
                uom_code: None,
                inventory_quantity: quantity,
                unit_price: Decimal::ONE,
                line_total: quantity,
                batches: batches
                    .iter()
                    .map(|(b, q)| ReservationBatchAllocation {
                        item_code: "FLOUR".into(),
                        batch_number: b.to_string(),
                        warehouse_code: "WH1".into(),
                        reserved_quantity: qty(q),
                        expiry_date: None,
                    })
                    .collect(),
            }],
        }
    }

    #[tokio::test]
    async fn duplicate_active_reference_returns_existing() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let first = pending("SO-1", now, &[("F1", "2")]);
        assert!(matches!(store.insert(first.clone()).await.unwrap(), InsertOutcome::Inserted));

        match store.insert(pending("SO-1", now, &[("F1", "9")])).await.unwrap() {
            InsertOutcome::Existing(existing) => assert_eq!(existing.id, first.id),
            other => panic!("expected existing, got {other:?}"),
        }
        assert_eq!(store.len(), 1);

        // Once terminal, the reference is free again.
        let mut cancelled = first.clone();
        cancelled.status = ReservationStatus::Cancelled;
        store.update(&cancelled, ReservationStatus::Pending).await.unwrap();
        assert!(store.find_active_by_reference("SO-1").await.unwrap().is_none());
        assert!(matches!(
            store.insert(pending("SO-1", now, &[("F1", "1")])).await.unwrap(),
            InsertOutcome::Inserted
        ));
    }

    #[tokio::test]
    async fn update_rejects_stale_status() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let mut reservation = pending("SO-2", now, &[("F1", "1")]);
        store.insert(reservation.clone()).await.unwrap();

        reservation.status = ReservationStatus::Expired;
        store.update(&reservation, ReservationStatus::Pending).await.unwrap();

        reservation.status = ReservationStatus::Confirmed;
        let err = store.update(&reservation, ReservationStatus::Pending).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                actual: ReservationStatus::Expired,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn only_live_pending_reservations_count() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let a = pending("SO-A", now, &[("F1", "2"), ("F2", "1")]);
        let b = pending("SO-B", now, &[("F1", "3")]);
        let mut lapsed = pending("SO-C", now - Duration::hours(1), &[("F1", "5")]);
        lapsed.expires_at = now;
        for r in [a.clone(), b.clone(), lapsed.clone()] {
            store.insert(r).await.unwrap();
        }

        assert_eq!(store.reserved_quantity("FLOUR", "WH1", now, None).await.unwrap(), qty("6"));
        assert_eq!(
            store.reserved_batch_quantity("FLOUR", "WH1", "F1", now, None).await.unwrap(),
            qty("5")
        );
        assert_eq!(
            store.reserved_batch_quantity("FLOUR", "WH1", "F1", now, Some(b.id)).await.unwrap(),
            qty("2")
        );

        let expired = store.list_expired_pending(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, lapsed.id);
    }
}
