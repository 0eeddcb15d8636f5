//! Reservation ledger: create, confirm, cancel, renew and expire stock holds.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use forgeerp_core::{Clock, DomainError, DomainResult, ReservationId};
use forgeerp_inventory::BatchAllocationEngine;
use forgeerp_locking::{LockKey, LockManager};

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::posting::{PostingCollaborator, PostingRequest};
use crate::reservation::{CreateReservationRequest, Reservation, ReservationLine, ReservationStatus};
use crate::store::{InsertOutcome, ReservationStore, StoreError};

/// Owns the reservation lifecycle.
///
/// Creation holds `item|warehouse` locks for every line across validation and
/// insert, so two concurrent creates can never both count the same free stock.
pub struct ReservationLedger {
    store: Arc<dyn ReservationStore>,
    engine: Arc<BatchAllocationEngine>,
    locks: Arc<LockManager>,
    poster: Arc<dyn PostingCollaborator>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl ReservationLedger {
    /// The engine's lock manager is shared so creates and pre-post checks
    /// exclude each other.
    pub fn new(
        store: Arc<dyn ReservationStore>,
        engine: Arc<BatchAllocationEngine>,
        poster: Arc<dyn PostingCollaborator>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        let locks = engine.lock_manager().clone();
        Self {
            store,
            engine,
            locks,
            poster,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Validate stock for every line and hold it.
    ///
    /// Idempotent on the external reference: while a non-terminal reservation
    /// for it exists, that reservation is returned and nothing new is held.
    pub async fn create_reservation(&self, request: CreateReservationRequest) -> Result<Reservation, LedgerError> {
        validate_request(&request)?;
        let duration = self.hold_duration(request.duration)?;

        if let Some(existing) = self
            .store
            .find_active_by_reference(&request.external_reference_id)
            .await?
        {
            return replay(existing, &request);
        }

        let lines = request.line_requests();
        let keys: Vec<LockKey> = lines
            .iter()
            .map(|l| LockKey::item(&l.item_code, &l.warehouse_code))
            .collect();
        let set = self
            .locks
            .try_acquire_all(keys, self.config.lock_duration)
            .inspect_err(|failure| {
                warn!(
                    reference = %request.external_reference_id,
                    conflicts = failure.conflicts.len(),
                    retry_after_ms = failure.retry_after.as_millis() as u64,
                    "reservation blocked by stock lock"
                );
            })?;
        let held = self.locks.hold(set);

        let validation = self.engine.validate_document(&lines).await?;
        if !validation.is_valid() {
            info!(
                reference = %request.external_reference_id,
                failed = validation.errors.len(),
                "reservation rejected by stock validation"
            );
            return Err(LedgerError::ValidationFailed(Box::new(validation)));
        }

        let now = self.clock.now();
        let expires_at = offset(now, duration)?;
        let reservation_lines: Vec<ReservationLine> = validation
            .allocations()
            .iter()
            .zip(&request.lines)
            .map(|(allocation, line)| ReservationLine::from_allocation(allocation, line.unit_price))
            .collect();
        let reservation = Reservation {
            id: ReservationId::new(),
            external_reference_id: request.external_reference_id.clone(),
            source_system: request.source_system.clone(),
            counterparty_code: request.counterparty_code.clone(),
            currency: request.currency.clone(),
            total_value: reservation_lines.iter().map(|l| l.line_total).sum(),
            status: ReservationStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at,
            confirmed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            failure_reason: None,
            document_reference: None,
            renewal_count: 0,
            lines: reservation_lines,
        };

        let outcome = self.store.insert(reservation.clone()).await?;
        held.release();

        match outcome {
            InsertOutcome::Inserted => {
                info!(
                    reservation_id = %reservation.id,
                    reference = %reservation.external_reference_id,
                    lines = reservation.lines.len(),
                    expires_at = %reservation.expires_at,
                    "reservation created"
                );
                Ok(reservation)
            }
            InsertOutcome::Existing(existing) => replay(existing, &request),
        }
    }

    /// Post the reserved document downstream.
    ///
    /// A posting failure is terminal: the reservation moves to `Failed` and its
    /// stock is released. While the post runs, the reservation is held for at
    /// least `posting_window` so the expiry sweep leaves it alone.
    pub async fn confirm_reservation(&self, id: ReservationId) -> Result<Reservation, LedgerError> {
        let mut reservation = self.load(id).await?;
        match reservation.status {
            ReservationStatus::Pending => {}
            ReservationStatus::Confirmed => {
                return Err(LedgerError::AlreadyConfirmed {
                    id,
                    document_reference: reservation.document_reference.unwrap_or_default(),
                });
            }
            status => {
                return Err(LedgerError::InvalidState {
                    id,
                    status,
                    operation: "confirm",
                });
            }
        }

        let now = self.clock.now();
        if reservation.is_lapsed(now) {
            self.mark_expired(&mut reservation, now).await?;
            return Err(LedgerError::Expired(id));
        }

        let expires_at = reservation.expires_at;
        self.hold_for_posting(&mut reservation, now).await?;

        let request = PostingRequest::from_reservation(&reservation);
        let posted = self.poster.post_document(&request).await;
        let now = self.clock.now();
        reservation.expires_at = expires_at;
        reservation.touch(now);

        match posted {
            Ok(document_reference) => {
                reservation.status = ReservationStatus::Confirmed;
                reservation.confirmed_at = Some(now);
                reservation.document_reference = Some(document_reference);
                self.record_posting(&reservation).await?;
                info!(
                    reservation_id = %id,
                    document = reservation.document_reference.as_deref().unwrap_or_default(),
                    "reservation confirmed"
                );
                Ok(reservation)
            }
            Err(err) => {
                let reason = err.to_string();
                reservation.status = ReservationStatus::Failed;
                reservation.failure_reason = Some(reason.clone());
                self.record_posting(&reservation).await?;
                warn!(reservation_id = %id, error = %reason, "posting failed; reservation released");
                Err(LedgerError::PostingFailed { id, reason })
            }
        }
    }

    /// Release a pending reservation. Cancelling twice is a no-op.
    pub async fn cancel_reservation(
        &self,
        id: ReservationId,
        reason: Option<String>,
    ) -> Result<Reservation, LedgerError> {
        let mut reservation = self.load(id).await?;
        match reservation.status {
            ReservationStatus::Pending => {}
            ReservationStatus::Cancelled => return Ok(reservation),
            ReservationStatus::Confirmed => {
                return Err(LedgerError::CannotCancelConfirmed {
                    id,
                    document_reference: reservation.document_reference.unwrap_or_default(),
                });
            }
            status => {
                return Err(LedgerError::InvalidState {
                    id,
                    status,
                    operation: "cancel",
                });
            }
        }

        let now = self.clock.now();
        reservation.status = ReservationStatus::Cancelled;
        reservation.cancelled_at = Some(now);
        reservation.cancellation_reason = reason;
        reservation.touch(now);
        self.store.update(&reservation, ReservationStatus::Pending).await?;

        info!(
            reservation_id = %id,
            reason = reservation.cancellation_reason.as_deref().unwrap_or_default(),
            "reservation cancelled"
        );
        Ok(reservation)
    }

    /// Push the expiry of a pending reservation out by `extension_minutes`.
    ///
    /// Bounded twice: at most `max_renewals` renewals, and never past
    /// `created_at + max_duration + renewal_ceiling_step * renewals`. Stock is
    /// revalidated (ignoring this reservation's own hold); on any failure the
    /// reservation is left untouched.
    pub async fn renew_reservation(
        &self,
        id: ReservationId,
        extension_minutes: i64,
    ) -> Result<Reservation, LedgerError> {
        let extension = self.extension(extension_minutes)?;
        let mut reservation = self.load(id).await?;
        if reservation.status != ReservationStatus::Pending {
            return Err(LedgerError::InvalidState {
                id,
                status: reservation.status,
                operation: "renew",
            });
        }

        let now = self.clock.now();
        if reservation.is_lapsed(now) {
            self.mark_expired(&mut reservation, now).await?;
            return Err(LedgerError::Expired(id));
        }

        if reservation.renewal_count >= self.config.max_renewals {
            return Err(LedgerError::RenewalLimitReached {
                id,
                reason: format!("renewed {} times (limit {})", reservation.renewal_count, self.config.max_renewals),
            });
        }

        let ceiling = self.expiry_ceiling(&reservation)?;
        let new_expiry = offset(reservation.expires_at.max(now), extension)?.min(ceiling);
        if new_expiry <= reservation.expires_at {
            return Err(LedgerError::RenewalLimitReached {
                id,
                reason: format!("expiry is already at its ceiling {ceiling}"),
            });
        }

        let validation = self
            .engine
            .validate_document_excluding(&reservation.line_requests(), id)
            .await?;
        if !validation.is_valid() {
            info!(reservation_id = %id, failed = validation.errors.len(), "renewal rejected by stock validation");
            return Err(LedgerError::ValidationFailed(Box::new(validation)));
        }

        reservation.expires_at = new_expiry;
        reservation.renewal_count += 1;
        reservation.touch(now);
        self.store.update(&reservation, ReservationStatus::Pending).await?;

        info!(
            reservation_id = %id,
            renewals = reservation.renewal_count,
            expires_at = %new_expiry,
            "reservation renewed"
        );
        Ok(reservation)
    }

    /// Move every lapsed pending reservation to `Expired`.
    ///
    /// Returns how many were expired. Reservations that changed status
    /// concurrently are skipped.
    pub async fn expire_reservations(&self) -> Result<usize, LedgerError> {
        let now = self.clock.now();
        let lapsed = self.store.list_expired_pending(now).await?;

        let mut expired = 0;
        for mut reservation in lapsed {
            match self.mark_expired(&mut reservation, now).await {
                Ok(()) => expired += 1,
                Err(LedgerError::Store(StoreError::Conflict { id, actual, .. })) => {
                    debug!(reservation_id = %id, status = %actual, "reservation changed before it could expire");
                }
                Err(err) => return Err(err),
            }
        }

        if expired > 0 {
            info!(expired, "expired lapsed reservations");
        }
        Ok(expired)
    }

    pub async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, LedgerError> {
        self.load(id).await
    }

    /// The non-terminal reservation carrying `external_reference_id`, if any.
    pub async fn find_by_external_reference(
        &self,
        external_reference_id: &str,
    ) -> Result<Option<Reservation>, LedgerError> {
        Ok(self.store.find_active_by_reference(external_reference_id).await?)
    }

    /// Quantity currently held by live reservations.
    pub async fn reserved_quantity(&self, item_code: &str, warehouse_code: &str) -> Result<Decimal, LedgerError> {
        Ok(self
            .store
            .reserved_quantity(item_code, warehouse_code, self.clock.now(), None)
            .await?)
    }

    pub async fn reserved_batch_quantity(
        &self,
        item_code: &str,
        warehouse_code: &str,
        batch_number: &str,
    ) -> Result<Decimal, LedgerError> {
        Ok(self
            .store
            .reserved_batch_quantity(item_code, warehouse_code, batch_number, self.clock.now(), None)
            .await?)
    }

    async fn load(&self, id: ReservationId) -> Result<Reservation, LedgerError> {
        self.store.get(id).await?.ok_or(LedgerError::NotFound(id))
    }

    async fn mark_expired(&self, reservation: &mut Reservation, now: DateTime<Utc>) -> Result<(), LedgerError> {
        reservation.status = ReservationStatus::Expired;
        reservation.touch(now);
        self.store.update(reservation, ReservationStatus::Pending).await?;
        info!(
            reservation_id = %reservation.id,
            reference = %reservation.external_reference_id,
            "reservation expired"
        );
        Ok(())
    }

    /// Push the expiry out to cover a post starting at `now`.
    async fn hold_for_posting(&self, reservation: &mut Reservation, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let until = offset(now, to_chrono(self.config.posting_window)?)?;
        if until > reservation.expires_at {
            reservation.expires_at = until;
            reservation.touch(now);
            self.store.update(reservation, ReservationStatus::Pending).await?;
        }
        Ok(())
    }

    /// Persist the outcome of a downstream post.
    ///
    /// Terminal statuses are final. If the reservation left `Pending` while
    /// the post ran, the outcome is not recorded and the document has to be
    /// reconciled by hand.
    async fn record_posting(&self, reservation: &Reservation) -> Result<(), LedgerError> {
        self.store
            .update(reservation, ReservationStatus::Pending)
            .await
            .inspect_err(|err| {
                if let StoreError::Conflict { actual, .. } = err {
                    error!(
                        reservation_id = %reservation.id,
                        status = %actual,
                        outcome = %reservation.status,
                        document = reservation.document_reference.as_deref().unwrap_or_default(),
                        "posting outcome not recorded; reservation left pending during the post"
                    );
                }
            })?;
        Ok(())
    }

    /// Requested hold, or the default, capped at `max_duration`.
    fn hold_duration(&self, requested: Option<StdDuration>) -> Result<Duration, LedgerError> {
        let max = self.config.max_duration;
        let duration = match requested {
            None => self.config.default_duration.min(max),
            Some(d) if d.is_zero() => {
                return Err(LedgerError::InvalidDuration("hold duration must be positive".to_string()));
            }
            Some(d) if d > max => {
                debug!(requested_secs = d.as_secs(), max_secs = max.as_secs(), "hold duration capped");
                max
            }
            Some(d) => d,
        };
        to_chrono(duration)
    }

    fn extension(&self, minutes: i64) -> Result<Duration, LedgerError> {
        if minutes <= 0 {
            return Err(LedgerError::InvalidDuration(format!("{minutes} minutes; must be positive")));
        }
        self.hold_duration(Some(StdDuration::from_secs(minutes.unsigned_abs().saturating_mul(60))))
    }

    fn expiry_ceiling(&self, reservation: &Reservation) -> Result<DateTime<Utc>, LedgerError> {
        let steps = i32::try_from(reservation.renewal_count + 1).unwrap_or(i32::MAX);
        let growth = to_chrono(self.config.renewal_ceiling_step)?
            .checked_mul(steps)
            .ok_or_else(|| LedgerError::InvalidDuration("renewal ceiling step is too large".to_string()))?;
        offset(offset(reservation.created_at, to_chrono(self.config.max_duration)?)?, growth)
    }
}

fn to_chrono(duration: StdDuration) -> Result<Duration, LedgerError> {
    Duration::from_std(duration).map_err(|e| LedgerError::InvalidDuration(e.to_string()))
}

fn offset(at: DateTime<Utc>, by: Duration) -> Result<DateTime<Utc>, LedgerError> {
    at.checked_add_signed(by)
        .ok_or_else(|| LedgerError::InvalidDuration(format!("{at} + {by} is out of range")))
}

fn validate_request(request: &CreateReservationRequest) -> DomainResult<()> {
    if request.external_reference_id.trim().is_empty() {
        return Err(DomainError::validation("external reference id is required"));
    }
    if request.source_system.trim().is_empty() {
        return Err(DomainError::validation("source system is required"));
    }
    if request.lines.is_empty() {
        return Err(DomainError::validation("a reservation needs at least one line"));
    }
    Ok(())
}

/// Answer a repeated create with the reservation already holding the reference.
fn replay(existing: Reservation, request: &CreateReservationRequest) -> Result<Reservation, LedgerError> {
    if existing.source_system != request.source_system {
        return Err(LedgerError::DuplicateReference {
            reference: request.external_reference_id.clone(),
            existing: existing.id,
            source_system: existing.source_system,
        });
    }
    debug!(
        reservation_id = %existing.id,
        reference = %existing.external_reference_id,
        "create replayed; returning existing reservation"
    );
    Ok(existing)
}
