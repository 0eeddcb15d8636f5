//! Pre-post validation: lock the stock a document touches, re-validate under
//! the lock and report drift against an earlier allocation.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use forgeerp_core::{ErrorCode, LockToken};
use forgeerp_locking::{LockKey, LockSet, MultiLockFailure};

use crate::batch::AllocatedBatchLine;
use crate::engine::BatchAllocationEngine;
use crate::issues::{LineWarning, WarningCode};
use crate::sources::SourceError;
use crate::validation::{DocumentValidation, LineRequest};

/// Outcome of [`BatchAllocationEngine::validate_for_posting`].
#[derive(Debug)]
pub enum PostingClearance {
    /// Stock is locked and the document still validates.
    ///
    /// The caller owns `locks` and must release them once the downstream post
    /// has succeeded or failed.
    Cleared {
        validation: DocumentValidation,
        locks: LockSet,
        /// Stock movement since the allocation the caller validated earlier.
        drift: Vec<LineWarning>,
    },
    /// The document does not validate; nothing is locked.
    Rejected { validation: DocumentValidation },
    /// Some of the stock is locked by another operation; nothing is locked.
    LockUnavailable(MultiLockFailure),
}

impl PostingClearance {
    pub fn is_cleared(&self) -> bool {
        matches!(self, PostingClearance::Cleared { .. })
    }

    pub fn lock_tokens(&self) -> Vec<LockToken> {
        match self {
            PostingClearance::Cleared { locks, .. } => locks.tokens(),
            _ => Vec::new(),
        }
    }

    pub fn locks_expire_at(&self) -> Option<DateTime<Utc>> {
        match self {
            PostingClearance::Cleared { locks, .. } => locks.expires_at(),
            _ => None,
        }
    }

    pub fn validation(&self) -> Option<&DocumentValidation> {
        match self {
            PostingClearance::Cleared { validation, .. } | PostingClearance::Rejected { validation } => {
                Some(validation)
            }
            PostingClearance::LockUnavailable(_) => None,
        }
    }

    /// Error category when not cleared.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            PostingClearance::Cleared { .. } => None,
            PostingClearance::Rejected { .. } => Some(ErrorCode::ValidationFailed),
            PostingClearance::LockUnavailable(_) => Some(ErrorCode::LockAcquisitionFailed),
        }
    }
}

impl BatchAllocationEngine {
    /// Validate a document immediately before posting it.
    ///
    /// 1. validate once to learn which batches are involved,
    /// 2. lock `item|warehouse` for every line plus `item|warehouse|batch` for
    ///    every explicit or allocated batch,
    /// 3. validate again under the locks,
    /// 4. diff against `previous` if given.
    ///
    /// Locks are released on every path except `Cleared`.
    pub async fn validate_for_posting(
        &self,
        lines: &[LineRequest],
        previous: Option<&[AllocatedBatchLine]>,
    ) -> Result<PostingClearance, SourceError> {
        let preliminary = self.validate_lines(lines, None).await?;
        if !preliminary.is_valid() {
            return Ok(PostingClearance::Rejected {
                validation: preliminary,
            });
        }

        let keys = lock_keys(lines, &preliminary, previous);
        let set = match self.locks.try_acquire_all(keys, self.config.posting_lock_duration) {
            Ok(set) => set,
            Err(failure) => return Ok(PostingClearance::LockUnavailable(failure)),
        };
        let held = self.locks.hold(set);

        let validation = self.validate_lines(lines, None).await?;
        if !validation.is_valid() {
            return Ok(PostingClearance::Rejected { validation });
        }

        let drift = previous
            .map(|prev| stock_drift(prev, &validation.allocations()))
            .unwrap_or_default();
        for warning in &drift {
            warn!(line = warning.line_number, batch = ?warning.batch_number, "{}", warning.message);
        }

        let locks = held.keep();
        info!(lines = lines.len(), locks = locks.len(), "document cleared for posting");
        Ok(PostingClearance::Cleared {
            validation,
            locks,
            drift,
        })
    }
}

fn lock_keys(
    lines: &[LineRequest],
    validation: &DocumentValidation,
    previous: Option<&[AllocatedBatchLine]>,
) -> Vec<LockKey> {
    let mut keys = Vec::new();
    let mut push = |key: LockKey| {
        if !keys.contains(&key) {
            keys.push(key);
        }
    };

    for line in lines {
        push(LockKey::item(&line.item_code, &line.warehouse_code));
        for batch in &line.batches {
            push(LockKey::batch(&line.item_code, &line.warehouse_code, &batch.batch_number));
        }
    }
    let allocated = validation.allocations();
    for line in allocated.iter().chain(previous.unwrap_or_default()) {
        push(LockKey::item(&line.item_code, &line.warehouse_code));
        for batch in &line.batches {
            push(LockKey::batch(&line.item_code, &line.warehouse_code, &batch.batch_number));
        }
    }
    keys
}

/// Compare an earlier allocation with a fresh one, line by line.
pub fn stock_drift(previous: &[AllocatedBatchLine], fresh: &[AllocatedBatchLine]) -> Vec<LineWarning> {
    let mut drift = Vec::new();
    for before in previous {
        let Some(now) = fresh.iter().find(|l| l.line_number == before.line_number) else {
            continue;
        };
        for batch in &before.batches {
            match now.batch(&batch.batch_number) {
                None => drift.push(
                    LineWarning::new(
                        WarningCode::BatchNoLongerAvailable,
                        before.line_number,
                        format!(
                            "batch {} of item {} dropped out of the allocation since validation",
                            batch.batch_number, before.item_code
                        ),
                    )
                    .with_batch(batch.batch_number.clone()),
                ),
                Some(current) if current.available_before < batch.available_before => drift.push(
                    LineWarning::new(
                        WarningCode::AvailabilityDecreased,
                        before.line_number,
                        format!(
                            "batch {} of item {}: available went from {} to {} since validation",
                            batch.batch_number,
                            before.item_code,
                            batch.available_before,
                            current.available_before
                        ),
                    )
                    .with_batch(batch.batch_number.clone()),
                ),
                Some(_) => {}
            }
        }
    }
    drift
}
