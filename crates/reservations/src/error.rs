use std::time::Duration;

use thiserror::Error;

use forgeerp_core::{DomainError, ErrorCode, ReservationId};
use forgeerp_inventory::{DocumentValidation, SourceError};
use forgeerp_locking::MultiLockFailure;

use crate::reservation::ReservationStatus;
use crate::store::StoreError;

/// Reservation ledger error.
///
/// Every variant maps to a stable [`ErrorCode`] with a suggested remediation.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    InvalidRequest(#[from] DomainError),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("stock validation failed on {} of {} lines", .0.errors.len(), .0.total_lines)]
    ValidationFailed(Box<DocumentValidation>),

    #[error(transparent)]
    LockUnavailable(#[from] MultiLockFailure),

    #[error("external reference {reference} is already held by reservation {existing} from {source_system}")]
    DuplicateReference {
        reference: String,
        existing: ReservationId,
        source_system: String,
    },

    #[error("reservation not found: {0}")]
    NotFound(ReservationId),

    #[error("reservation {id} was already confirmed as document {document_reference}")]
    AlreadyConfirmed {
        id: ReservationId,
        document_reference: String,
    },

    #[error("reservation {id} was posted as document {document_reference} and cannot be cancelled")]
    CannotCancelConfirmed {
        id: ReservationId,
        document_reference: String,
    },

    #[error("reservation {0} has expired")]
    Expired(ReservationId),

    #[error("cannot {operation} reservation {id}: status is {status}")]
    InvalidState {
        id: ReservationId,
        status: ReservationStatus,
        operation: &'static str,
    },

    #[error("reservation {id} cannot be renewed: {reason}")]
    RenewalLimitReached { id: ReservationId, reason: String },

    #[error("posting reservation {id} failed: {reason}")]
    PostingFailed { id: ReservationId, reason: String },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LedgerError::InvalidRequest(_) => ErrorCode::ValidationFailed,
            LedgerError::InvalidDuration(_) => ErrorCode::InvalidQuantity,
            LedgerError::ValidationFailed(_) => ErrorCode::ValidationFailed,
            LedgerError::LockUnavailable(_) => ErrorCode::LockAcquisitionFailed,
            LedgerError::DuplicateReference { .. } => ErrorCode::DuplicateReference,
            LedgerError::NotFound(_) => ErrorCode::ReservationNotFound,
            LedgerError::AlreadyConfirmed { .. } | LedgerError::CannotCancelConfirmed { .. } => {
                ErrorCode::ReservationAlreadyConfirmed
            }
            LedgerError::Expired(_) => ErrorCode::ReservationExpired,
            LedgerError::InvalidState { .. } => ErrorCode::InvalidState,
            LedgerError::RenewalLimitReached { .. } => ErrorCode::RenewalLimitReached,
            LedgerError::PostingFailed { .. } => ErrorCode::PostingFailed,
            LedgerError::Source(_) => ErrorCode::ServiceUnavailable,
            LedgerError::Store(StoreError::NotFound(_)) => ErrorCode::ReservationNotFound,
            LedgerError::Store(StoreError::Conflict { .. }) => ErrorCode::InvalidState,
            LedgerError::Store(StoreError::Storage(_)) => ErrorCode::ServiceUnavailable,
        }
    }

    pub fn suggested_action(&self) -> &'static str {
        self.code().suggested_action()
    }

    /// When to try again, for lock contention.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LedgerError::LockUnavailable(failure) => Some(failure.retry_after),
            _ => None,
        }
    }

    /// Line-level detail when stock validation failed.
    pub fn validation(&self) -> Option<&DocumentValidation> {
        match self {
            LedgerError::ValidationFailed(validation) => Some(validation),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_carry_remediation() {
        let id = ReservationId::new();
        let err = LedgerError::CannotCancelConfirmed {
            id,
            document_reference: "INV-7".into(),
        };
        assert_eq!(err.code(), ErrorCode::ReservationAlreadyConfirmed);
        assert!(err.to_string().contains("INV-7"));
        assert!(!err.suggested_action().is_empty());

        let err = LedgerError::from(StoreError::Storage("down".into()));
        assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
        assert!(err.retry_after().is_none());
    }
}
