//! Error types for Vault Core
//!
//! `LedgerError` is the domain taxonomy shared by every ledger, quota and
//! reconciliation operation. Each variant maps to one [`ErrorCode`].

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{AttemptStatus, ErrorCode, EventStatus, QuotaLimit, Tier};

/// Ledger operation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Immutable field '{field}' is already set and cannot be changed")]
    ImmutableFieldViolation { field: &'static str },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: AttemptStatus,
        to: AttemptStatus,
    },

    #[error("Invalid event status transition: {from} -> pending")]
    InvalidEventTransition { from: EventStatus },

    #[error("Retry limit exceeded: attempt {attempt_number} exceeds maximum of {max_attempts}")]
    RetryLimitExceeded { attempt_number: u32, max_attempts: u32 },

    #[error("Upgrade required: current tier {current}, required tier {required}")]
    UpgradeRequired { current: Tier, required: Tier },

    #[error("Quota exceeded: used {used} of {limit}, window resets at {window_reset_at}")]
    QuotaExceeded {
        used: u32,
        limit: QuotaLimit,
        window_reset_at: DateTime<Utc>,
    },

    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("Reconciliation failure: {0}")]
    ReconciliationFailure(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Machine-readable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            LedgerError::Validation(_) => ErrorCode::ValidationError,
            LedgerError::NotFound(_) => ErrorCode::NotFound,
            LedgerError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            LedgerError::ImmutableFieldViolation { .. } => ErrorCode::ImmutableFieldViolation,
            LedgerError::InvalidStatusTransition { .. } | LedgerError::InvalidEventTransition { .. } => {
                ErrorCode::InvalidStatusTransition
            }
            LedgerError::RetryLimitExceeded { .. } => ErrorCode::RetryLimitExceeded,
            LedgerError::UpgradeRequired { .. } => ErrorCode::UpgradeRequired,
            LedgerError::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            LedgerError::SignatureVerification(_) => ErrorCode::SignatureVerificationError,
            LedgerError::ReconciliationFailure(_) => ErrorCode::ReconciliationFailure,
            LedgerError::Forbidden(_) => ErrorCode::Forbidden,
            LedgerError::Conflict(_) => ErrorCode::WriteConflict,
            LedgerError::Storage(_) => ErrorCode::StorageUnavailable,
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Storage(format!("Serialization error: {}", e))
    }
}

/// Result type alias for Ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = LedgerError::InvalidStatusTransition {
            from: AttemptStatus::Success,
            to: AttemptStatus::Failed,
        };
        assert_eq!(err.code(), ErrorCode::InvalidStatusTransition);
        assert_eq!(err.to_string(), "Invalid status transition: success -> failed");

        let err = LedgerError::ImmutableFieldViolation { field: "asset_id" };
        assert_eq!(err.code(), ErrorCode::ImmutableFieldViolation);
    }
}
