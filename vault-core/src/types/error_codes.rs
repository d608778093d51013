//! Unified Error Codes for the Vault Access Ledger
//!
//! Every guard failure surfaced by the ledger maps to exactly one code so
//! API clients can branch on a stable, machine-readable kind instead of
//! parsing messages.
//!
//! # Error Code Format
//!
//! Codes serialize as `SCREAMING_SNAKE_CASE`. Numeric codes, shown by
//! `Display`, are grouped by area:
//! - 0xxx General
//! - 1xxx Attempt lifecycle
//! - 2xxx Quota and plan
//! - 3xxx Billing reconciliation
//! - 4xxx Storage

use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard error code for ledger operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========== Attempt Errors (1xxx) ==========
    /// Attempt not found
    NotFound,
    /// Write attempted to change an already-set immutable field
    ImmutableFieldViolation,
    /// Requested status edge is not part of the state machine
    InvalidStatusTransition,
    /// Retry chain is already at its maximum depth
    RetryLimitExceeded,
    /// Ledger records can never be deleted
    Forbidden,

    // ========== Quota Errors (2xxx) ==========
    /// Subject's tier is below the asset's required tier
    UpgradeRequired,
    /// Window quota exhausted
    QuotaExceeded,

    // ========== Billing Errors (3xxx) ==========
    /// Webhook signature did not verify
    SignatureVerificationError,
    /// Event handler failed while applying side effects
    ReconciliationFailure,

    // ========== Storage Errors (4xxx) ==========
    /// Storage backend failure
    StorageUnavailable,
    /// Concurrent writer won the race for the same record
    WriteConflict,
    /// Record with the same identity already exists
    AlreadyExists,

    // ========== General Errors (0xxx) ==========
    /// Missing or malformed input
    ValidationError,
}

impl ErrorCode {
    /// Get numeric code for this error
    pub fn numeric_code(&self) -> u32 {
        match self {
            ErrorCode::NotFound => 1001,
            ErrorCode::ImmutableFieldViolation => 1002,
            ErrorCode::InvalidStatusTransition => 1003,
            ErrorCode::RetryLimitExceeded => 1004,
            ErrorCode::Forbidden => 1005,

            ErrorCode::UpgradeRequired => 2001,
            ErrorCode::QuotaExceeded => 2002,

            ErrorCode::SignatureVerificationError => 3001,
            ErrorCode::ReconciliationFailure => 3002,

            ErrorCode::StorageUnavailable => 4001,
            ErrorCode::WriteConflict => 4002,
            ErrorCode::AlreadyExists => 4003,

            ErrorCode::ValidationError => 1,
        }
    }

    /// Get default HTTP status code for this error
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::ImmutableFieldViolation
            | ErrorCode::InvalidStatusTransition
            | ErrorCode::WriteConflict
            | ErrorCode::AlreadyExists => 409,
            ErrorCode::RetryLimitExceeded => 422,
            ErrorCode::Forbidden | ErrorCode::UpgradeRequired => 403,
            ErrorCode::QuotaExceeded => 429,
            ErrorCode::SignatureVerificationError | ErrorCode::ValidationError => 400,
            ErrorCode::ReconciliationFailure => 500,
            ErrorCode::StorageUnavailable => 503,
        }
    }

    /// Wire name of the code, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ImmutableFieldViolation => "IMMUTABLE_FIELD_VIOLATION",
            ErrorCode::InvalidStatusTransition => "INVALID_STATUS_TRANSITION",
            ErrorCode::RetryLimitExceeded => "RETRY_LIMIT_EXCEEDED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::UpgradeRequired => "UPGRADE_REQUIRED",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::SignatureVerificationError => "SIGNATURE_VERIFICATION_ERROR",
            ErrorCode::ReconciliationFailure => "RECONCILIATION_FAILURE",
            ErrorCode::StorageUnavailable => "STORAGE_UNAVAILABLE",
            ErrorCode::WriteConflict => "WRITE_CONFLICT",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.numeric_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numeric() {
        assert_eq!(ErrorCode::ImmutableFieldViolation.numeric_code(), 1002);
        assert_eq!(ErrorCode::QuotaExceeded.numeric_code(), 2002);
        assert_eq!(ErrorCode::ReconciliationFailure.numeric_code(), 3002);
    }

    #[test]
    fn test_http_status_matches_api_contract() {
        assert_eq!(ErrorCode::UpgradeRequired.http_status(), 403);
        assert_eq!(ErrorCode::QuotaExceeded.http_status(), 429);
        assert_eq!(ErrorCode::InvalidStatusTransition.http_status(), 409);
        assert_eq!(ErrorCode::ImmutableFieldViolation.http_status(), 409);
        assert_eq!(ErrorCode::Forbidden.http_status(), 403);
        assert_eq!(ErrorCode::SignatureVerificationError.http_status(), 400);
    }

    #[test]
    fn test_wire_name_matches_serde() {
        for code in [
            ErrorCode::NotFound,
            ErrorCode::RetryLimitExceeded,
            ErrorCode::SignatureVerificationError,
            ErrorCode::WriteConflict,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}
