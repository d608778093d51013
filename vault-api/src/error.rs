//! API Error types
//!
//! Error bodies are `{ "error": <message>, "code": <KIND>, ...details }`.
//! Ledger errors take their HTTP status from their [`ErrorCode`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use thiserror::Error;
use vault_core::error::LedgerError;
use vault_core::types::ErrorCode;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Ledger(#[from] LedgerError),
}

/// Structured fields carried alongside the message
fn details(err: &LedgerError) -> Map<String, Value> {
    let value = match err {
        LedgerError::QuotaExceeded {
            used,
            limit,
            window_reset_at,
        } => json!({
            "used": used,
            "limit": limit,
            "windowResetAt": window_reset_at,
        }),
        LedgerError::UpgradeRequired { current, required } => json!({
            "currentTier": current,
            "requiredTier": required,
        }),
        LedgerError::RetryLimitExceeded {
            attempt_number,
            max_attempts,
        } => json!({
            "attemptNumber": attempt_number,
            "maxAttempts": max_attempts,
        }),
        LedgerError::InvalidStatusTransition { from, to } => json!({ "from": from, "to": to }),
        LedgerError::InvalidEventTransition { from } => json!({ "from": from }),
        LedgerError::ImmutableFieldViolation { field } => json!({ "field": field }),
        _ => return Map::new(),
    };
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, Map<String, Value>) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound.as_str(), Map::new()),
            ApiError::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                ErrorCode::ValidationError.as_str(),
                Map::new(),
            ),
            ApiError::Ledger(e) => {
                let code = e.code();
                let status =
                    StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, code.as_str(), details(e))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, mut body) = self.parts();

        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        } else {
            tracing::debug!(error = %self, code, "Request rejected");
        }

        body.insert("error".to_string(), Value::String(self.to_string()));
        body.insert("code".to_string(), Value::String(code.to_string()));
        (status, Json(Value::Object(body))).into_response()
    }
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vault_core::types::{QuotaLimit, Tier};

    #[test]
    fn test_quota_exceeded_details() {
        let err = ApiError::from(LedgerError::QuotaExceeded {
            used: 5,
            limit: QuotaLimit::Limited(5),
            window_reset_at: Utc::now(),
        });
        let (status, code, body) = err.parts();
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(code, "QUOTA_EXCEEDED");
        assert_eq!(body["used"], 5);
        assert_eq!(body["limit"], 5);
        assert!(body.contains_key("windowResetAt"));
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                LedgerError::UpgradeRequired {
                    current: Tier::Free,
                    required: Tier::Starter,
                },
                StatusCode::FORBIDDEN,
            ),
            (LedgerError::Forbidden("no".to_string()), StatusCode::FORBIDDEN),
            (LedgerError::SignatureVerification("bad".to_string()), StatusCode::BAD_REQUEST),
            (LedgerError::NotFound("x".to_string()), StatusCode::NOT_FOUND),
            (
                LedgerError::ImmutableFieldViolation { field: "asset_id" },
                StatusCode::CONFLICT,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).parts().0, expected);
        }
    }
}
