//! Logging Standards and Conventions
//!
//! All crates log through `tracing` with structured fields. Field and
//! operation names are defined here so log queries stay stable.
//!
//! # Log Levels
//!
//! | Level | Usage | Examples |
//! |-------|-------|----------|
//! | ERROR | Unrecoverable errors, data corruption | Storage failure, corrupt record |
//! | WARN  | Recoverable issues, rejected input | Bad webhook signature, missing retry parent |
//! | INFO  | Significant state changes | Attempt created, event processed, sweep result |
//! | DEBUG | Detailed operation flow | Lost transition race, duplicate event |
//! | TRACE | Fine-grained debugging | Full payloads |
//!
//! # Examples
//!
//! ```ignore
//! use tracing::info;
//! use vault_core::logging::operations;
//!
//! info!(
//!     attempt_id = %attempt.attempt_id,
//!     subject_id = %attempt.subject_id,
//!     operation = operations::ATTEMPT_CREATE,
//!     "Access attempt created"
//! );
//! ```

use serde::{Deserialize, Serialize};

/// Log level enumeration matching tracing levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Log operation names
pub mod operations {
    // Attempt lifecycle
    pub const ATTEMPT_CREATE: &str = "attempt_create";
    pub const ATTEMPT_TRANSITION: &str = "attempt_transition";
    pub const ATTEMPT_DELETE: &str = "attempt_delete";
    pub const RETRY_RESOLVE: &str = "retry_resolve";

    // Expiration
    pub const EXPIRE_FIRE: &str = "expire_fire";
    pub const EXPIRE_SWEEP: &str = "expire_sweep";

    // Quota
    pub const QUOTA_AUTHORIZE: &str = "quota_authorize";
    pub const QUOTA_CHARGE: &str = "quota_charge";
    pub const QUOTA_RESET: &str = "quota_reset";

    // Billing
    pub const EVENT_INGEST: &str = "event_ingest";
    pub const EVENT_REDRIVE: &str = "event_redrive";
}
