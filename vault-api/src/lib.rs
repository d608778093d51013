//! Vault API Server
//!
//! REST API over the access ledger, quota manager and billing reconciler.
//!
//! ## Endpoints
//!
//! ### Access Attempts
//! - POST /access-attempts - Open an attempt (201, 403 upgrade, 429 quota)
//! - GET /access-attempts?subjectId= - List a subject's attempts
//! - GET /access-attempts/:attempt_id - Get attempt
//! - PATCH /access-attempts/:attempt_id - Transition status
//! - GET /access-attempts/:attempt_id/history - Transition log
//! - DELETE /access-attempts[/:attempt_id] - Always 403
//!
//! ### Quotas
//! - GET /quotas/:subject_id - Current quota state
//!
//! ### Billing Events
//! - POST /billing-events - Signed provider webhook
//! - GET /billing-events - List event records
//! - GET /billing-events/:event_id - Get event record
//! - POST /billing-events/:event_id/redrive - Re-apply a failed event

pub mod context;
pub mod dto;
pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use dto::*;
pub use error::*;
pub use routes::*;
pub use server::*;
pub use state::*;
