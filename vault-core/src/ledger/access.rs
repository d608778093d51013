//! Access Ledger - attempt lifecycle
//!
//! Attempts are created `pending`, moved along the state machine edges and
//! never deleted. Both delete operations exist only to reject the request.

use async_trait::async_trait;

use super::QueryOptions;
use crate::error::LedgerResult;
use crate::types::{AccessAttempt, CreateAttemptRequest, RequestContext, TransitionEvent, TransitionRequest};

/// Access Ledger trait
#[async_trait]
pub trait AccessLedger: Send + Sync {
    /// Open a new `pending` attempt after tier and quota checks
    async fn create_attempt(
        &self,
        ctx: &RequestContext,
        request: CreateAttemptRequest,
    ) -> LedgerResult<AccessAttempt>;

    /// Validate and apply a status transition
    ///
    /// Entering `success` charges quota in the same atomic write.
    async fn transition(
        &self,
        ctx: &RequestContext,
        attempt_id: &str,
        request: TransitionRequest,
    ) -> LedgerResult<AccessAttempt>;

    /// Get attempt by caller-facing id
    async fn get_attempt(&self, attempt_id: &str) -> LedgerResult<Option<AccessAttempt>>;

    /// List a subject's attempts, newest first
    async fn list_by_subject(
        &self,
        subject_id: &str,
        options: QueryOptions,
    ) -> LedgerResult<Vec<AccessAttempt>>;

    /// Transition log of an attempt
    async fn history(&self, attempt_id: &str) -> LedgerResult<Vec<TransitionEvent>>;

    /// Always fails with `Forbidden`
    async fn delete_attempt(&self, ctx: &RequestContext, attempt_id: &str) -> LedgerResult<()>;

    /// Always fails with `Forbidden`
    async fn delete_attempts(&self, ctx: &RequestContext) -> LedgerResult<u64>;
}
