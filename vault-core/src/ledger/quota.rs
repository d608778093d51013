//! Quota Ledger - tier gating and window accounting

use async_trait::async_trait;

use crate::error::LedgerResult;
use crate::types::{AccessAttempt, QuotaState, RequestContext, Tier};

/// Charge request
///
/// `attempt` is the record as it should be stored after entering
/// `success`; `expected_revision` is the revision it was read at.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub attempt: AccessAttempt,
    pub expected_revision: u64,
}

/// Quota Ledger trait
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Check tier and remaining quota for a subject
    ///
    /// Provisions the subject on first sight and rolls an elapsed window.
    async fn authorize(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        required_tier: Tier,
    ) -> LedgerResult<QuotaState>;

    /// Consume one unit and store the attempt as one atomic unit
    async fn charge(&self, ctx: &RequestContext, request: ChargeRequest) -> LedgerResult<AccessAttempt>;

    /// Current quota state
    async fn get_quota(&self, subject_id: &str) -> LedgerResult<Option<QuotaState>>;
}
