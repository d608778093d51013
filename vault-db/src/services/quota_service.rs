//! Quota Service
//!
//! Tier gating and windowed quota accounting. Every write is a revision
//! checked replace; a lost race re-reads and re-evaluates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::storage::{ChargeOutcome, InsertOutcome, LedgerStore};
use vault_core::constants::MAX_CONFLICT_RETRIES;
use vault_core::error::{LedgerError, LedgerResult};
use vault_core::ledger::{ChargeRequest, QuotaLedger};
use vault_core::logging::operations;
use vault_core::types::{
    AccessAttempt, BillingStatus, PlanCatalog, QuotaState, RequestContext, SubscriptionChange, Tier,
};

/// Quota Service implementation
pub struct QuotaService {
    store: Arc<dyn LedgerStore>,
    plans: PlanCatalog,
}

impl QuotaService {
    pub fn new(store: Arc<dyn LedgerStore>, plans: PlanCatalog) -> Self {
        Self { store, plans }
    }

    /// Stored state, provisioning the subject on the free plan if absent
    async fn ensure_state(&self, subject_id: &str, now: DateTime<Utc>) -> LedgerResult<QuotaState> {
        if let Some(state) = self.store.get_quota(subject_id).await? {
            return Ok(state);
        }
        let fresh = QuotaState::provision(subject_id, Tier::Free, self.plans.for_tier(Tier::Free), now);
        match self.store.insert_quota_if_absent(&fresh).await? {
            InsertOutcome::Inserted(state) => {
                info!(
                    subject_id = %subject_id,
                    tier = %state.tier,
                    "Quota state provisioned"
                );
                Ok(state)
            }
            InsertOutcome::Existing(state) => Ok(state),
        }
    }

    /// Apply `update` to a subject's state with a revision check, retrying
    /// on conflict
    async fn update_with<F>(&self, subject_id: &str, update: F) -> LedgerResult<QuotaState>
    where
        F: Fn(&mut QuotaState, DateTime<Utc>) + Send + Sync,
    {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let now = Utc::now();
            let current = self.ensure_state(subject_id, now).await?;
            let mut next = current.clone();
            update(&mut next, now);
            next.updated_at = now;

            match self.store.replace_quota(&next, current.revision).await {
                Ok(stored) => return Ok(stored),
                Err(e) => match LedgerError::from(e) {
                    LedgerError::Conflict(msg) => {
                        debug!(subject_id = %subject_id, error = %msg, "Quota update lost a race, retrying");
                    }
                    other => return Err(other),
                },
            }
        }
        Err(LedgerError::Conflict(format!(
            "Quota state for {} kept changing",
            subject_id
        )))
    }

    /// Move a subject onto the plan described by a subscription event
    ///
    /// `start_period` resets usage and the window; otherwise usage carries
    /// over and only an explicit period end moves the window.
    pub async fn apply_subscription(
        &self,
        change: &SubscriptionChange,
        event_id: &str,
        start_period: bool,
    ) -> LedgerResult<QuotaState> {
        let mut plan = self.plans.for_tier(change.tier);
        if let Some(limit) = change.quota_limit {
            plan.limit = limit;
        }
        if let Some(window) = change.window {
            plan.window = window;
        }

        let state = self
            .update_with(&change.subject_id, |state, now| {
                state.apply_plan(change.tier, plan, now);
                if start_period {
                    state.used = 0;
                    state.billing_status = BillingStatus::Active;
                    state.window_reset_at = change
                        .current_period_end
                        .unwrap_or_else(|| plan.window.next_boundary(now));
                } else if let Some(end) = change.current_period_end {
                    state.window_reset_at = end;
                }
                state.last_event_id = Some(event_id.to_string());
            })
            .await?;

        info!(
            subject_id = %state.subject_id,
            tier = %state.tier,
            limit = %state.limit,
            event_id = %event_id,
            "Subscription plan applied"
        );
        Ok(state)
    }

    /// Downgrade a canceled subscription to the free plan
    pub async fn cancel_subscription(&self, subject_id: &str, event_id: &str) -> LedgerResult<QuotaState> {
        let free = self.plans.for_tier(Tier::Free);
        let state = self
            .update_with(subject_id, |state, now| {
                state.apply_plan(Tier::Free, free, now);
                state.billing_status = BillingStatus::Canceled;
                state.last_event_id = Some(event_id.to_string());
            })
            .await?;

        info!(subject_id = %subject_id, event_id = %event_id, "Subscription canceled");
        Ok(state)
    }

    /// Record a subject's billing standing
    pub async fn set_billing_status(
        &self,
        subject_id: &str,
        status: BillingStatus,
        event_id: &str,
    ) -> LedgerResult<QuotaState> {
        self.update_with(subject_id, |state, _| {
            state.billing_status = status;
            state.last_event_id = Some(event_id.to_string());
        })
        .await
    }
}

#[async_trait]
impl QuotaLedger for QuotaService {
    async fn authorize(
        &self,
        ctx: &RequestContext,
        subject_id: &str,
        required_tier: Tier,
    ) -> LedgerResult<QuotaState> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let now = Utc::now();
            let mut state = self.ensure_state(subject_id, now).await?;

            if !state.tier.satisfies(required_tier) {
                return Err(LedgerError::UpgradeRequired {
                    current: state.tier,
                    required: required_tier,
                });
            }

            if state.window_elapsed(now) {
                let mut reset = state.clone();
                reset.reset_window(now);
                match self.store.replace_quota(&reset, state.revision).await {
                    Ok(stored) => {
                        info!(
                            subject_id = %subject_id,
                            window_reset_at = %stored.window_reset_at,
                            operation = operations::QUOTA_RESET,
                            "Quota window reset"
                        );
                        state = stored;
                    }
                    Err(e) => match LedgerError::from(e) {
                        LedgerError::Conflict(_) => continue,
                        other => return Err(other),
                    },
                }
            }

            if !state.has_capacity() {
                return Err(state.exceeded_error());
            }

            debug!(
                subject_id = %subject_id,
                used = state.used,
                limit = %state.limit,
                request_id = ?ctx.request_id,
                operation = operations::QUOTA_AUTHORIZE,
                "Quota authorized"
            );
            return Ok(state);
        }
        Err(LedgerError::Conflict(format!(
            "Quota state for {} kept changing",
            subject_id
        )))
    }

    async fn charge(&self, ctx: &RequestContext, request: ChargeRequest) -> LedgerResult<AccessAttempt> {
        let now = Utc::now();
        let subject_id = request.attempt.subject_id.clone();
        self.ensure_state(&subject_id, now).await?;

        match self
            .store
            .charge_attempt(&request.attempt, request.expected_revision, now)
            .await?
        {
            ChargeOutcome::Charged { attempt, quota } => {
                info!(
                    attempt_id = %attempt.attempt_id,
                    subject_id = %subject_id,
                    used = quota.used,
                    limit = %quota.limit,
                    actor = %ctx.actor,
                    operation = operations::QUOTA_CHARGE,
                    "Quota charged"
                );
                Ok(attempt)
            }
            ChargeOutcome::Exhausted(quota) => Err(quota.exceeded_error()),
        }
    }

    async fn get_quota(&self, subject_id: &str) -> LedgerResult<Option<QuotaState>> {
        Ok(self.store.get_quota(subject_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::pending_attempt;
    use crate::storage::MemoryStore;
    use chrono::Duration;
    use vault_core::types::{AttemptStatus, QuotaLimit, QuotaWindow};

    fn service() -> (Arc<dyn LedgerStore>, QuotaService) {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let service = QuotaService::new(store.clone(), PlanCatalog::default());
        (store, service)
    }

    fn ctx() -> RequestContext {
        RequestContext::system("tester")
    }

    fn starter(subject_id: &str) -> SubscriptionChange {
        SubscriptionChange {
            subject_id: subject_id.to_string(),
            tier: Tier::Starter,
            quota_limit: None,
            window: None,
            current_period_end: None,
        }
    }

    #[tokio::test]
    async fn test_authorize_provisions_free_tier() {
        let (_, service) = service();
        let state = service.authorize(&ctx(), "user-1", Tier::Free).await.unwrap();
        assert_eq!(state.tier, Tier::Free);
        assert_eq!(state.limit, QuotaLimit::Limited(5));
        assert_eq!(state.window, QuotaWindow::Daily);
        assert_eq!(state.revision, 1);
    }

    #[tokio::test]
    async fn test_authorize_requires_tier() {
        let (_, service) = service();
        let err = service.authorize(&ctx(), "user-1", Tier::Starter).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::UpgradeRequired {
                current: Tier::Free,
                required: Tier::Starter
            }
        );
    }

    #[tokio::test]
    async fn test_authorize_resets_elapsed_window() {
        let (store, service) = service();
        let mut state = service.authorize(&ctx(), "user-1", Tier::Free).await.unwrap();
        let revision = state.revision;
        state.used = 5;
        state.window_reset_at = Utc::now() - Duration::minutes(1);
        store.replace_quota(&state, revision).await.unwrap();

        let state = service.authorize(&ctx(), "user-1", Tier::Free).await.unwrap();
        assert_eq!(state.used, 0);
        assert!(state.window_reset_at > Utc::now());
    }

    #[tokio::test]
    async fn test_authorize_reports_exhaustion() {
        let (store, service) = service();
        let mut state = service.authorize(&ctx(), "user-1", Tier::Free).await.unwrap();
        let revision = state.revision;
        state.used = 5;
        store.replace_quota(&state, revision).await.unwrap();

        let err = service.authorize(&ctx(), "user-1", Tier::Free).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::QuotaExceeded {
                used: 5,
                limit: QuotaLimit::Limited(5),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_charge_flips_attempt_and_counts() {
        let (store, service) = service();
        let stored = store
            .insert_attempt(&pending_attempt("att_1", "user-1", Utc::now()))
            .await
            .unwrap();
        let mut success = stored.clone();
        success.status = AttemptStatus::Success;
        success.quota_charged = true;

        let charged = service
            .charge(
                &ctx(),
                ChargeRequest {
                    attempt: success,
                    expected_revision: stored.revision,
                },
            )
            .await
            .unwrap();
        assert!(charged.quota_charged);

        let quota = service.get_quota("user-1").await.unwrap().unwrap();
        assert_eq!(quota.used, 1);
        assert_eq!(quota.lifetime_used, 1);
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let (_, service) = service();
        let period_end = Utc::now() + Duration::days(30);
        let mut change = starter("user-1");
        change.current_period_end = Some(period_end);

        let state = service.apply_subscription(&change, "evt_1", true).await.unwrap();
        assert_eq!(state.tier, Tier::Starter);
        assert_eq!(state.limit, QuotaLimit::Limited(100));
        assert_eq!(state.window_reset_at, period_end);
        assert_eq!(state.last_event_id.as_deref(), Some("evt_1"));

        let state = service
            .set_billing_status("user-1", BillingStatus::PastDue, "evt_2")
            .await
            .unwrap();
        assert_eq!(state.billing_status, BillingStatus::PastDue);
        assert_eq!(state.tier, Tier::Starter);

        let state = service.cancel_subscription("user-1", "evt_3").await.unwrap();
        assert_eq!(state.tier, Tier::Free);
        assert_eq!(state.billing_status, BillingStatus::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_keeps_used_within_free_limit() {
        let (store, service) = service();
        let mut change = starter("user-1");
        change.quota_limit = Some(QuotaLimit::Limited(50));
        let mut state = service.apply_subscription(&change, "evt_1", true).await.unwrap();
        let revision = state.revision;
        state.used = 40;
        store.replace_quota(&state, revision).await.unwrap();

        let state = service.cancel_subscription("user-1", "evt_2").await.unwrap();
        assert_eq!(state.limit, QuotaLimit::Limited(5));
        assert_eq!(state.used, 5);

        let stored = service.get_quota("user-1").await.unwrap().unwrap();
        assert_eq!(stored.used, 5);
        assert_eq!(stored.lifetime_used, state.lifetime_used);
    }

    #[tokio::test]
    async fn test_subscription_limit_override() {
        let (_, service) = service();
        let mut change = starter("user-1");
        change.quota_limit = Some(QuotaLimit::Unlimited);
        let state = service.apply_subscription(&change, "evt_1", true).await.unwrap();
        assert_eq!(state.limit, QuotaLimit::Unlimited);
    }
}
