//! Access Ledger Service
//!
//! Creates attempts after tier and quota checks and drives them through the
//! state machine. Entering `success` is written together with the quota
//! charge; every other write is a revision checked replace.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::asset_catalog::AssetCatalog;
use super::expiration_service::ExpirationService;
use super::quota_service::QuotaService;
use super::retry_chain::RetryChainResolver;
use crate::config::LedgerConfig;
use crate::storage::LedgerStore;
use vault_core::constants::{ATTEMPT_ID_PREFIX, MAX_CONFLICT_RETRIES};
use vault_core::error::{LedgerError, LedgerResult};
use vault_core::ledger::{AccessLedger, ChargeRequest, QueryOptions, QuotaLedger};
use vault_core::logging::operations;
use vault_core::types::{
    AccessAttempt, AttemptMetadata, AttemptStatus, CreateAttemptRequest, RequestContext, TransitionEvent,
    TransitionRequest,
};

/// Access Ledger Service implementation
pub struct AccessLedgerService {
    store: Arc<dyn LedgerStore>,
    quota: Arc<QuotaService>,
    catalog: Arc<dyn AssetCatalog>,
    resolver: RetryChainResolver,
    expiration: ExpirationService,
    config: LedgerConfig,
    sequence: AtomicU64,
}

impl AccessLedgerService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        quota: Arc<QuotaService>,
        catalog: Arc<dyn AssetCatalog>,
        expiration: ExpirationService,
        config: LedgerConfig,
    ) -> Self {
        let resolver = RetryChainResolver::new(store.clone(), config.retry_parent_policy, config.max_attempts);
        Self {
            store,
            quota,
            catalog,
            resolver,
            expiration,
            config,
            sequence: AtomicU64::new(0),
        }
    }

    /// Generate a caller-facing attempt id
    fn generate_attempt_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let timestamp = Utc::now().timestamp_micros();
        let nonce = Uuid::new_v4().as_u128() as u32;
        format!("{}_{:016x}_{:08x}{:08x}", ATTEMPT_ID_PREFIX, timestamp, seq as u32, nonce)
    }

    async fn load(&self, attempt_id: &str) -> LedgerResult<AccessAttempt> {
        self.store
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Attempt {}", attempt_id)))
    }
}

#[async_trait]
impl AccessLedger for AccessLedgerService {
    async fn create_attempt(
        &self,
        ctx: &RequestContext,
        request: CreateAttemptRequest,
    ) -> LedgerResult<AccessAttempt> {
        request.validate()?;

        let required_tier = self.catalog.required_tier(&request.asset_id).await?;
        self.quota.authorize(ctx, &request.subject_id, required_tier).await?;
        let position = self.resolver.resolve(request.retry_of.as_deref()).await?;

        let now = Utc::now();
        let latest_expiry = now + self.config.attempt_ttl();
        let expires_at = request.expires_at.map_or(latest_expiry, |e| e.min(latest_expiry));
        if expires_at <= now {
            return Err(LedgerError::Validation("expires_at must be in the future".to_string()));
        }

        let attempt = AccessAttempt {
            id: Uuid::new_v4().to_string(),
            attempt_id: self.generate_attempt_id(),
            subject_id: request.subject_id,
            asset_id: request.asset_id,
            retry_of: request.retry_of,
            attempt_number: position.attempt_number,
            status: AttemptStatus::Pending,
            initiated_at: now,
            issued_at: Some(request.issued_at.unwrap_or(now)),
            expires_at,
            completed_at: None,
            ip_address: Some(ctx.client.resolve_ip()),
            user_agent: Some(ctx.client.user_agent_or_unknown()),
            source_ip: Some(ctx.client.source_ip()),
            quota_charged: false,
            access_duration: None,
            error_reason: None,
            error_code: None,
            metadata: AttemptMetadata {
                required_tier: Some(required_tier),
                chain_root_id: position.chain_root_id,
                ..AttemptMetadata::default()
            },
            revision: 0,
        };

        let stored = self.store.insert_attempt(&attempt).await?;
        let timer_armed = self.expiration.schedule(&stored);

        info!(
            attempt_id = %stored.attempt_id,
            subject_id = %stored.subject_id,
            asset_id = %stored.asset_id,
            attempt_number = stored.attempt_number,
            timer_armed,
            request_id = ?ctx.request_id,
            operation = operations::ATTEMPT_CREATE,
            "Access attempt created"
        );
        Ok(stored)
    }

    async fn transition(
        &self,
        ctx: &RequestContext,
        attempt_id: &str,
        request: TransitionRequest,
    ) -> LedgerResult<AccessAttempt> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let current = self.load(attempt_id).await?;
            let now = Utc::now();
            if current.is_overdue(now) && request.status != AttemptStatus::Expired {
                // The window is closed even if no timer or sweep has run yet
                debug!(
                    attempt_id = %attempt_id,
                    requested = %request.status,
                    "Attempt is overdue, expiring before applying transition"
                );
                self.expiration.expire(attempt_id).await?;
                continue;
            }
            let applied = current.apply_transition(ctx, &request, now)?;

            let written = if applied.requires_charge {
                self.quota
                    .charge(
                        ctx,
                        ChargeRequest {
                            attempt: applied.attempt,
                            expected_revision: current.revision,
                        },
                    )
                    .await
            } else {
                self.store
                    .replace_attempt(&applied.attempt, current.revision)
                    .await
                    .map_err(LedgerError::from)
            };

            match written {
                Ok(stored) => {
                    info!(
                        attempt_id = %stored.attempt_id,
                        subject_id = %stored.subject_id,
                        from = %current.status,
                        status = %stored.status,
                        actor = %ctx.actor,
                        operation = operations::ATTEMPT_TRANSITION,
                        "Access attempt transitioned"
                    );
                    return Ok(stored);
                }
                Err(LedgerError::Conflict(msg)) => {
                    debug!(attempt_id = %attempt_id, error = %msg, "Transition lost a race, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
        Err(LedgerError::Conflict(format!("Attempt {} kept changing", attempt_id)))
    }

    async fn get_attempt(&self, attempt_id: &str) -> LedgerResult<Option<AccessAttempt>> {
        Ok(self.store.get_attempt(attempt_id).await?)
    }

    async fn list_by_subject(
        &self,
        subject_id: &str,
        options: QueryOptions,
    ) -> LedgerResult<Vec<AccessAttempt>> {
        Ok(self
            .store
            .list_attempts_by_subject(subject_id, options.effective_limit(), options.effective_offset())
            .await?)
    }

    async fn history(&self, attempt_id: &str) -> LedgerResult<Vec<TransitionEvent>> {
        Ok(self.load(attempt_id).await?.metadata.update_history)
    }

    async fn delete_attempt(&self, ctx: &RequestContext, attempt_id: &str) -> LedgerResult<()> {
        warn!(
            attempt_id = %attempt_id,
            actor = %ctx.actor,
            operation = operations::ATTEMPT_DELETE,
            "Rejected attempt deletion"
        );
        Err(LedgerError::Forbidden("access attempts cannot be deleted".to_string()))
    }

    async fn delete_attempts(&self, ctx: &RequestContext) -> LedgerResult<u64> {
        warn!(
            actor = %ctx.actor,
            operation = operations::ATTEMPT_DELETE,
            "Rejected bulk attempt deletion"
        );
        Err(LedgerError::Forbidden("access attempts cannot be deleted".to_string()))
    }
}
