//! Billing Event Service
//!
//! Reconciles billing provider notifications into quota state. Each
//! provider event id is applied at most once; the stored record carries the
//! outcome and is what duplicates get back.
//!
//! A record left `pending` past the grace period (the handler crashed or
//! its outcome was never persisted) is claimed again by the next delivery
//! of the same id, or by an explicit redrive.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::quota_service::QuotaService;
use crate::signature::SignatureVerifier;
use crate::storage::{InsertOutcome, LedgerStore};
use vault_core::constants::{DEFAULT_PENDING_GRACE_SECS, RECONCILER_ACTOR};
use vault_core::error::{LedgerError, LedgerResult};
use vault_core::ledger::{BillingEventLedger, EventDelivery, QueryOptions};
use vault_core::logging::operations;
use vault_core::types::{
    BillingEvent, BillingStatus, EventEnvelope, EventStatus, ExternalEventRecord, IngestOutcome, RequestContext,
};

/// Billing Event Service implementation
pub struct BillingEventService {
    store: Arc<dyn LedgerStore>,
    quota: Arc<QuotaService>,
    verifier: SignatureVerifier,
    pending_grace: Duration,
}

impl BillingEventService {
    pub fn new(store: Arc<dyn LedgerStore>, quota: Arc<QuotaService>, verifier: SignatureVerifier) -> Self {
        Self {
            store,
            quota,
            verifier,
            pending_grace: Duration::seconds(DEFAULT_PENDING_GRACE_SECS as i64),
        }
    }

    pub fn with_pending_grace(mut self, grace: Duration) -> Self {
        self.pending_grace = grace;
        self
    }

    /// Claim `record` for another run; `None` if another writer got there first
    async fn claim(
        &self,
        record: &ExternalEventRecord,
        now: DateTime<Utc>,
    ) -> LedgerResult<Option<ExternalEventRecord>> {
        match self.store.replace_event(&record.reclaimed(now), record).await {
            Ok(claimed) => Ok(Some(claimed)),
            Err(e) => match LedgerError::from(e) {
                LedgerError::Conflict(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    /// Run the handler for a claimed record and persist its outcome
    async fn process(&self, record: ExternalEventRecord) -> LedgerResult<ExternalEventRecord> {
        let mut outcome = record.clone();
        let event_id = record.external_event_id.as_str();

        match self.apply(&record).await {
            Ok(true) => outcome.mark_processed(Utc::now()),
            Ok(false) => {
                debug!(event_id = %event_id, event_type = %record.event_type, "No handler for event type");
                outcome.mark_ignored(Utc::now());
            }
            Err(e) => {
                error!(
                    event_id = %event_id,
                    event_type = %record.event_type,
                    error = %e,
                    operation = operations::EVENT_INGEST,
                    "Billing event handler failed"
                );
                outcome.mark_failed(Utc::now(), e.to_string());
            }
        }

        let stored = self.store.replace_event(&outcome, &record).await?;
        info!(
            event_id = %stored.external_event_id,
            event_type = %stored.event_type,
            status = %stored.status,
            retry_count = stored.retry_count,
            "Billing event reconciled"
        );
        Ok(stored)
    }

    /// Apply the typed handler; `Ok(false)` when the type is not handled
    async fn apply(&self, record: &ExternalEventRecord) -> LedgerResult<bool> {
        let event_id = record.external_event_id.as_str();
        match BillingEvent::parse(&record.event_type, &record.payload)? {
            BillingEvent::SubscriptionCreated(change) => {
                self.quota.apply_subscription(&change, event_id, true).await?;
            }
            BillingEvent::SubscriptionUpdated(change) => {
                self.quota.apply_subscription(&change, event_id, false).await?;
            }
            BillingEvent::SubscriptionDeleted(cancel) => {
                self.quota.cancel_subscription(&cancel.subject_id, event_id).await?;
            }
            BillingEvent::PaymentSucceeded(notice) => {
                self.quota
                    .set_billing_status(&notice.subject_id, BillingStatus::Active, event_id)
                    .await?;
            }
            BillingEvent::PaymentFailed(notice) => {
                self.quota
                    .set_billing_status(&notice.subject_id, BillingStatus::PastDue, event_id)
                    .await?;
            }
            BillingEvent::Unhandled { .. } => return Ok(false),
        }
        Ok(true)
    }
}

#[async_trait]
impl BillingEventLedger for BillingEventService {
    async fn ingest(&self, delivery: &EventDelivery) -> LedgerResult<IngestOutcome> {
        if let Err(e) = self
            .verifier
            .verify(delivery.signature.as_deref(), &delivery.body, Utc::now())
        {
            warn!(error = %e, operation = operations::EVENT_INGEST, "Rejected billing event delivery");
            return Err(e);
        }

        let envelope = EventEnvelope::from_slice(&delivery.body)?;
        let record = ExternalEventRecord::pending(&envelope, Utc::now());

        match self.store.insert_event_if_absent(&record).await? {
            InsertOutcome::Existing(existing) => {
                let now = Utc::now();
                let existing = if existing.is_stalled(now, self.pending_grace) {
                    if let Some(claimed) = self.claim(&existing, now).await? {
                        warn!(
                            event_id = %claimed.external_event_id,
                            retry_count = claimed.retry_count,
                            actor = RECONCILER_ACTOR,
                            operation = operations::EVENT_INGEST,
                            "Recovering stalled billing event"
                        );
                        let record = self.process(claimed).await?;
                        return Ok(IngestOutcome {
                            record,
                            duplicate: false,
                        });
                    }
                    self.store
                        .get_event(&existing.external_event_id)
                        .await?
                        .unwrap_or(existing)
                } else {
                    existing
                };

                debug!(
                    event_id = %existing.external_event_id,
                    status = %existing.status,
                    operation = operations::EVENT_INGEST,
                    "Duplicate billing event"
                );
                Ok(IngestOutcome {
                    record: existing,
                    duplicate: true,
                })
            }
            InsertOutcome::Inserted(inserted) => {
                let record = self.process(inserted).await?;
                Ok(IngestOutcome {
                    record,
                    duplicate: false,
                })
            }
        }
    }

    async fn redrive(&self, ctx: &RequestContext, event_id: &str) -> LedgerResult<ExternalEventRecord> {
        let record = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Event {}", event_id)))?;
        let now = Utc::now();
        if record.status != EventStatus::Failed && !record.is_stalled(now, self.pending_grace) {
            return Err(LedgerError::InvalidEventTransition { from: record.status });
        }

        let claimed = self.claim(&record, now).await?.ok_or_else(|| {
            LedgerError::Conflict(format!("Event {} was claimed by another writer", event_id))
        })?;

        info!(
            event_id = %event_id,
            from = %record.status,
            retry_count = claimed.retry_count,
            actor = %ctx.actor,
            operation = operations::EVENT_REDRIVE,
            "Re-driving billing event"
        );
        self.process(claimed).await
    }

    async fn get_event(&self, event_id: &str) -> LedgerResult<Option<ExternalEventRecord>> {
        Ok(self.store.get_event(event_id).await?)
    }

    async fn list_events(
        &self,
        status: Option<EventStatus>,
        options: QueryOptions,
    ) -> LedgerResult<Vec<ExternalEventRecord>> {
        Ok(self
            .store
            .list_events(status, options.effective_limit(), options.effective_offset())
            .await?)
    }
}
