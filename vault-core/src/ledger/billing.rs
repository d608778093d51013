//! Billing Event Ledger - idempotent reconciliation

use async_trait::async_trait;

use super::QueryOptions;
use crate::error::LedgerResult;
use crate::types::{EventStatus, ExternalEventRecord, IngestOutcome, RequestContext};

/// A webhook delivery as received
#[derive(Debug, Clone)]
pub struct EventDelivery {
    /// Raw request body, exactly as signed
    pub body: Vec<u8>,
    /// Signature header value
    pub signature: Option<String>,
}

impl EventDelivery {
    pub fn new(body: impl Into<Vec<u8>>, signature: Option<String>) -> Self {
        Self {
            body: body.into(),
            signature,
        }
    }
}

/// Billing Event Ledger trait
#[async_trait]
pub trait BillingEventLedger: Send + Sync {
    /// Verify, dedupe and apply a delivery
    ///
    /// A duplicate event id returns the recorded outcome with no side effects.
    async fn ingest(&self, delivery: &EventDelivery) -> LedgerResult<IngestOutcome>;

    /// Re-apply a `failed` event
    async fn redrive(&self, ctx: &RequestContext, event_id: &str) -> LedgerResult<ExternalEventRecord>;

    /// Get event by provider id
    async fn get_event(&self, event_id: &str) -> LedgerResult<Option<ExternalEventRecord>>;

    /// List events, optionally filtered by status
    async fn list_events(
        &self,
        status: Option<EventStatus>,
        options: QueryOptions,
    ) -> LedgerResult<Vec<ExternalEventRecord>>;
}
