//! Billing provider events
//!
//! Webhook notifications arrive as a loosely typed envelope. They are parsed
//! once at the ingestion boundary into [`BillingEvent`], a closed set of the
//! event kinds the reconciler acts on plus an `Unhandled` catch-all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::quota::{QuotaLimit, QuotaWindow, Tier};
use crate::error::{LedgerError, LedgerResult};

pub const EVENT_SUBSCRIPTION_CREATED: &str = "customer.subscription.created";
pub const EVENT_SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const EVENT_SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";
pub const EVENT_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
pub const EVENT_PAYMENT_FAILED: &str = "invoice.payment_failed";

/// Processing status of an external event record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processed,
    Failed,
    Ignored,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processed => "processed",
            EventStatus::Failed => "failed",
            EventStatus::Ignored => "ignored",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(EventStatus::Pending),
            "processed" => Ok(EventStatus::Processed),
            "failed" => Ok(EventStatus::Failed),
            "ignored" => Ok(EventStatus::Ignored),
            other => Err(LedgerError::Validation(format!("Unknown event status: {}", other))),
        }
    }
}

/// One row per billing notification, keyed by the provider's event id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEventRecord {
    pub external_event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub status: EventStatus,
    pub error_message: Option<String>,
    /// Number of re-drives, administrative or stalled-claim recovery
    pub retry_count: u32,
    /// When processing was last claimed
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
}

impl ExternalEventRecord {
    pub fn pending(envelope: &EventEnvelope, now: DateTime<Utc>) -> Self {
        Self {
            external_event_id: envelope.id.clone(),
            event_type: envelope.event_type.clone(),
            payload: envelope.data.clone(),
            received_at: now,
            processed_at: None,
            status: EventStatus::Pending,
            error_message: None,
            retry_count: 0,
            claimed_at: Some(now),
        }
    }

    /// Still pending although its claim is older than `grace`
    ///
    /// A handler that crashed or failed to persist its outcome leaves the
    /// record in this state.
    pub fn is_stalled(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        self.status == EventStatus::Pending && now - self.claimed_at.unwrap_or(self.received_at) >= grace
    }

    /// Copy of the record claimed for another processing run
    pub fn reclaimed(&self, now: DateTime<Utc>) -> Self {
        let mut claimed = self.clone();
        claimed.status = EventStatus::Pending;
        claimed.retry_count += 1;
        claimed.processed_at = None;
        claimed.claimed_at = Some(now);
        claimed
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.status = EventStatus::Processed;
        self.processed_at = Some(now);
        self.error_message = None;
    }

    pub fn mark_ignored(&mut self, now: DateTime<Utc>) {
        self.status = EventStatus::Ignored;
        self.processed_at = Some(now);
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, message: impl Into<String>) {
        self.status = EventStatus::Failed;
        self.processed_at = Some(now);
        self.error_message = Some(message.into());
    }
}

/// Raw webhook envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn from_slice(body: &[u8]) -> LedgerResult<Self> {
        let envelope: EventEnvelope = serde_json::from_slice(body)
            .map_err(|e| LedgerError::Validation(format!("Malformed event envelope: {}", e)))?;
        if envelope.id.trim().is_empty() {
            return Err(LedgerError::Validation("Event id is required".to_string()));
        }
        if envelope.event_type.trim().is_empty() {
            return Err(LedgerError::Validation("Event type is required".to_string()));
        }
        Ok(envelope)
    }
}

/// Plan change carried by subscription events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionChange {
    pub subject_id: String,
    pub tier: Tier,
    /// Overrides the catalog limit for the tier
    pub quota_limit: Option<QuotaLimit>,
    /// Overrides the catalog window for the tier
    pub window: Option<QuotaWindow>,
    pub current_period_end: Option<DateTime<Utc>>,
}

/// Subscription cancellation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionCancel {
    pub subject_id: String,
}

/// Invoice payment outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentNotice {
    pub subject_id: String,
    pub invoice_id: Option<String>,
    pub amount_cents: Option<i64>,
}

/// Typed billing event
#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    SubscriptionCreated(SubscriptionChange),
    SubscriptionUpdated(SubscriptionChange),
    SubscriptionDeleted(SubscriptionCancel),
    PaymentSucceeded(PaymentNotice),
    PaymentFailed(PaymentNotice),
    Unhandled { event_type: String },
}

fn parse_data<T: serde::de::DeserializeOwned>(event_type: &str, data: &serde_json::Value) -> LedgerResult<T> {
    serde_json::from_value(data.clone()).map_err(|e| {
        LedgerError::ReconciliationFailure(format!("Invalid payload for {}: {}", event_type, e))
    })
}

impl BillingEvent {
    /// Resolve the type tag and payload into a typed event
    ///
    /// Unknown types resolve to `Unhandled`. A known type with a payload
    /// that does not match its shape is a reconciliation failure.
    pub fn parse(event_type: &str, data: &serde_json::Value) -> LedgerResult<Self> {
        let event = match event_type {
            EVENT_SUBSCRIPTION_CREATED => BillingEvent::SubscriptionCreated(parse_data(event_type, data)?),
            EVENT_SUBSCRIPTION_UPDATED => BillingEvent::SubscriptionUpdated(parse_data(event_type, data)?),
            EVENT_SUBSCRIPTION_DELETED => BillingEvent::SubscriptionDeleted(parse_data(event_type, data)?),
            EVENT_PAYMENT_SUCCEEDED => BillingEvent::PaymentSucceeded(parse_data(event_type, data)?),
            EVENT_PAYMENT_FAILED => BillingEvent::PaymentFailed(parse_data(event_type, data)?),
            other => BillingEvent::Unhandled {
                event_type: other.to_string(),
            },
        };
        Ok(event)
    }
}

/// Outcome of an ingestion call
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub record: ExternalEventRecord,
    /// The event id had been seen before; nothing was re-applied
    pub duplicate: bool,
}
