//! Data Transfer Objects for API requests and responses
//!
//! Wire field names are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use vault_core::types::{
    AccessAttempt, AttemptStatus, BillingStatus, CreateAttemptRequest, EventStatus, ExternalEventRecord,
    ImmutableFields, QuotaLimit, QuotaState, QuotaWindow, Tier, TransitionEvent, TransitionRequest,
};
use vault_db::StorageStats;

// ============ Attempt DTOs ============

/// Create attempt request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAttemptBody {
    /// Missing ids deserialize empty and fail ledger validation
    #[serde(default)]
    pub subject_id: String,
    #[serde(default)]
    pub asset_id: String,
    /// Storage id of the attempt being retried
    pub retry_of: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    /// Requested expiry, clamped to the attempt window
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<CreateAttemptBody> for CreateAttemptRequest {
    fn from(body: CreateAttemptBody) -> Self {
        CreateAttemptRequest {
            subject_id: body.subject_id,
            asset_id: body.asset_id,
            retry_of: body.retry_of,
            issued_at: body.issued_at,
            expires_at: body.expires_at,
        }
    }
}

/// Update attempt request
///
/// Identity and client fields may be echoed back; they are checked against
/// the stored values.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionBody {
    pub status: AttemptStatus,
    pub reason: Option<String>,
    pub error_reason: Option<String>,
    pub error_code: Option<String>,
    pub access_duration: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub annotations: BTreeMap<String, serde_json::Value>,

    pub attempt_id: Option<String>,
    pub subject_id: Option<String>,
    pub asset_id: Option<String>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub issued_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub source_ip: Option<String>,
    pub retry_of: Option<String>,
    pub quota_charged: Option<bool>,
}

impl From<TransitionBody> for TransitionRequest {
    fn from(body: TransitionBody) -> Self {
        TransitionRequest {
            status: body.status,
            reason: body.reason,
            error_reason: body.error_reason,
            error_code: body.error_code,
            access_duration: body.access_duration,
            completed_at: body.completed_at,
            annotations: body.annotations,
            immutable: ImmutableFields {
                attempt_id: body.attempt_id,
                subject_id: body.subject_id,
                asset_id: body.asset_id,
                initiated_at: body.initiated_at,
                issued_at: body.issued_at,
                ip_address: body.ip_address,
                user_agent: body.user_agent,
                source_ip: body.source_ip,
                retry_of: body.retry_of,
                quota_charged: body.quota_charged,
            },
        }
    }
}

/// Transition log entry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEventResponse {
    pub timestamp: DateTime<Utc>,
    pub previous_status: AttemptStatus,
    pub new_status: AttemptStatus,
    pub actor: String,
    pub reason: Option<String>,
}

impl From<&TransitionEvent> for TransitionEventResponse {
    fn from(event: &TransitionEvent) -> Self {
        Self {
            timestamp: event.timestamp,
            previous_status: event.previous_status,
            new_status: event.new_status,
            actor: event.actor.clone(),
            reason: event.reason.clone(),
        }
    }
}

/// Attempt response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResponse {
    pub id: String,
    pub attempt_id: String,
    pub subject_id: String,
    pub asset_id: String,
    pub retry_of: Option<String>,
    pub attempt_number: u32,
    pub status: AttemptStatus,
    pub initiated_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub source_ip: Option<String>,
    pub quota_charged: bool,
    pub access_duration: Option<i64>,
    pub error_reason: Option<String>,
    pub error_code: Option<String>,
    pub required_tier: Option<Tier>,
    pub chain_root_id: Option<String>,
    pub annotations: BTreeMap<String, serde_json::Value>,
    pub update_history: Vec<TransitionEventResponse>,
}

impl From<&AccessAttempt> for AttemptResponse {
    fn from(attempt: &AccessAttempt) -> Self {
        Self {
            id: attempt.id.clone(),
            attempt_id: attempt.attempt_id.clone(),
            subject_id: attempt.subject_id.clone(),
            asset_id: attempt.asset_id.clone(),
            retry_of: attempt.retry_of.clone(),
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            initiated_at: attempt.initiated_at,
            issued_at: attempt.issued_at,
            expires_at: attempt.expires_at,
            completed_at: attempt.completed_at,
            ip_address: attempt.ip_address.clone(),
            user_agent: attempt.user_agent.clone(),
            source_ip: attempt.source_ip.clone(),
            quota_charged: attempt.quota_charged,
            access_duration: attempt.access_duration,
            error_reason: attempt.error_reason.clone(),
            error_code: attempt.error_code.clone(),
            required_tier: attempt.metadata.required_tier,
            chain_root_id: attempt.metadata.chain_root_id.clone(),
            annotations: attempt.metadata.annotations.clone(),
            update_history: attempt.metadata.update_history.iter().map(Into::into).collect(),
        }
    }
}

/// List attempts query parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAttemptsQuery {
    pub subject_id: String,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

// ============ Quota DTOs ============

/// Quota state response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub subject_id: String,
    pub tier: Tier,
    pub window: QuotaWindow,
    /// `-1` when unlimited
    pub limit: QuotaLimit,
    pub used: u32,
    pub remaining: Option<u32>,
    pub lifetime_used: u64,
    pub window_reset_at: DateTime<Utc>,
    pub billing_status: BillingStatus,
    pub last_event_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&QuotaState> for QuotaResponse {
    fn from(state: &QuotaState) -> Self {
        Self {
            subject_id: state.subject_id.clone(),
            tier: state.tier,
            window: state.window,
            limit: state.limit,
            used: state.used,
            remaining: state.remaining(),
            lifetime_used: state.lifetime_used,
            window_reset_at: state.window_reset_at,
            billing_status: state.billing_status,
            last_event_id: state.last_event_id.clone(),
            updated_at: state.updated_at,
        }
    }
}

// ============ Billing Event DTOs ============

/// Billing event record response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub external_event_id: String,
    pub event_type: String,
    pub status: EventStatus,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub payload: serde_json::Value,
}

impl From<&ExternalEventRecord> for EventResponse {
    fn from(record: &ExternalEventRecord) -> Self {
        Self {
            external_event_id: record.external_event_id.clone(),
            event_type: record.event_type.clone(),
            status: record.status,
            received_at: record.received_at,
            processed_at: record.processed_at,
            error_message: record.error_message.clone(),
            retry_count: record.retry_count,
            payload: record.payload.clone(),
        }
    }
}

/// Webhook acknowledgement
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub received: bool,
    pub duplicate: bool,
    pub event: EventResponse,
}

/// List events query parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEventsQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

// ============ Common DTOs ============

/// Paginated response wrapper
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StorageStats>,
}
