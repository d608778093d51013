//! Access Attempt - the unit tracked by the access ledger
//!
//! An attempt is created `pending` when a subject is authorized to access an
//! asset and is then driven through a small state machine:
//!
//! ```text
//! pending -> success | failed | expired
//! failed  -> success
//! success -> (terminal)
//! expired -> (terminal)
//! ```
//!
//! Identity and client-capture fields are write-once. The transition log in
//! `metadata.update_history` is append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::common::RequestContext;
use super::quota::Tier;
use crate::error::{LedgerError, LedgerResult};

/// Attempt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
    Expired,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Expired => "expired",
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptStatus::Success | AttemptStatus::Expired)
    }

    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(&self, next: AttemptStatus) -> bool {
        use AttemptStatus::*;
        matches!(
            (self, next),
            (Pending, Success) | (Pending, Failed) | (Pending, Expired) | (Failed, Success)
        )
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(AttemptStatus::Pending),
            "success" => Ok(AttemptStatus::Success),
            "failed" => Ok(AttemptStatus::Failed),
            "expired" => Ok(AttemptStatus::Expired),
            other => Err(LedgerError::Validation(format!("Unknown attempt status: {}", other))),
        }
    }
}

/// One entry of the append-only transition log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub timestamp: DateTime<Utc>,
    pub previous_status: AttemptStatus,
    pub new_status: AttemptStatus,
    pub actor: String,
    pub reason: Option<String>,
}

/// Structured audit trail carried on the attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptMetadata {
    /// Transition log, only ever appended to
    #[serde(default)]
    pub update_history: Vec<TransitionEvent>,
    /// Tier the asset required when the attempt was authorized
    pub required_tier: Option<Tier>,
    /// Storage id of the first attempt in the retry chain
    pub chain_root_id: Option<String>,
    /// Free-form outcome annotations reported with transitions
    #[serde(default)]
    pub annotations: BTreeMap<String, serde_json::Value>,
}

/// Access attempt record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessAttempt {
    /// Storage key
    pub id: String,
    /// Caller-facing identifier
    pub attempt_id: String,
    pub subject_id: String,
    pub asset_id: String,
    /// Storage id of the attempt this one retries
    pub retry_of: Option<String>,
    /// Position in the retry chain, starting at 1
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
    /// Whole seconds between initiation and completion
    pub access_duration: Option<i64>,
    pub error_reason: Option<String>,
    pub error_code: Option<String>,
    pub metadata: AttemptMetadata,
    /// Optimistic concurrency token, bumped by every stored write
    pub revision: u64,
}

/// Write-once fields a transition request may carry
///
/// A value for a field that is still unset is accepted once. A value that
/// differs from an already-set field is rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImmutableFields {
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

/// Requested status change plus outcome fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub status: AttemptStatus,
    pub reason: Option<String>,
    pub error_reason: Option<String>,
    pub error_code: Option<String>,
    pub access_duration: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub annotations: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub immutable: ImmutableFields,
}

impl TransitionRequest {
    pub fn to(status: AttemptStatus) -> Self {
        Self {
            status,
            reason: None,
            error_reason: None,
            error_code: None,
            access_duration: None,
            completed_at: None,
            annotations: BTreeMap::new(),
            immutable: ImmutableFields::default(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, reason: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self.error_reason = Some(reason.into());
        self
    }
}

/// Request to open a new attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAttemptRequest {
    pub subject_id: String,
    pub asset_id: String,
    pub retry_of: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateAttemptRequest {
    pub fn new(subject_id: impl Into<String>, asset_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            asset_id: asset_id.into(),
            retry_of: None,
            issued_at: None,
            expires_at: None,
        }
    }

    pub fn retrying(mut self, retry_of: impl Into<String>) -> Self {
        self.retry_of = Some(retry_of.into());
        self
    }

    /// Reject requests missing required identity fields
    pub fn validate(&self) -> LedgerResult<()> {
        if self.subject_id.trim().is_empty() {
            return Err(LedgerError::Validation("subject_id is required".to_string()));
        }
        if self.asset_id.trim().is_empty() {
            return Err(LedgerError::Validation("asset_id is required".to_string()));
        }
        if matches!(&self.retry_of, Some(r) if r.trim().is_empty()) {
            return Err(LedgerError::Validation("retry_of must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Result of applying a transition to an in-memory record
#[derive(Debug, Clone)]
pub struct AppliedTransition {
    pub attempt: AccessAttempt,
    /// The transition enters `success` and quota must be charged with it
    pub requires_charge: bool,
}

fn check_set_once<T: PartialEq + Clone>(
    field: &'static str,
    stored: &mut Option<T>,
    requested: &Option<T>,
) -> LedgerResult<()> {
    match (stored.as_ref(), requested) {
        (_, None) => Ok(()),
        (None, Some(value)) => {
            *stored = Some(value.clone());
            Ok(())
        }
        (Some(current), Some(value)) if current == value => Ok(()),
        (Some(_), Some(_)) => Err(LedgerError::ImmutableFieldViolation { field }),
    }
}

fn check_fixed<T: PartialEq>(field: &'static str, stored: &T, requested: &Option<T>) -> LedgerResult<()> {
    match requested {
        Some(value) if value != stored => Err(LedgerError::ImmutableFieldViolation { field }),
        _ => Ok(()),
    }
}

impl AccessAttempt {
    /// Still pending with its window elapsed
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == AttemptStatus::Pending && self.expires_at <= now
    }

    /// Apply write-once field values from a request
    pub fn merge_immutable(&mut self, fields: &ImmutableFields) -> LedgerResult<()> {
        check_fixed("attempt_id", &self.attempt_id, &fields.attempt_id)?;
        check_fixed("subject_id", &self.subject_id, &fields.subject_id)?;
        check_fixed("asset_id", &self.asset_id, &fields.asset_id)?;
        check_fixed("initiated_at", &self.initiated_at, &fields.initiated_at)?;
        check_set_once("issued_at", &mut self.issued_at, &fields.issued_at)?;
        check_set_once("ip_address", &mut self.ip_address, &fields.ip_address)?;
        check_set_once("user_agent", &mut self.user_agent, &fields.user_agent)?;
        check_set_once("source_ip", &mut self.source_ip, &fields.source_ip)?;
        check_set_once("retry_of", &mut self.retry_of, &fields.retry_of)?;

        match fields.quota_charged {
            Some(false) if self.quota_charged => {
                Err(LedgerError::ImmutableFieldViolation { field: "quota_charged" })
            }
            Some(true) if !self.quota_charged => Err(LedgerError::Validation(
                "quota_charged is recorded by the quota manager on success".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Validate and apply a transition, returning the record to persist
    ///
    /// The stored record is not touched; callers persist the returned copy
    /// with a revision check.
    pub fn apply_transition(
        &self,
        ctx: &RequestContext,
        request: &TransitionRequest,
        now: DateTime<Utc>,
    ) -> LedgerResult<AppliedTransition> {
        let mut next = self.clone();
        next.merge_immutable(&request.immutable)?;

        if !self.status.can_transition_to(request.status) {
            return Err(LedgerError::InvalidStatusTransition {
                from: self.status,
                to: request.status,
            });
        }

        let requires_charge = request.status == AttemptStatus::Success && !self.quota_charged;

        next.status = request.status;
        if let Some(reason) = &request.error_reason {
            next.error_reason = Some(reason.clone());
        }
        if let Some(code) = &request.error_code {
            next.error_code = Some(code.clone());
        }
        if next.access_duration.is_none() {
            next.access_duration = request.access_duration;
        }
        for (key, value) in &request.annotations {
            next.metadata.annotations.insert(key.clone(), value.clone());
        }

        if request.status.is_terminal() {
            let completed_at = *next
                .completed_at
                .get_or_insert(request.completed_at.unwrap_or(now));
            if next.access_duration.is_none() {
                let elapsed = (completed_at - next.initiated_at).num_seconds().max(0);
                next.access_duration = Some(elapsed);
            }
        }

        if requires_charge {
            next.quota_charged = true;
        }

        next.metadata.update_history.push(TransitionEvent {
            timestamp: now,
            previous_status: self.status,
            new_status: request.status,
            actor: ctx.actor.clone(),
            reason: request.reason.clone(),
        });

        Ok(AppliedTransition {
            attempt: next,
            requires_charge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending_attempt(now: DateTime<Utc>) -> AccessAttempt {
        AccessAttempt {
            id: "id-1".to_string(),
            attempt_id: "att_1".to_string(),
            subject_id: "user-1".to_string(),
            asset_id: "tpl-1".to_string(),
            retry_of: None,
            attempt_number: 1,
            status: AttemptStatus::Pending,
            initiated_at: now,
            issued_at: Some(now),
            expires_at: now + Duration::minutes(15),
            completed_at: None,
            ip_address: Some("203.0.113.7".to_string()),
            user_agent: None,
            source_ip: Some("10.0.0.1".to_string()),
            quota_charged: false,
            access_duration: None,
            error_reason: None,
            error_code: None,
            metadata: AttemptMetadata::default(),
            revision: 1,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::system("tester")
    }

    #[test]
    fn test_state_machine_edges() {
        use AttemptStatus::*;
        let all = [Pending, Success, Failed, Expired];
        let allowed = [(Pending, Success), (Pending, Failed), (Pending, Expired), (Failed, Success)];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_overdue_only_while_pending() {
        let now = Utc::now();
        let mut attempt = pending_attempt(now - Duration::minutes(20));
        assert!(attempt.is_overdue(now));
        assert!(!attempt.is_overdue(now - Duration::minutes(10)));

        attempt.status = AttemptStatus::Failed;
        assert!(!attempt.is_overdue(now));
    }

    #[test]
    fn test_success_sets_completion_fields() {
        let start = Utc::now();
        let attempt = pending_attempt(start);
        let later = start + Duration::seconds(42);

        let applied = attempt
            .apply_transition(&ctx(), &TransitionRequest::to(AttemptStatus::Success), later)
            .unwrap();

        assert!(applied.requires_charge);
        assert!(applied.attempt.quota_charged);
        assert_eq!(applied.attempt.completed_at, Some(later));
        assert_eq!(applied.attempt.access_duration, Some(42));
        assert_eq!(applied.attempt.metadata.update_history.len(), 1);
        assert_eq!(applied.attempt.metadata.update_history[0].actor, "tester");
    }

    #[test]
    fn test_failed_is_not_terminal() {
        let now = Utc::now();
        let attempt = pending_attempt(now);
        let applied = attempt
            .apply_transition(
                &ctx(),
                &TransitionRequest::to(AttemptStatus::Failed).with_error("E_NET", "handoff timed out"),
                now,
            )
            .unwrap();

        assert!(!applied.requires_charge);
        assert_eq!(applied.attempt.completed_at, None);
        assert_eq!(applied.attempt.error_code.as_deref(), Some("E_NET"));

        let retried = applied
            .attempt
            .apply_transition(&ctx(), &TransitionRequest::to(AttemptStatus::Success), now)
            .unwrap();
        assert!(retried.requires_charge);
        assert_eq!(retried.attempt.metadata.update_history.len(), 2);
    }

    #[test]
    fn test_terminal_rejects_everything() {
        let now = Utc::now();
        let mut attempt = pending_attempt(now);
        attempt.status = AttemptStatus::Expired;

        for to in [AttemptStatus::Pending, AttemptStatus::Success, AttemptStatus::Failed] {
            let err = attempt
                .apply_transition(&ctx(), &TransitionRequest::to(to), now)
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidStatusTransition { .. }));
        }
    }

    #[test]
    fn test_immutable_fields() {
        let now = Utc::now();
        let attempt = pending_attempt(now);

        let mut request = TransitionRequest::to(AttemptStatus::Failed);
        request.immutable.asset_id = Some("tpl-2".to_string());
        let err = attempt.apply_transition(&ctx(), &request, now).unwrap_err();
        assert_eq!(err, LedgerError::ImmutableFieldViolation { field: "asset_id" });

        let mut request = TransitionRequest::to(AttemptStatus::Failed);
        request.immutable.ip_address = Some("198.51.100.1".to_string());
        let err = attempt.apply_transition(&ctx(), &request, now).unwrap_err();
        assert_eq!(err, LedgerError::ImmutableFieldViolation { field: "ip_address" });

        // Unset field can be filled once, same value is accepted
        let mut request = TransitionRequest::to(AttemptStatus::Failed);
        request.immutable.user_agent = Some("curl/8".to_string());
        request.immutable.subject_id = Some("user-1".to_string());
        let applied = attempt.apply_transition(&ctx(), &request, now).unwrap();
        assert_eq!(applied.attempt.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn test_client_cannot_set_quota_charged() {
        let now = Utc::now();
        let attempt = pending_attempt(now);
        let mut request = TransitionRequest::to(AttemptStatus::Failed);
        request.immutable.quota_charged = Some(true);
        let err = attempt.apply_transition(&ctx(), &request, now).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn test_create_request_validation() {
        assert!(CreateAttemptRequest::new("user-1", "tpl-1").validate().is_ok());
        assert!(CreateAttemptRequest::new("", "tpl-1").validate().is_err());
        assert!(CreateAttemptRequest::new("user-1", " ").validate().is_err());
        assert!(CreateAttemptRequest::new("user-1", "tpl-1").retrying("").validate().is_err());
    }
}
