//! Ledger storage
//!
//! Persistence interface for attempts, quota state and billing events, with
//! an in-memory backend and a sled backend.
//!
//! # Guarantees
//!
//! - Every write to an attempt or quota state is checked against the
//!   revision it was read at; a stale write fails with `Conflict`
//! - Charging writes the attempt and the quota state as one atomic unit
//!   and re-checks capacity inside it
//! - Event insertion is insert-if-absent on the provider event id
//! - There are no delete operations

pub mod memory;
pub mod sled;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::VaultDbResult;
use vault_core::types::{AccessAttempt, EventStatus, ExternalEventRecord, QuotaState};

/// Retry chain position of a stored attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub attempt_number: u32,
    /// Storage id of the chain's first attempt
    pub chain_root_id: String,
}

impl ChainLink {
    pub fn of(attempt: &AccessAttempt) -> Self {
        Self {
            attempt_number: attempt.attempt_number,
            chain_root_id: attempt
                .metadata
                .chain_root_id
                .clone()
                .unwrap_or_else(|| attempt.id.clone()),
        }
    }
}

/// Result of an insert-if-absent
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome<T> {
    Inserted(T),
    Existing(T),
}

/// Result of an atomic charge
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeOutcome {
    /// Attempt and quota state were written together
    Charged {
        attempt: AccessAttempt,
        quota: QuotaState,
    },
    /// No capacity left; nothing was written
    Exhausted(QuotaState),
}

/// Ledger storage interface
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ==================== Attempts ====================

    /// Insert a new attempt with revision 1
    async fn insert_attempt(&self, attempt: &AccessAttempt) -> VaultDbResult<AccessAttempt>;

    /// Get attempt by caller-facing id
    async fn get_attempt(&self, attempt_id: &str) -> VaultDbResult<Option<AccessAttempt>>;

    /// Chain position of the attempt with storage id `id`
    async fn get_chain_link(&self, id: &str) -> VaultDbResult<Option<ChainLink>>;

    /// Replace an attempt if its stored revision equals `expected_revision`
    async fn replace_attempt(
        &self,
        attempt: &AccessAttempt,
        expected_revision: u64,
    ) -> VaultDbResult<AccessAttempt>;

    /// Replace an attempt and consume one quota unit of its subject atomically
    async fn charge_attempt(
        &self,
        attempt: &AccessAttempt,
        expected_revision: u64,
        now: DateTime<Utc>,
    ) -> VaultDbResult<ChargeOutcome>;

    /// Attempts of a subject, newest first
    async fn list_attempts_by_subject(
        &self,
        subject_id: &str,
        limit: usize,
        offset: usize,
    ) -> VaultDbResult<Vec<AccessAttempt>>;

    /// Pending attempts with `expires_at < now`, oldest expiry first
    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> VaultDbResult<Vec<AccessAttempt>>;

    // ==================== Quota ====================

    async fn get_quota(&self, subject_id: &str) -> VaultDbResult<Option<QuotaState>>;

    /// Insert a quota state unless one exists; returns the stored state
    async fn insert_quota_if_absent(&self, state: &QuotaState) -> VaultDbResult<InsertOutcome<QuotaState>>;

    /// Replace a quota state if its stored revision equals `expected_revision`
    async fn replace_quota(&self, state: &QuotaState, expected_revision: u64) -> VaultDbResult<QuotaState>;

    // ==================== Billing events ====================

    /// Insert an event record unless its id has been seen
    async fn insert_event_if_absent(
        &self,
        record: &ExternalEventRecord,
    ) -> VaultDbResult<InsertOutcome<ExternalEventRecord>>;

    /// Replace an event record if the stored one still matches `expected`
    /// in status and retry count
    async fn replace_event(
        &self,
        record: &ExternalEventRecord,
        expected: &ExternalEventRecord,
    ) -> VaultDbResult<ExternalEventRecord>;

    async fn get_event(&self, event_id: &str) -> VaultDbResult<Option<ExternalEventRecord>>;

    /// Events newest first, optionally filtered by status
    async fn list_events(
        &self,
        status: Option<EventStatus>,
        limit: usize,
        offset: usize,
    ) -> VaultDbResult<Vec<ExternalEventRecord>>;

    // ==================== Stats ====================

    async fn get_stats(&self) -> VaultDbResult<StorageStats>;
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_attempts: u64,
    pub pending_attempts: u64,
    pub quota_subjects: u64,
    pub total_events: u64,
    pub failed_events: u64,
}

pub(crate) fn conflict_message(kind: &str, key: &str, expected: u64, found: u64) -> String {
    format!(
        "{} {} was modified concurrently (expected revision {}, found {})",
        kind, key, expected, found
    )
}

/// Whether the stored event still matches what the writer read
pub(crate) fn event_matches(stored: &ExternalEventRecord, expected: &ExternalEventRecord) -> bool {
    stored.status == expected.status && stored.retry_count == expected.retry_count
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Duration, Utc};
    use vault_core::types::{
        AccessAttempt, AttemptMetadata, AttemptStatus, EventStatus, ExternalEventRecord, PlanSpec,
        QuotaLimit, QuotaState, QuotaWindow, Tier,
    };

    pub fn pending_attempt(attempt_id: &str, subject_id: &str, now: DateTime<Utc>) -> AccessAttempt {
        AccessAttempt {
            id: format!("id-{}", attempt_id),
            attempt_id: attempt_id.to_string(),
            subject_id: subject_id.to_string(),
            asset_id: "tpl-1".to_string(),
            retry_of: None,
            attempt_number: 1,
            status: AttemptStatus::Pending,
            initiated_at: now,
            issued_at: Some(now),
            expires_at: now + Duration::minutes(15),
            completed_at: None,
            ip_address: None,
            user_agent: None,
            source_ip: None,
            quota_charged: false,
            access_duration: None,
            error_reason: None,
            error_code: None,
            metadata: AttemptMetadata::default(),
            revision: 0,
        }
    }

    pub fn quota_state(subject_id: &str, limit: u32, now: DateTime<Utc>) -> QuotaState {
        let plan = PlanSpec {
            window: QuotaWindow::Daily,
            limit: QuotaLimit::Limited(limit),
        };
        QuotaState::provision(subject_id, Tier::Free, plan, now)
    }

    pub fn received_event(event_id: &str) -> ExternalEventRecord {
        ExternalEventRecord {
            external_event_id: event_id.to_string(),
            event_type: "invoice.payment_failed".to_string(),
            payload: serde_json::json!({"subject_id": "user-1"}),
            received_at: Utc::now(),
            processed_at: None,
            status: EventStatus::Pending,
            error_message: None,
            retry_count: 0,
            claimed_at: None,
        }
    }
}

/// Concurrency checks every backend must pass
#[cfg(test)]
pub(crate) mod concurrency {
    use chrono::Utc;
    use std::sync::Arc;
    use vault_core::types::AttemptStatus;

    use super::fixtures::{pending_attempt, quota_state, received_event};
    use super::{ChargeOutcome, InsertOutcome, LedgerStore};

    /// 20 distinct attempts race to charge a subject with 5 units left
    pub async fn charge_race(store: Arc<dyn LedgerStore>) {
        let now = Utc::now();
        store.insert_quota_if_absent(&quota_state("user-1", 5, now)).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let stored = store
                .insert_attempt(&pending_attempt(&format!("att_{}", i), "user-1", now))
                .await
                .unwrap();
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut success = stored.clone();
                success.status = AttemptStatus::Success;
                success.quota_charged = true;
                store.charge_attempt(&success, stored.revision, Utc::now()).await
            }));
        }

        let mut charged = 0;
        let mut exhausted = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                ChargeOutcome::Charged { .. } => charged += 1,
                ChargeOutcome::Exhausted(quota) => {
                    assert_eq!(quota.used, 5);
                    exhausted += 1;
                }
            }
        }
        assert_eq!(charged, 5);
        assert_eq!(exhausted, 15);

        let quota = store.get_quota("user-1").await.unwrap().unwrap();
        assert_eq!(quota.used, 5);
        assert_eq!(quota.lifetime_used, 5);

        let attempts = store.list_attempts_by_subject("user-1", 100, 0).await.unwrap();
        assert_eq!(attempts.len(), 20);
        assert_eq!(attempts.iter().filter(|a| a.quota_charged).count(), 5);
        assert_eq!(
            attempts.iter().filter(|a| a.status == AttemptStatus::Success).count(),
            5
        );
    }

    /// 16 writers insert the same event id; exactly one wins
    pub async fn event_insert_race(store: Arc<dyn LedgerStore>) {
        let record = received_event("evt_1");
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let record = record.clone();
            tasks.push(tokio::spawn(async move { store.insert_event_if_absent(&record).await }));
        }

        let mut inserted = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                InsertOutcome::Inserted(_) => inserted += 1,
                InsertOutcome::Existing(existing) => assert_eq!(existing.external_event_id, "evt_1"),
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.list_events(None, 100, 0).await.unwrap().len(), 1);
        assert_eq!(store.get_stats().await.unwrap().total_events, 1);
    }
}

pub use memory::MemoryStore;
pub use self::sled::SledStore;

/// Open the backend selected in configuration
pub fn open_store(config: &StorageConfig) -> VaultDbResult<Arc<dyn LedgerStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Sled => {
            let path = config.data_dir.join("ledger.sled");
            tracing::info!(path = %path.display(), "Opening sled ledger store");
            Ok(Arc::new(SledStore::open(path)?))
        }
    }
}
