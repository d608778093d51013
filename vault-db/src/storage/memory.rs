//! In-memory storage
//!
//! Used for tests and development. Locks are always taken in the order
//! attempts, attempt_ids, quotas, events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{
    conflict_message, event_matches, ChainLink, ChargeOutcome, InsertOutcome, LedgerStore, StorageStats,
};
use crate::error::{VaultDbError, VaultDbResult};
use vault_core::types::{AccessAttempt, AttemptStatus, EventStatus, ExternalEventRecord, QuotaState};

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Keyed by caller-facing attempt id
    attempts: Arc<RwLock<HashMap<String, AccessAttempt>>>,
    /// Storage id -> attempt id
    attempt_ids: Arc<RwLock<HashMap<String, String>>>,
    quotas: Arc<RwLock<HashMap<String, QuotaState>>>,
    events: Arc<RwLock<HashMap<String, ExternalEventRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_revision(kind: &str, key: &str, expected: u64, found: u64) -> VaultDbResult<()> {
    if expected != found {
        return Err(VaultDbError::Conflict(conflict_message(kind, key, expected, found)));
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for MemoryStore {
    // ==================== Attempts ====================

    async fn insert_attempt(&self, attempt: &AccessAttempt) -> VaultDbResult<AccessAttempt> {
        let mut attempts = self.attempts.write().await;
        let mut attempt_ids = self.attempt_ids.write().await;

        if attempts.contains_key(&attempt.attempt_id) || attempt_ids.contains_key(&attempt.id) {
            return Err(VaultDbError::AlreadyExists(format!("Attempt {}", attempt.attempt_id)));
        }

        let mut stored = attempt.clone();
        stored.revision = 1;
        attempt_ids.insert(stored.id.clone(), stored.attempt_id.clone());
        attempts.insert(stored.attempt_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_attempt(&self, attempt_id: &str) -> VaultDbResult<Option<AccessAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts.get(attempt_id).cloned())
    }

    async fn get_chain_link(&self, id: &str) -> VaultDbResult<Option<ChainLink>> {
        let attempts = self.attempts.read().await;
        let attempt_ids = self.attempt_ids.read().await;
        Ok(attempt_ids
            .get(id)
            .and_then(|attempt_id| attempts.get(attempt_id))
            .map(ChainLink::of))
    }

    async fn replace_attempt(
        &self,
        attempt: &AccessAttempt,
        expected_revision: u64,
    ) -> VaultDbResult<AccessAttempt> {
        let mut attempts = self.attempts.write().await;
        let stored = attempts
            .get(&attempt.attempt_id)
            .ok_or_else(|| VaultDbError::NotFound(format!("Attempt {}", attempt.attempt_id)))?;
        check_revision("Attempt", &attempt.attempt_id, expected_revision, stored.revision)?;

        let mut next = attempt.clone();
        next.revision = expected_revision + 1;
        attempts.insert(next.attempt_id.clone(), next.clone());
        Ok(next)
    }

    async fn charge_attempt(
        &self,
        attempt: &AccessAttempt,
        expected_revision: u64,
        now: DateTime<Utc>,
    ) -> VaultDbResult<ChargeOutcome> {
        let mut attempts = self.attempts.write().await;
        let mut quotas = self.quotas.write().await;

        let stored = attempts
            .get(&attempt.attempt_id)
            .ok_or_else(|| VaultDbError::NotFound(format!("Attempt {}", attempt.attempt_id)))?;
        check_revision("Attempt", &attempt.attempt_id, expected_revision, stored.revision)?;

        let mut quota = quotas
            .get(&attempt.subject_id)
            .cloned()
            .ok_or_else(|| VaultDbError::NotFound(format!("Quota state for {}", attempt.subject_id)))?;
        if quota.consume(now).is_err() {
            return Ok(ChargeOutcome::Exhausted(quota));
        }
        quota.revision += 1;

        let mut next = attempt.clone();
        next.revision = expected_revision + 1;
        attempts.insert(next.attempt_id.clone(), next.clone());
        quotas.insert(quota.subject_id.clone(), quota.clone());

        Ok(ChargeOutcome::Charged { attempt: next, quota })
    }

    async fn list_attempts_by_subject(
        &self,
        subject_id: &str,
        limit: usize,
        offset: usize,
    ) -> VaultDbResult<Vec<AccessAttempt>> {
        let attempts = self.attempts.read().await;
        let mut matching: Vec<AccessAttempt> = attempts
            .values()
            .filter(|a| a.subject_id == subject_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.initiated_at
                .cmp(&a.initiated_at)
                .then_with(|| b.attempt_id.cmp(&a.attempt_id))
        });
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> VaultDbResult<Vec<AccessAttempt>> {
        let attempts = self.attempts.read().await;
        let mut expired: Vec<AccessAttempt> = attempts
            .values()
            .filter(|a| a.status == AttemptStatus::Pending && a.expires_at < now)
            .cloned()
            .collect();
        expired.sort_by_key(|a| a.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    // ==================== Quota ====================

    async fn get_quota(&self, subject_id: &str) -> VaultDbResult<Option<QuotaState>> {
        let quotas = self.quotas.read().await;
        Ok(quotas.get(subject_id).cloned())
    }

    async fn insert_quota_if_absent(&self, state: &QuotaState) -> VaultDbResult<InsertOutcome<QuotaState>> {
        let mut quotas = self.quotas.write().await;
        if let Some(existing) = quotas.get(&state.subject_id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        let mut stored = state.clone();
        stored.revision = 1;
        quotas.insert(stored.subject_id.clone(), stored.clone());
        Ok(InsertOutcome::Inserted(stored))
    }

    async fn replace_quota(&self, state: &QuotaState, expected_revision: u64) -> VaultDbResult<QuotaState> {
        let mut quotas = self.quotas.write().await;
        let stored = quotas
            .get(&state.subject_id)
            .ok_or_else(|| VaultDbError::NotFound(format!("Quota state for {}", state.subject_id)))?;
        check_revision("Quota state", &state.subject_id, expected_revision, stored.revision)?;

        let mut next = state.clone();
        next.revision = expected_revision + 1;
        quotas.insert(next.subject_id.clone(), next.clone());
        Ok(next)
    }

    // ==================== Billing events ====================

    async fn insert_event_if_absent(
        &self,
        record: &ExternalEventRecord,
    ) -> VaultDbResult<InsertOutcome<ExternalEventRecord>> {
        let mut events = self.events.write().await;
        if let Some(existing) = events.get(&record.external_event_id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        events.insert(record.external_event_id.clone(), record.clone());
        Ok(InsertOutcome::Inserted(record.clone()))
    }

    async fn replace_event(
        &self,
        record: &ExternalEventRecord,
        expected: &ExternalEventRecord,
    ) -> VaultDbResult<ExternalEventRecord> {
        let mut events = self.events.write().await;
        let stored = events
            .get(&record.external_event_id)
            .ok_or_else(|| VaultDbError::NotFound(format!("Event {}", record.external_event_id)))?;
        if !event_matches(stored, expected) {
            return Err(VaultDbError::Conflict(format!(
                "Event {} was modified concurrently",
                record.external_event_id
            )));
        }
        events.insert(record.external_event_id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn get_event(&self, event_id: &str) -> VaultDbResult<Option<ExternalEventRecord>> {
        let events = self.events.read().await;
        Ok(events.get(event_id).cloned())
    }

    async fn list_events(
        &self,
        status: Option<EventStatus>,
        limit: usize,
        offset: usize,
    ) -> VaultDbResult<Vec<ExternalEventRecord>> {
        let events = self.events.read().await;
        let mut matching: Vec<ExternalEventRecord> = events
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    // ==================== Stats ====================

    async fn get_stats(&self) -> VaultDbResult<StorageStats> {
        let attempts = self.attempts.read().await;
        let quotas = self.quotas.read().await;
        let events = self.events.read().await;

        Ok(StorageStats {
            total_attempts: attempts.len() as u64,
            pending_attempts: attempts
                .values()
                .filter(|a| a.status == AttemptStatus::Pending)
                .count() as u64,
            quota_subjects: quotas.len() as u64,
            total_events: events.len() as u64,
            failed_events: events
                .values()
                .filter(|e| e.status == EventStatus::Failed)
                .count() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::{pending_attempt, quota_state, received_event};
    use chrono::Duration;

    #[tokio::test]
    async fn test_attempt_revision_check() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let stored = store.insert_attempt(&pending_attempt("att_1", "user-1", now)).await.unwrap();
        assert_eq!(stored.revision, 1);

        let mut next = stored.clone();
        next.status = AttemptStatus::Failed;
        let written = store.replace_attempt(&next, 1).await.unwrap();
        assert_eq!(written.revision, 2);

        let err = store.replace_attempt(&next, 1).await.unwrap_err();
        assert!(matches!(err, VaultDbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_duplicate_attempt_rejected() {
        let store = MemoryStore::new();
        let attempt = pending_attempt("att_1", "user-1", Utc::now());
        store.insert_attempt(&attempt).await.unwrap();
        let err = store.insert_attempt(&attempt).await.unwrap_err();
        assert!(matches!(err, VaultDbError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_charge_is_guarded() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_quota_if_absent(&quota_state("user-1", 1, now)).await.unwrap();

        let first = store.insert_attempt(&pending_attempt("att_1", "user-1", now)).await.unwrap();
        let second = store.insert_attempt(&pending_attempt("att_2", "user-1", now)).await.unwrap();

        let outcome = store.charge_attempt(&first, 1, now).await.unwrap();
        assert!(matches!(outcome, ChargeOutcome::Charged { ref quota, .. } if quota.used == 1));

        let outcome = store.charge_attempt(&second, 1, now).await.unwrap();
        assert!(matches!(outcome, ChargeOutcome::Exhausted(_)));

        let quota = store.get_quota("user-1").await.unwrap().unwrap();
        assert_eq!(quota.used, 1);
        assert_eq!(quota.revision, 2);
    }

    #[tokio::test]
    async fn test_expired_pending_listing() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut old = pending_attempt("att_old", "user-1", now - Duration::hours(1));
        old.expires_at = now - Duration::minutes(30);
        store.insert_attempt(&old).await.unwrap();
        store.insert_attempt(&pending_attempt("att_new", "user-1", now)).await.unwrap();

        let expired = store.list_expired_pending(now, 10).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].attempt_id, "att_old");
    }

    #[tokio::test]
    async fn test_event_insert_if_absent() {
        let store = MemoryStore::new();
        let record = received_event("evt_1");
        assert!(matches!(
            store.insert_event_if_absent(&record).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert!(matches!(
            store.insert_event_if_absent(&record).await.unwrap(),
            InsertOutcome::Existing(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_charges_respect_limit() {
        crate::storage::concurrency::charge_race(std::sync::Arc::new(MemoryStore::new())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_event_inserts_dedupe() {
        crate::storage::concurrency::event_insert_race(std::sync::Arc::new(MemoryStore::new())).await;
    }
}
