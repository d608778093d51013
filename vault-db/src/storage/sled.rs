//! Sled storage
//!
//! Records are stored as JSON in one tree per collection. Two index trees
//! support listing:
//!
//! - `subject_attempts`: `subject_id 0x00 initiated_at attempt_id`
//! - `pending_expiry`: `expires_at attempt_id`, only for pending attempts
//!
//! Timestamps in keys are big-endian microseconds so byte order is time
//! order. Multi-record writes run in sled transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError, Transactional,
};
use std::path::Path;

use super::{
    conflict_message, event_matches, ChainLink, ChargeOutcome, InsertOutcome, LedgerStore, StorageStats,
};
use crate::error::{VaultDbError, VaultDbResult};
use vault_core::types::{AccessAttempt, AttemptStatus, EventStatus, ExternalEventRecord, QuotaState};

const ATTEMPTS_TREE: &str = "attempts";
const ATTEMPT_IDS_TREE: &str = "attempt_ids";
const SUBJECT_ATTEMPTS_TREE: &str = "subject_attempts";
const PENDING_EXPIRY_TREE: &str = "pending_expiry";
const QUOTAS_TREE: &str = "quotas";
const EVENTS_TREE: &str = "events";

/// Sled-backed store
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
    /// attempt_id -> AccessAttempt
    attempts: sled::Tree,
    /// storage id -> attempt_id
    attempt_ids: sled::Tree,
    subject_attempts: sled::Tree,
    pending_expiry: sled::Tree,
    /// subject_id -> QuotaState
    quotas: sled::Tree,
    /// external_event_id -> ExternalEventRecord
    events: sled::Tree,
}

fn open_tree(db: &sled::Db, name: &str) -> VaultDbResult<sled::Tree> {
    db.open_tree(name)
        .map_err(|e| VaultDbError::Storage(format!("Failed to open {} tree: {}", name, e)))
}

type TxResult<T> = ConflictableTransactionResult<T, VaultDbError>;

fn abort<T>(e: VaultDbError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(e))
}

fn tx_decode<T: DeserializeOwned>(bytes: &[u8]) -> TxResult<T> {
    serde_json::from_slice(bytes).map_err(|e| ConflictableTransactionError::Abort(VaultDbError::Serialization(e)))
}

fn tx_encode<T: Serialize>(value: &T) -> TxResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ConflictableTransactionError::Abort(VaultDbError::Serialization(e)))
}

fn from_tx_error(e: TransactionError<VaultDbError>) -> VaultDbError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => VaultDbError::Storage(format!("Transaction failed: {}", e)),
    }
}

fn time_key(t: DateTime<Utc>) -> [u8; 8] {
    (t.timestamp_micros().max(0) as u64).to_be_bytes()
}

fn subject_prefix(subject_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(subject_id.len() + 1);
    key.extend_from_slice(subject_id.as_bytes());
    key.push(0);
    key
}

fn subject_key(attempt: &AccessAttempt) -> Vec<u8> {
    let mut key = subject_prefix(&attempt.subject_id);
    key.extend_from_slice(&time_key(attempt.initiated_at));
    key.extend_from_slice(attempt.attempt_id.as_bytes());
    key
}

fn expiry_key(attempt: &AccessAttempt) -> Vec<u8> {
    let mut key = time_key(attempt.expires_at).to_vec();
    key.extend_from_slice(attempt.attempt_id.as_bytes());
    key
}

impl SledStore {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> VaultDbResult<Self> {
        let db = sled::open(path).map_err(|e| VaultDbError::Storage(format!("Failed to open sled db: {}", e)))?;

        Ok(Self {
            attempts: open_tree(&db, ATTEMPTS_TREE)?,
            attempt_ids: open_tree(&db, ATTEMPT_IDS_TREE)?,
            subject_attempts: open_tree(&db, SUBJECT_ATTEMPTS_TREE)?,
            pending_expiry: open_tree(&db, PENDING_EXPIRY_TREE)?,
            quotas: open_tree(&db, QUOTAS_TREE)?,
            events: open_tree(&db, EVENTS_TREE)?,
            db,
        })
    }

    /// Flush to disk
    pub fn flush(&self) -> VaultDbResult<()> {
        self.db
            .flush()
            .map_err(|e| VaultDbError::Storage(format!("Failed to flush db: {}", e)))?;
        Ok(())
    }

    fn serialize<T: Serialize>(value: &T) -> VaultDbResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> VaultDbResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn load_attempt(&self, attempt_id: &[u8]) -> VaultDbResult<Option<AccessAttempt>> {
        match self.attempts.get(attempt_id)? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LedgerStore for SledStore {
    // ==================== Attempts ====================

    async fn insert_attempt(&self, attempt: &AccessAttempt) -> VaultDbResult<AccessAttempt> {
        let mut stored = attempt.clone();
        stored.revision = 1;
        let value = Self::serialize(&stored)?;
        let by_subject = subject_key(&stored);
        let by_expiry = expiry_key(&stored);

        (&self.attempts, &self.attempt_ids, &self.subject_attempts, &self.pending_expiry)
            .transaction(|(attempts, attempt_ids, subject_attempts, pending_expiry)| {
                if attempts.get(stored.attempt_id.as_bytes())?.is_some()
                    || attempt_ids.get(stored.id.as_bytes())?.is_some()
                {
                    return abort(VaultDbError::AlreadyExists(format!("Attempt {}", stored.attempt_id)));
                }
                attempts.insert(stored.attempt_id.as_bytes(), value.as_slice())?;
                attempt_ids.insert(stored.id.as_bytes(), stored.attempt_id.as_bytes())?;
                subject_attempts.insert(by_subject.as_slice(), &[] as &[u8])?;
                if stored.status == AttemptStatus::Pending {
                    pending_expiry.insert(by_expiry.as_slice(), &[] as &[u8])?;
                }
                Ok(())
            })
            .map_err(from_tx_error)?;

        Ok(stored)
    }

    async fn get_attempt(&self, attempt_id: &str) -> VaultDbResult<Option<AccessAttempt>> {
        self.load_attempt(attempt_id.as_bytes())
    }

    async fn get_chain_link(&self, id: &str) -> VaultDbResult<Option<ChainLink>> {
        let attempt_id = match self.attempt_ids.get(id.as_bytes())? {
            Some(attempt_id) => attempt_id,
            None => return Ok(None),
        };
        Ok(self.load_attempt(&attempt_id)?.as_ref().map(ChainLink::of))
    }

    async fn replace_attempt(
        &self,
        attempt: &AccessAttempt,
        expected_revision: u64,
    ) -> VaultDbResult<AccessAttempt> {
        let mut next = attempt.clone();
        next.revision = expected_revision + 1;
        let value = Self::serialize(&next)?;

        (&self.attempts, &self.pending_expiry)
            .transaction(|(attempts, pending_expiry)| {
                let stored: AccessAttempt = match attempts.get(next.attempt_id.as_bytes())? {
                    Some(bytes) => tx_decode(&bytes)?,
                    None => return abort(VaultDbError::NotFound(format!("Attempt {}", next.attempt_id))),
                };
                if stored.revision != expected_revision {
                    return abort(VaultDbError::Conflict(conflict_message(
                        "Attempt",
                        &next.attempt_id,
                        expected_revision,
                        stored.revision,
                    )));
                }
                attempts.insert(next.attempt_id.as_bytes(), value.as_slice())?;
                if stored.status == AttemptStatus::Pending && next.status != AttemptStatus::Pending {
                    pending_expiry.remove(expiry_key(&stored))?;
                }
                Ok(())
            })
            .map_err(from_tx_error)?;

        Ok(next)
    }

    async fn charge_attempt(
        &self,
        attempt: &AccessAttempt,
        expected_revision: u64,
        now: DateTime<Utc>,
    ) -> VaultDbResult<ChargeOutcome> {
        let mut next = attempt.clone();
        next.revision = expected_revision + 1;
        let value = Self::serialize(&next)?;

        (&self.attempts, &self.pending_expiry, &self.quotas)
            .transaction(|(attempts, pending_expiry, quotas)| {
                let stored: AccessAttempt = match attempts.get(next.attempt_id.as_bytes())? {
                    Some(bytes) => tx_decode(&bytes)?,
                    None => return abort(VaultDbError::NotFound(format!("Attempt {}", next.attempt_id))),
                };
                if stored.revision != expected_revision {
                    return abort(VaultDbError::Conflict(conflict_message(
                        "Attempt",
                        &next.attempt_id,
                        expected_revision,
                        stored.revision,
                    )));
                }

                let mut quota: QuotaState = match quotas.get(next.subject_id.as_bytes())? {
                    Some(bytes) => tx_decode(&bytes)?,
                    None => {
                        return abort(VaultDbError::NotFound(format!("Quota state for {}", next.subject_id)))
                    }
                };
                if quota.consume(now).is_err() {
                    return Ok(ChargeOutcome::Exhausted(quota));
                }
                quota.revision += 1;

                quotas.insert(next.subject_id.as_bytes(), tx_encode(&quota)?)?;
                attempts.insert(next.attempt_id.as_bytes(), value.as_slice())?;
                if stored.status == AttemptStatus::Pending && next.status != AttemptStatus::Pending {
                    pending_expiry.remove(expiry_key(&stored))?;
                }

                Ok(ChargeOutcome::Charged {
                    attempt: next.clone(),
                    quota,
                })
            })
            .map_err(from_tx_error)
    }

    async fn list_attempts_by_subject(
        &self,
        subject_id: &str,
        limit: usize,
        offset: usize,
    ) -> VaultDbResult<Vec<AccessAttempt>> {
        let prefix = subject_prefix(subject_id);
        let mut attempts = Vec::new();

        for item in self.subject_attempts.scan_prefix(&prefix).rev().skip(offset).take(limit) {
            let (key, _) = item?;
            // prefix, 8-byte timestamp, then the attempt id
            let attempt_id = &key[prefix.len() + 8..];
            if let Some(attempt) = self.load_attempt(attempt_id)? {
                attempts.push(attempt);
            }
        }

        Ok(attempts)
    }

    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> VaultDbResult<Vec<AccessAttempt>> {
        let upper = time_key(now);
        let mut expired = Vec::new();

        for item in self.pending_expiry.range(..upper) {
            if expired.len() >= limit {
                break;
            }
            let (key, _) = item?;
            if let Some(attempt) = self.load_attempt(&key[8..])? {
                if attempt.status == AttemptStatus::Pending && attempt.expires_at < now {
                    expired.push(attempt);
                }
            }
        }

        Ok(expired)
    }

    // ==================== Quota ====================

    async fn get_quota(&self, subject_id: &str) -> VaultDbResult<Option<QuotaState>> {
        match self.quotas.get(subject_id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn insert_quota_if_absent(&self, state: &QuotaState) -> VaultDbResult<InsertOutcome<QuotaState>> {
        let mut stored = state.clone();
        stored.revision = 1;
        let value = Self::serialize(&stored)?;

        match self
            .quotas
            .compare_and_swap(stored.subject_id.as_bytes(), None::<&[u8]>, Some(value))?
        {
            Ok(()) => Ok(InsertOutcome::Inserted(stored)),
            Err(cas) => match cas.current {
                Some(bytes) => Ok(InsertOutcome::Existing(Self::deserialize(&bytes)?)),
                None => Err(VaultDbError::Conflict(format!("Quota state for {}", stored.subject_id))),
            },
        }
    }

    async fn replace_quota(&self, state: &QuotaState, expected_revision: u64) -> VaultDbResult<QuotaState> {
        let mut next = state.clone();
        next.revision = expected_revision + 1;
        let value = Self::serialize(&next)?;

        self.quotas
            .transaction(|quotas| {
                let stored: QuotaState = match quotas.get(next.subject_id.as_bytes())? {
                    Some(bytes) => tx_decode(&bytes)?,
                    None => {
                        return abort(VaultDbError::NotFound(format!("Quota state for {}", next.subject_id)))
                    }
                };
                if stored.revision != expected_revision {
                    return abort(VaultDbError::Conflict(conflict_message(
                        "Quota state",
                        &next.subject_id,
                        expected_revision,
                        stored.revision,
                    )));
                }
                quotas.insert(next.subject_id.as_bytes(), value.as_slice())?;
                Ok(())
            })
            .map_err(from_tx_error)?;

        Ok(next)
    }

    // ==================== Billing events ====================

    async fn insert_event_if_absent(
        &self,
        record: &ExternalEventRecord,
    ) -> VaultDbResult<InsertOutcome<ExternalEventRecord>> {
        let value = Self::serialize(record)?;

        match self
            .events
            .compare_and_swap(record.external_event_id.as_bytes(), None::<&[u8]>, Some(value))?
        {
            Ok(()) => Ok(InsertOutcome::Inserted(record.clone())),
            Err(cas) => match cas.current {
                Some(bytes) => Ok(InsertOutcome::Existing(Self::deserialize(&bytes)?)),
                None => Err(VaultDbError::Conflict(format!("Event {}", record.external_event_id))),
            },
        }
    }

    async fn replace_event(
        &self,
        record: &ExternalEventRecord,
        expected: &ExternalEventRecord,
    ) -> VaultDbResult<ExternalEventRecord> {
        let value = Self::serialize(record)?;

        self.events
            .transaction(|events| {
                let stored: ExternalEventRecord = match events.get(record.external_event_id.as_bytes())? {
                    Some(bytes) => tx_decode(&bytes)?,
                    None => {
                        return abort(VaultDbError::NotFound(format!("Event {}", record.external_event_id)))
                    }
                };
                if !event_matches(&stored, expected) {
                    return abort(VaultDbError::Conflict(format!(
                        "Event {} was modified concurrently",
                        record.external_event_id
                    )));
                }
                events.insert(record.external_event_id.as_bytes(), value.as_slice())?;
                Ok(())
            })
            .map_err(from_tx_error)?;

        Ok(record.clone())
    }

    async fn get_event(&self, event_id: &str) -> VaultDbResult<Option<ExternalEventRecord>> {
        match self.events.get(event_id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_events(
        &self,
        status: Option<EventStatus>,
        limit: usize,
        offset: usize,
    ) -> VaultDbResult<Vec<ExternalEventRecord>> {
        let mut events = Vec::new();

        for item in self.events.iter() {
            let (_, value) = item?;
            let record: ExternalEventRecord = Self::deserialize(&value)?;
            if status.map_or(true, |s| record.status == s) {
                events.push(record);
            }
        }

        events.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(events.into_iter().skip(offset).take(limit).collect())
    }

    // ==================== Stats ====================

    async fn get_stats(&self) -> VaultDbResult<StorageStats> {
        let mut failed_events = 0u64;
        for item in self.events.iter() {
            let (_, value) = item?;
            let record: ExternalEventRecord = Self::deserialize(&value)?;
            if record.status == EventStatus::Failed {
                failed_events += 1;
            }
        }

        Ok(StorageStats {
            total_attempts: self.attempts.len() as u64,
            pending_attempts: self.pending_expiry.len() as u64,
            quota_subjects: self.quotas.len() as u64,
            total_events: self.events.len() as u64,
            failed_events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::{pending_attempt, quota_state, received_event};
    use chrono::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sled_attempt_roundtrip_and_reopen() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.insert_attempt(&pending_attempt("att_1", "user-1", now)).await.unwrap();
            store.flush().unwrap();
        }

        let store = SledStore::open(dir.path()).unwrap();
        let attempt = store.get_attempt("att_1").await.unwrap().unwrap();
        assert_eq!(attempt.revision, 1);
        let link = store.get_chain_link("id-att_1").await.unwrap().unwrap();
        assert_eq!(link.attempt_number, 1);
        assert_eq!(link.chain_root_id, "id-att_1");
    }

    #[tokio::test]
    async fn test_sled_stale_revision_conflicts() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let stored = store
            .insert_attempt(&pending_attempt("att_1", "user-1", Utc::now()))
            .await
            .unwrap();

        let mut failed = stored.clone();
        failed.status = AttemptStatus::Failed;
        store.replace_attempt(&failed, 1).await.unwrap();

        let err = store.replace_attempt(&failed, 1).await.unwrap_err();
        assert!(matches!(err, VaultDbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_sled_subject_listing_newest_first() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let now = Utc::now();

        for (i, id) in ["att_a", "att_b", "att_c"].iter().enumerate() {
            let attempt = pending_attempt(id, "user-1", now + Duration::seconds(i as i64));
            store.insert_attempt(&attempt).await.unwrap();
        }
        store.insert_attempt(&pending_attempt("att_x", "user-10", now)).await.unwrap();

        let listed = store.list_attempts_by_subject("user-1", 10, 0).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|a| a.attempt_id.as_str()).collect();
        assert_eq!(ids, vec!["att_c", "att_b", "att_a"]);

        let page = store.list_attempts_by_subject("user-1", 1, 1).await.unwrap();
        assert_eq!(page[0].attempt_id, "att_b");
    }

    #[tokio::test]
    async fn test_sled_expiry_index_follows_status() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let now = Utc::now();

        let mut first = pending_attempt("att_1", "user-1", now - Duration::hours(1));
        first.expires_at = now - Duration::minutes(10);
        let mut second = pending_attempt("att_2", "user-1", now - Duration::hours(1));
        second.expires_at = now - Duration::minutes(5);
        let first = store.insert_attempt(&first).await.unwrap();
        store.insert_attempt(&second).await.unwrap();

        let expired = store.list_expired_pending(now, 10).await.unwrap();
        assert_eq!(expired.len(), 2);
        assert_eq!(expired[0].attempt_id, "att_1");

        let mut done = first.clone();
        done.status = AttemptStatus::Expired;
        store.replace_attempt(&done, first.revision).await.unwrap();

        let expired = store.list_expired_pending(now, 10).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(store.get_stats().await.unwrap().pending_attempts, 1);
    }

    #[tokio::test]
    async fn test_sled_charge_writes_both_records() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let now = Utc::now();
        store.insert_quota_if_absent(&quota_state("user-1", 1, now)).await.unwrap();
        let stored = store.insert_attempt(&pending_attempt("att_1", "user-1", now)).await.unwrap();

        let mut success = stored.clone();
        success.status = AttemptStatus::Success;
        success.quota_charged = true;
        match store.charge_attempt(&success, 1, now).await.unwrap() {
            ChargeOutcome::Charged { attempt, quota } => {
                assert_eq!(attempt.revision, 2);
                assert_eq!(quota.used, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let other = store.insert_attempt(&pending_attempt("att_2", "user-1", now)).await.unwrap();
        let outcome = store.charge_attempt(&other, 1, now).await.unwrap();
        assert!(matches!(outcome, ChargeOutcome::Exhausted(_)));
        let untouched = store.get_attempt("att_2").await.unwrap().unwrap();
        assert_eq!(untouched.revision, 1);
    }

    #[tokio::test]
    async fn test_sled_event_dedupe_and_replace() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let record = received_event("evt_1");

        assert!(matches!(
            store.insert_event_if_absent(&record).await.unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert!(matches!(
            store.insert_event_if_absent(&record).await.unwrap(),
            InsertOutcome::Existing(_)
        ));

        let mut processed = record.clone();
        processed.mark_processed(Utc::now());
        store.replace_event(&processed, &record).await.unwrap();

        let err = store.replace_event(&processed, &record).await.unwrap_err();
        assert!(matches!(err, VaultDbError::Conflict(_)));

        let listed = store.list_events(Some(EventStatus::Processed), 10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sled_concurrent_charges_respect_limit() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        crate::storage::concurrency::charge_race(std::sync::Arc::new(store)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sled_concurrent_event_inserts_dedupe() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        crate::storage::concurrency::event_insert_race(std::sync::Arc::new(store)).await;
    }
}
