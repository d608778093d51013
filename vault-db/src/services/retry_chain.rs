//! Retry chain resolution
//!
//! A retry names the storage id of the attempt it retries. Its number is the
//! parent's number plus one, bounded by the configured chain length.

use std::sync::Arc;
use tracing::warn;

use crate::config::RetryParentPolicy;
use crate::storage::LedgerStore;
use vault_core::error::{LedgerError, LedgerResult};
use vault_core::logging::operations;

/// Position of a new attempt in its chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPosition {
    pub attempt_number: u32,
    /// Storage id of the chain's first attempt, `None` for a fresh chain
    pub chain_root_id: Option<String>,
}

impl ChainPosition {
    fn fresh() -> Self {
        Self {
            attempt_number: 1,
            chain_root_id: None,
        }
    }
}

/// Resolves attempt numbers for new attempts
#[derive(Clone)]
pub struct RetryChainResolver {
    store: Arc<dyn LedgerStore>,
    policy: RetryParentPolicy,
    max_attempts: u32,
}

impl RetryChainResolver {
    pub fn new(store: Arc<dyn LedgerStore>, policy: RetryParentPolicy, max_attempts: u32) -> Self {
        Self {
            store,
            policy,
            max_attempts,
        }
    }

    /// Position for an attempt retrying `retry_of`
    pub async fn resolve(&self, retry_of: Option<&str>) -> LedgerResult<ChainPosition> {
        let Some(parent_id) = retry_of else {
            return Ok(ChainPosition::fresh());
        };

        let parent = match self.store.get_chain_link(parent_id).await? {
            Some(link) => link,
            None => match self.policy {
                RetryParentPolicy::Strict => {
                    return Err(LedgerError::NotFound(format!("Retried attempt {}", parent_id)));
                }
                RetryParentPolicy::Lenient => {
                    warn!(
                        retry_of = %parent_id,
                        operation = operations::RETRY_RESOLVE,
                        "Retried attempt not found, starting a new chain"
                    );
                    return Ok(ChainPosition::fresh());
                }
            },
        };

        let attempt_number = parent.attempt_number.saturating_add(1);
        if attempt_number > self.max_attempts {
            return Err(LedgerError::RetryLimitExceeded {
                attempt_number,
                max_attempts: self.max_attempts,
            });
        }

        Ok(ChainPosition {
            attempt_number,
            chain_root_id: Some(parent.chain_root_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::pending_attempt;
    use crate::storage::MemoryStore;
    use chrono::Utc;

    async fn store_with_chain(length: u32) -> Arc<dyn LedgerStore> {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for n in 1..=length {
            let mut attempt = pending_attempt(&format!("att_{}", n), "user-1", now);
            attempt.attempt_number = n;
            if n > 1 {
                attempt.retry_of = Some(format!("id-att_{}", n - 1));
                attempt.metadata.chain_root_id = Some("id-att_1".to_string());
            }
            store.insert_attempt(&attempt).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_numbers_follow_parent() {
        let store = store_with_chain(2).await;
        let resolver = RetryChainResolver::new(store, RetryParentPolicy::Lenient, 3);

        assert_eq!(resolver.resolve(None).await.unwrap(), ChainPosition::fresh());

        let position = resolver.resolve(Some("id-att_1")).await.unwrap();
        assert_eq!(position.attempt_number, 2);
        assert_eq!(position.chain_root_id.as_deref(), Some("id-att_1"));

        let position = resolver.resolve(Some("id-att_2")).await.unwrap();
        assert_eq!(position.attempt_number, 3);
        assert_eq!(position.chain_root_id.as_deref(), Some("id-att_1"));
    }

    #[tokio::test]
    async fn test_fourth_attempt_rejected() {
        let store = store_with_chain(3).await;
        let resolver = RetryChainResolver::new(store, RetryParentPolicy::Lenient, 3);

        let err = resolver.resolve(Some("id-att_3")).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::RetryLimitExceeded {
                attempt_number: 4,
                max_attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn test_missing_parent_policy() {
        let store = store_with_chain(0).await;

        let lenient = RetryChainResolver::new(store.clone(), RetryParentPolicy::Lenient, 3);
        assert_eq!(lenient.resolve(Some("id-gone")).await.unwrap().attempt_number, 1);

        let strict = RetryChainResolver::new(store, RetryParentPolicy::Strict, 3);
        let err = strict.resolve(Some("id-gone")).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }
}
