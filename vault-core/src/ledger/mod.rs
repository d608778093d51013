//! Ledger interfaces for the access vault
//!
//! The vault maintains three ledgers:
//! - Access Ledger: attempt lifecycle and the append-only transition log
//! - Quota Ledger: per-subject tier and window accounting
//! - Billing Event Ledger: exactly-once reconciliation of provider events

mod access;
mod billing;
mod quota;

pub use access::*;
pub use billing::*;
pub use quota::*;

use crate::constants::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};

/// Ledger query options
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl QueryOptions {
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: None,
        }
    }

    /// Page size clamped to the listing maximum
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT) as usize
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_limits_clamped() {
        assert_eq!(QueryOptions::default().effective_limit(), DEFAULT_LIST_LIMIT as usize);
        assert_eq!(QueryOptions::with_limit(0).effective_limit(), 1);
        assert_eq!(
            QueryOptions::with_limit(MAX_LIST_LIMIT + 1).effective_limit(),
            MAX_LIST_LIMIT as usize
        );
    }
}
