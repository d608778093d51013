//! Vault database error types

use thiserror::Error;
use vault_core::LedgerError;

#[derive(Error, Debug)]
pub enum VaultDbError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    #[error("Entity not found: {0}")]
    NotFound(String),
}

impl From<sled::Error> for VaultDbError {
    fn from(e: sled::Error) -> Self {
        VaultDbError::Storage(e.to_string())
    }
}

impl From<VaultDbError> for LedgerError {
    fn from(e: VaultDbError) -> Self {
        match e {
            VaultDbError::Conflict(msg) => LedgerError::Conflict(msg),
            VaultDbError::AlreadyExists(msg) => LedgerError::AlreadyExists(msg),
            VaultDbError::NotFound(msg) => LedgerError::NotFound(msg),
            VaultDbError::Config(msg) => LedgerError::Validation(msg),
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

pub type VaultDbResult<T> = Result<T, VaultDbError>;
