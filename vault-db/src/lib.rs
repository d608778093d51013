//! Vault Database Layer
//!
//! Storage backends and service implementations for the access ledger.
//!
//! - [`storage`]: the [`LedgerStore`] interface with memory and sled backends
//! - [`services`]: access ledger, quota manager, expiration scheduler and
//!   billing event reconciler
//! - [`config`]: TOML + environment configuration
//!
//! # Example
//!
//! ```ignore
//! use vault_db::{open_store, VaultConfig, VaultServices};
//!
//! let config = VaultConfig::load(None)?;
//! let store = open_store(&config.storage)?;
//! let services = VaultServices::new(store, &config);
//! let sweeper = services.expiration.start();
//! ```

pub mod config;
pub mod error;
pub mod services;
pub mod signature;
pub mod storage;

pub use config::{
    AssetConfig, LedgerConfig, LoggingConfig, RetryParentPolicy, StorageBackend, StorageConfig, SweepConfig,
    VaultConfig, WebhookConfig,
};
pub use error::*;
pub use services::{
    AccessLedgerService, AssetCatalog, BillingEventService, ExpirationService, ExpireOutcome, QuotaService,
    StaticAssetCatalog, SweepHandle, SweepReport, VaultServices,
};
pub use signature::SignatureVerifier;
pub use storage::{open_store, LedgerStore, MemoryStore, SledStore, StorageStats};
