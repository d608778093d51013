//! Ledger service implementations
//!
//! Concrete implementations of the `vault_core::ledger` traits on top of a
//! [`LedgerStore`], plus the wiring that builds them from configuration.

pub mod access_ledger_service;
pub mod asset_catalog;
pub mod billing_event_service;
pub mod expiration_service;
pub mod quota_service;
pub mod retry_chain;

pub use access_ledger_service::AccessLedgerService;
pub use asset_catalog::{AssetCatalog, StaticAssetCatalog};
pub use billing_event_service::BillingEventService;
pub use expiration_service::{ExpirationService, ExpireOutcome, SweepHandle, SweepReport};
pub use quota_service::QuotaService;
pub use retry_chain::{ChainPosition, RetryChainResolver};

use std::sync::Arc;

use crate::config::VaultConfig;
use crate::signature::SignatureVerifier;
use crate::storage::LedgerStore;

/// All services sharing one store
#[derive(Clone)]
pub struct VaultServices {
    pub store: Arc<dyn LedgerStore>,
    pub access: Arc<AccessLedgerService>,
    pub quota: Arc<QuotaService>,
    pub billing: Arc<BillingEventService>,
    pub expiration: ExpirationService,
}

impl VaultServices {
    pub fn new(store: Arc<dyn LedgerStore>, config: &VaultConfig) -> Self {
        let catalog: Arc<dyn AssetCatalog> = Arc::new(StaticAssetCatalog::from_config(&config.assets));
        Self::with_catalog(store, catalog, config)
    }

    /// Build with a custom asset catalog
    pub fn with_catalog(store: Arc<dyn LedgerStore>, catalog: Arc<dyn AssetCatalog>, config: &VaultConfig) -> Self {
        let quota = Arc::new(QuotaService::new(store.clone(), config.plans.clone()));
        let expiration = ExpirationService::new(
            store.clone(),
            config.ledger.expiration_horizon(),
            config.sweep.clone(),
        );
        let access = Arc::new(AccessLedgerService::new(
            store.clone(),
            quota.clone(),
            catalog,
            expiration.clone(),
            config.ledger.clone(),
        ));
        let verifier = SignatureVerifier::new(&config.webhook.secret, config.webhook.tolerance_secs);
        let billing = Arc::new(
            BillingEventService::new(store.clone(), quota.clone(), verifier)
                .with_pending_grace(config.webhook.pending_grace()),
        );

        Self {
            store,
            access,
            quota,
            billing,
            expiration,
        }
    }
}
