//! Asset catalog
//!
//! Asset content lives outside the vault; the ledger only needs to know the
//! tier an asset requires.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::config::AssetConfig;
use vault_core::error::LedgerResult;
use vault_core::types::Tier;

/// Source of the tier each asset requires
#[async_trait]
pub trait AssetCatalog: Send + Sync {
    async fn required_tier(&self, asset_id: &str) -> LedgerResult<Tier>;
}

/// Catalog backed by configuration
#[derive(Debug, Clone)]
pub struct StaticAssetCatalog {
    default_tier: Tier,
    required: BTreeMap<String, Tier>,
}

impl StaticAssetCatalog {
    pub fn new(default_tier: Tier) -> Self {
        Self {
            default_tier,
            required: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &AssetConfig) -> Self {
        Self {
            default_tier: config.default_tier,
            required: config.required.clone(),
        }
    }

    pub fn with_asset(mut self, asset_id: impl Into<String>, tier: Tier) -> Self {
        self.required.insert(asset_id.into(), tier);
        self
    }
}

#[async_trait]
impl AssetCatalog for StaticAssetCatalog {
    async fn required_tier(&self, asset_id: &str) -> LedgerResult<Tier> {
        Ok(self.required.get(asset_id).copied().unwrap_or(self.default_tier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listed_and_default_tiers() {
        let catalog = StaticAssetCatalog::new(Tier::Free).with_asset("tpl-1", Tier::Starter);
        assert_eq!(catalog.required_tier("tpl-1").await.unwrap(), Tier::Starter);
        assert_eq!(catalog.required_tier("tpl-2").await.unwrap(), Tier::Free);
    }
}
