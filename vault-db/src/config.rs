//! Vault configuration
//!
//! Loaded from an optional TOML file and then overridden by environment
//! variables with the `VAULT_` prefix. `VaultConfig::default()` is a working
//! development configuration with in-memory storage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{VaultDbError, VaultDbResult};
use vault_core::constants::{
    DEFAULT_ATTEMPT_TTL_SECS, DEFAULT_PENDING_GRACE_SECS, DEFAULT_SIGNATURE_HEADER,
    DEFAULT_SIGNATURE_TOLERANCE_SECS, DEFAULT_SWEEP_BATCH_SIZE, DEFAULT_SWEEP_INTERVAL_SECS,
    EXPIRATION_HORIZON_SECS, MAX_ATTEMPTS_PER_CHAIN, MAX_ATTEMPT_TTL_SECS, MAX_PENDING_GRACE_SECS,
};
use vault_core::logging::LogLevel;
use vault_core::types::{PlanCatalog, Tier};

/// What to do when a retry references an attempt that does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryParentPolicy {
    /// Treat the attempt as the first of a new chain and log a warning
    Lenient,
    /// Reject the request with `NotFound`
    Strict,
}

impl Default for RetryParentPolicy {
    fn default() -> Self {
        Self::Lenient
    }
}

impl RetryParentPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "lenient" => Some(Self::Lenient),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sled,
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::Memory
    }
}

impl StorageBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Some(Self::Memory),
            "sled" => Some(Self::Sled),
            _ => None,
        }
    }
}

/// Attempt lifecycle settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Time a new attempt stays pending before it expires
    pub attempt_ttl_secs: u64,
    /// Maximum attempts in one retry chain
    pub max_attempts: u32,
    /// One-shot expiration timers are armed only inside this horizon
    pub expiration_horizon_secs: u64,
    pub retry_parent_policy: RetryParentPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            attempt_ttl_secs: DEFAULT_ATTEMPT_TTL_SECS,
            max_attempts: MAX_ATTEMPTS_PER_CHAIN,
            expiration_horizon_secs: EXPIRATION_HORIZON_SECS,
            retry_parent_policy: RetryParentPolicy::default(),
        }
    }
}

impl LedgerConfig {
    pub fn attempt_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.attempt_ttl_secs as i64)
    }

    pub fn expiration_horizon(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expiration_horizon_secs as i64)
    }
}

/// Expiration sweep settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Maximum attempts expired per sweep
    pub batch_size: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Billing webhook settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared signing secret
    pub secret: String,
    /// Maximum age of a signed timestamp
    pub tolerance_secs: u64,
    /// Header carrying the signature
    pub header: String,
    /// A pending record older than this may be claimed again
    pub pending_grace_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: "dev-webhook-secret".to_string(),
            tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
            header: DEFAULT_SIGNATURE_HEADER.to_string(),
            pending_grace_secs: DEFAULT_PENDING_GRACE_SECS,
        }
    }
}

impl WebhookConfig {
    pub fn pending_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pending_grace_secs as i64)
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &"<redacted>")
            .field("tolerance_secs", &self.tolerance_secs)
            .field("header", &self.header)
            .field("pending_grace_secs", &self.pending_grace_secs)
            .finish()
    }
}

/// Storage settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Data directory for the sled backend
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: PathBuf::from("./vault_data"),
        }
    }
}

/// Required tier per asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Tier required by assets not listed in `required`
    pub default_tier: Tier,
    pub required: BTreeMap<String, Tier>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            default_tier: Tier::Free,
            required: BTreeMap::new(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: LogLevel,
}

/// Vault configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub ledger: LedgerConfig,
    pub sweep: SweepConfig,
    pub webhook: WebhookConfig,
    pub storage: StorageConfig,
    pub plans: PlanCatalog,
    pub assets: AssetConfig,
    pub logging: LoggingConfig,
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> VaultDbResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| VaultDbError::Config(format!("Invalid value for {}: {}", name, value)))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

impl VaultConfig {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> VaultDbResult<Self> {
        toml::from_str(s).map_err(|e| VaultDbError::Config(format!("Invalid config file: {}", e)))
    }

    /// Load the file at `path` (if any), then apply `VAULT_*` overrides
    pub fn load(path: Option<&Path>) -> VaultDbResult<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    VaultDbError::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with `VAULT_*` overrides
    pub fn from_env() -> VaultDbResult<Self> {
        Self::load(None)
    }

    pub fn apply_env(&mut self) -> VaultDbResult<()> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from a variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> VaultDbResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VAULT_ATTEMPT_TTL_SECS") {
            self.ledger.attempt_ttl_secs = parse_var("VAULT_ATTEMPT_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("VAULT_MAX_ATTEMPTS") {
            self.ledger.max_attempts = parse_var("VAULT_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("VAULT_EXPIRATION_HORIZON_SECS") {
            self.ledger.expiration_horizon_secs = parse_var("VAULT_EXPIRATION_HORIZON_SECS", &v)?;
        }
        if let Some(v) = lookup("VAULT_RETRY_PARENT_POLICY") {
            self.ledger.retry_parent_policy = RetryParentPolicy::parse(&v).ok_or_else(|| {
                VaultDbError::Config(format!("Invalid value for VAULT_RETRY_PARENT_POLICY: {}", v))
            })?;
        }
        if let Some(v) = lookup("VAULT_SWEEP_ENABLED") {
            self.sweep.enabled = parse_bool(&v);
        }
        if let Some(v) = lookup("VAULT_SWEEP_INTERVAL_SECS") {
            self.sweep.interval_secs = parse_var("VAULT_SWEEP_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("VAULT_SWEEP_BATCH_SIZE") {
            self.sweep.batch_size = parse_var("VAULT_SWEEP_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("VAULT_WEBHOOK_SECRET") {
            self.webhook.secret = v;
        }
        if let Some(v) = lookup("VAULT_WEBHOOK_TOLERANCE_SECS") {
            self.webhook.tolerance_secs = parse_var("VAULT_WEBHOOK_TOLERANCE_SECS", &v)?;
        }
        if let Some(v) = lookup("VAULT_WEBHOOK_PENDING_GRACE_SECS") {
            self.webhook.pending_grace_secs = parse_var("VAULT_WEBHOOK_PENDING_GRACE_SECS", &v)?;
        }
        if let Some(v) = lookup("VAULT_WEBHOOK_HEADER") {
            self.webhook.header = v.trim().to_lowercase();
        }
        if let Some(v) = lookup("VAULT_STORAGE_BACKEND") {
            self.storage.backend = StorageBackend::parse(&v).ok_or_else(|| {
                VaultDbError::Config(format!("Invalid value for VAULT_STORAGE_BACKEND: {}", v))
            })?;
        }
        if let Some(v) = lookup("VAULT_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("VAULT_DEFAULT_ASSET_TIER") {
            self.assets.default_tier =
                parse_var::<Tier>("VAULT_DEFAULT_ASSET_TIER", &v)?;
        }
        if let Some(v) = lookup("VAULT_LOG_LEVEL") {
            self.logging.level = LogLevel::parse(&v)
                .ok_or_else(|| VaultDbError::Config(format!("Invalid value for VAULT_LOG_LEVEL: {}", v)))?;
        }
        Ok(())
    }

    /// Reject configurations the services cannot run with
    pub fn validate(&self) -> VaultDbResult<()> {
        if self.ledger.attempt_ttl_secs == 0 || self.ledger.attempt_ttl_secs > MAX_ATTEMPT_TTL_SECS {
            return Err(VaultDbError::Config(format!(
                "ledger.attempt_ttl_secs must be between 1 and {}",
                MAX_ATTEMPT_TTL_SECS
            )));
        }
        if self.ledger.max_attempts == 0 || self.ledger.max_attempts > MAX_ATTEMPTS_PER_CHAIN {
            return Err(VaultDbError::Config(format!(
                "ledger.max_attempts must be between 1 and {}",
                MAX_ATTEMPTS_PER_CHAIN
            )));
        }
        if self.ledger.expiration_horizon_secs > EXPIRATION_HORIZON_SECS {
            return Err(VaultDbError::Config(format!(
                "ledger.expiration_horizon_secs must not exceed {}",
                EXPIRATION_HORIZON_SECS
            )));
        }
        if self.sweep.interval_secs == 0 {
            return Err(VaultDbError::Config("sweep.interval_secs must be positive".to_string()));
        }
        if self.sweep.batch_size == 0 {
            return Err(VaultDbError::Config("sweep.batch_size must be positive".to_string()));
        }
        if self.webhook.secret.is_empty() {
            return Err(VaultDbError::Config("webhook.secret must not be empty".to_string()));
        }
        if self.webhook.header.trim().is_empty() {
            return Err(VaultDbError::Config("webhook.header must not be empty".to_string()));
        }
        if self.webhook.pending_grace_secs == 0 || self.webhook.pending_grace_secs > MAX_PENDING_GRACE_SECS {
            return Err(VaultDbError::Config(format!(
                "webhook.pending_grace_secs must be between 1 and {}",
                MAX_PENDING_GRACE_SECS
            )));
        }
        Ok(())
    }

    /// Render as TOML with the webhook secret masked
    pub fn to_redacted_toml(&self) -> VaultDbResult<String> {
        let mut shown = self.clone();
        shown.webhook.secret = "<redacted>".to_string();
        toml::to_string_pretty(&shown).map_err(|e| VaultDbError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vault_core::types::{QuotaLimit, QuotaWindow};

    #[test]
    fn test_defaults_are_valid() {
        let config = VaultConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ledger.attempt_ttl_secs, 900);
        assert_eq!(config.ledger.max_attempts, 3);
        assert_eq!(config.ledger.retry_parent_policy, RetryParentPolicy::Lenient);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.webhook.header, "x-billing-signature");
    }

    #[test]
    fn test_toml_sections() {
        let config = VaultConfig::from_toml_str(
            r#"
            [ledger]
            retry_parent_policy = "strict"

            [storage]
            backend = "sled"
            data_dir = "/var/lib/vault"

            [plans.starter]
            window = "daily"
            limit = 20

            [plans.enterprise]
            window = "monthly"
            limit = -1

            [assets]
            default_tier = "free"

            [assets.required]
            tpl-1 = "starter"
            "#,
        )
        .unwrap();

        assert_eq!(config.ledger.retry_parent_policy, RetryParentPolicy::Strict);
        assert_eq!(config.ledger.attempt_ttl_secs, 900);
        assert_eq!(config.storage.backend, StorageBackend::Sled);
        assert_eq!(config.plans.starter.window, QuotaWindow::Daily);
        assert_eq!(config.plans.starter.limit, QuotaLimit::Limited(20));
        assert_eq!(config.plans.enterprise.limit, QuotaLimit::Unlimited);
        assert_eq!(config.assets.required.get("tpl-1"), Some(&Tier::Starter));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VAULT_SWEEP_INTERVAL_SECS", "5"),
            ("VAULT_RETRY_PARENT_POLICY", "STRICT"),
            ("VAULT_SWEEP_ENABLED", "false"),
            ("VAULT_DEFAULT_ASSET_TIER", "pro"),
        ]
        .into_iter()
        .collect();

        let mut config = VaultConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.sweep.interval_secs, 5);
        assert!(!config.sweep.enabled);
        assert_eq!(config.ledger.retry_parent_policy, RetryParentPolicy::Strict);
        assert_eq!(config.assets.default_tier, Tier::Professional);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = VaultConfig::default();
        let err = config
            .apply_overrides(|name| (name == "VAULT_MAX_ATTEMPTS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, VaultDbError::Config(_)));
    }

    #[test]
    fn test_hard_limits_rejected_above_caps() {
        let vars: HashMap<&str, &str> = [("VAULT_MAX_ATTEMPTS", "10")].into_iter().collect();
        let mut config = VaultConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert!(matches!(config.validate(), Err(VaultDbError::Config(_))));

        let mut config = VaultConfig::default();
        config.ledger.attempt_ttl_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(VaultDbError::Config(_))));

        let mut config = VaultConfig::default();
        config.ledger.expiration_horizon_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = VaultConfig::default();
        config.webhook.pending_grace_secs = 0;
        assert!(config.validate().is_err());

        let mut config = VaultConfig::default();
        config.ledger.attempt_ttl_secs = 60;
        config.ledger.max_attempts = 2;
        config.validate().unwrap();
        assert_eq!(config.ledger.attempt_ttl(), chrono::Duration::minutes(1));
    }

    #[test]
    fn test_redacted_render_hides_secret() {
        let rendered = VaultConfig::default().to_redacted_toml().unwrap();
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("dev-webhook-secret"));
    }
}
