//! Application state for the API server

use vault_db::{VaultServices, WebhookConfig};

/// API server state
#[derive(Clone)]
pub struct AppState {
    pub services: VaultServices,
    /// Header carrying the billing webhook signature
    pub signature_header: String,
    /// API version
    pub version: String,
}

impl AppState {
    pub fn new(services: VaultServices, webhook: &WebhookConfig) -> Self {
        Self {
            services,
            signature_header: webhook.header.to_lowercase(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            enable_cors: true,
        }
    }
}
