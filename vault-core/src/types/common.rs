//! Common types used across the ledger
//!
//! Every ledger and quota operation receives an explicit [`RequestContext`]
//! describing who is acting and where the request came from.

use serde::{Deserialize, Serialize};

use crate::constants::UNKNOWN_CLIENT_VALUE;

/// Network and agent details of the caller, as seen at the edge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    /// Raw `X-Forwarded-For` header value
    pub forwarded_for: Option<String>,
    /// Raw `X-Real-IP` header value
    pub real_ip: Option<String>,
    /// Edge proxy connecting-ip header value (`CF-Connecting-IP`)
    pub edge_connecting_ip: Option<String>,
    /// Address of the TCP peer
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ClientContext {
    /// Best-effort client address
    ///
    /// Fallback order: first forwarded-for hop, real-ip, edge connecting-ip,
    /// raw connection address, then `"unknown"`.
    pub fn resolve_ip(&self) -> String {
        let forwarded = non_empty(&self.forwarded_for)
            .and_then(|v| v.split(',').map(str::trim).find(|hop| !hop.is_empty()));

        forwarded
            .or_else(|| non_empty(&self.real_ip))
            .or_else(|| non_empty(&self.edge_connecting_ip))
            .or_else(|| non_empty(&self.remote_addr))
            .unwrap_or(UNKNOWN_CLIENT_VALUE)
            .to_string()
    }

    /// Address of the directly connected peer
    pub fn source_ip(&self) -> String {
        non_empty(&self.remote_addr)
            .unwrap_or(UNKNOWN_CLIENT_VALUE)
            .to_string()
    }

    pub fn user_agent_or_unknown(&self) -> String {
        non_empty(&self.user_agent)
            .unwrap_or(UNKNOWN_CLIENT_VALUE)
            .to_string()
    }
}

/// Explicit per-request context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Correlation id for logs
    pub request_id: Option<String>,
    /// Who performs the operation; recorded in the transition log
    pub actor: String,
    pub client: ClientContext,
}

impl RequestContext {
    pub fn new(actor: impl Into<String>, client: ClientContext) -> Self {
        Self {
            request_id: None,
            actor: actor.into(),
            client,
        }
    }

    /// Context for background jobs with no client
    pub fn system(actor: impl Into<String>) -> Self {
        Self::new(actor, ClientContext::default())
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_fallback_order() {
        let mut client = ClientContext {
            forwarded_for: Some(" 203.0.113.9, 10.0.0.2".to_string()),
            real_ip: Some("198.51.100.4".to_string()),
            edge_connecting_ip: Some("192.0.2.1".to_string()),
            remote_addr: Some("10.0.0.1".to_string()),
            user_agent: None,
        };
        assert_eq!(client.resolve_ip(), "203.0.113.9");

        client.forwarded_for = Some("".to_string());
        assert_eq!(client.resolve_ip(), "198.51.100.4");

        client.real_ip = None;
        assert_eq!(client.resolve_ip(), "192.0.2.1");

        client.edge_connecting_ip = None;
        assert_eq!(client.resolve_ip(), "10.0.0.1");
        assert_eq!(client.source_ip(), "10.0.0.1");

        client.remote_addr = None;
        assert_eq!(client.resolve_ip(), "unknown");
        assert_eq!(client.source_ip(), "unknown");
        assert_eq!(client.user_agent_or_unknown(), "unknown");
    }
}
