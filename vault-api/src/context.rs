//! Caller context from request headers

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use std::net::SocketAddr;
use vault_core::types::{ClientContext, RequestContext};

pub const ACTOR_HEADER: &str = "x-actor-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Network details of the caller
pub fn client_context(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> ClientContext {
    ClientContext {
        forwarded_for: header(headers, "x-forwarded-for"),
        real_ip: header(headers, "x-real-ip"),
        edge_connecting_ip: header(headers, "cf-connecting-ip"),
        remote_addr: peer.map(|ConnectInfo(addr)| addr.ip().to_string()),
        user_agent: header(headers, "user-agent"),
    }
}

/// Build the request context; the actor falls back to `default_actor`
pub fn request_context(
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
    default_actor: &str,
) -> RequestContext {
    let actor = header(headers, ACTOR_HEADER).unwrap_or_else(|| default_actor.to_string());
    let ctx = RequestContext::new(actor, client_context(headers, peer));
    match header(headers, REQUEST_ID_HEADER) {
        Some(id) => ctx.with_request_id(id),
        None => ctx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_context_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.5, 10.0.0.1"));
        headers.insert("user-agent", HeaderValue::from_static("vault-test/1.0"));
        headers.insert(ACTOR_HEADER, HeaderValue::from_static("admin-7"));
        let peer = ConnectInfo("10.0.0.1:5555".parse::<SocketAddr>().unwrap());

        let ctx = request_context(&headers, Some(&peer), "anonymous");
        assert_eq!(ctx.actor, "admin-7");
        assert_eq!(ctx.client.resolve_ip(), "203.0.113.5");
        assert_eq!(ctx.client.source_ip(), "10.0.0.1");
        assert_eq!(ctx.client.user_agent_or_unknown(), "vault-test/1.0");
        assert_eq!(ctx.request_id, None);
    }

    #[test]
    fn test_defaults_without_headers() {
        let ctx = request_context(&HeaderMap::new(), None, "user-1");
        assert_eq!(ctx.actor, "user-1");
        assert_eq!(ctx.client.resolve_ip(), "unknown");
    }
}
