//! Webhook signature verification
//!
//! The billing provider signs each delivery with a header of the form
//! `t=<unix seconds>,v1=<hex mac>[,v1=<hex mac>...]`. The MAC is
//! HMAC-SHA256 over `"{t}.{raw body}"` keyed with the shared secret. More
//! than one `v1` entry may be present while the provider rotates secrets.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use vault_core::error::{LedgerError, LedgerResult};

type HmacSha256 = Hmac<Sha256>;

/// Verifies signed webhook deliveries
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn reject(reason: impl Into<String>) -> LedgerError {
    LedgerError::SignatureVerification(reason.into())
}

fn parse_header(header: &str) -> LedgerResult<ParsedHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key.trim() {
            "t" => {
                if timestamp.is_some() {
                    return Err(reject("duplicate timestamp"));
                }
                let parsed = value.trim().parse::<i64>().map_err(|_| reject("malformed timestamp"))?;
                timestamp = Some(parsed);
            }
            "v1" => {
                // Undecodable entries never match, so they are skipped
                if let Ok(sig) = hex::decode(value.trim()) {
                    signatures.push(sig);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| reject("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(reject("no v1 signature"));
    }
    Ok(ParsedHeader { timestamp, signatures })
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            tolerance_secs: i64::try_from(tolerance_secs).unwrap_or(i64::MAX),
        }
    }

    fn mac(&self, timestamp: i64, body: &[u8]) -> LedgerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| LedgerError::Validation(format!("invalid webhook secret: {}", e)))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }

    /// Produce a header value for `body` signed at `timestamp`
    pub fn sign(&self, body: &[u8], timestamp: i64) -> LedgerResult<String> {
        let tag = self.mac(timestamp, body)?.finalize().into_bytes();
        Ok(format!("t={},v1={}", timestamp, hex::encode(tag)))
    }

    /// Check a delivery's signature header against its raw body
    pub fn verify(&self, header: Option<&str>, body: &[u8], now: DateTime<Utc>) -> LedgerResult<()> {
        let header = header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| reject("missing signature header"))?;
        let parsed = parse_header(header)?;

        let age = now.timestamp().saturating_sub(parsed.timestamp);
        if age.abs() > self.tolerance_secs {
            return Err(reject("timestamp outside tolerance"));
        }

        let mac = self.mac(parsed.timestamp, body)?;
        let matched = parsed
            .signatures
            .iter()
            .any(|sig| mac.clone().verify_slice(sig).is_ok());
        if !matched {
            return Err(reject("no matching signature"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"id":"evt_1","type":"invoice.payment_failed","data":{}}"#;

    #[test]
    fn test_valid_signature_accepted() {
        let verifier = SignatureVerifier::new("secret", 300);
        let now = Utc::now();
        let header = verifier.sign(BODY, now.timestamp()).unwrap();
        verifier.verify(Some(&header), BODY, now).unwrap();
    }

    #[test]
    fn test_tampered_body_rejected() {
        let verifier = SignatureVerifier::new("secret", 300);
        let now = Utc::now();
        let header = verifier.sign(BODY, now.timestamp()).unwrap();
        let err = verifier.verify(Some(&header), b"{}", now).unwrap_err();
        assert!(matches!(err, LedgerError::SignatureVerification(_)));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let verifier = SignatureVerifier::new("secret", 300);
        let now = Utc::now();
        let header = verifier.sign(BODY, now.timestamp() - 301).unwrap();
        assert!(verifier.verify(Some(&header), BODY, now).is_err());
    }

    #[test]
    fn test_rotated_secret_accepted() {
        let old = SignatureVerifier::new("old-secret", 300);
        let current = SignatureVerifier::new("secret", 300);
        let now = Utc::now();
        let t = now.timestamp();
        let stale = old.sign(BODY, t).unwrap();
        let fresh = current.sign(BODY, t).unwrap();
        let fresh_sig = fresh.split_once("v1=").unwrap().1;
        let header = format!("{},v1={}", stale, fresh_sig);
        current.verify(Some(&header), BODY, now).unwrap();
    }

    #[test]
    fn test_malformed_headers_rejected() {
        let verifier = SignatureVerifier::new("secret", 300);
        let now = Utc::now();
        for header in [None, Some(""), Some("v1=abcd"), Some("t=abc,v1=00"), Some("t=1")] {
            assert!(verifier.verify(header, BODY, now).is_err(), "{:?}", header);
        }
    }
}
