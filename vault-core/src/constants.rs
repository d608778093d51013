//! Ledger Constants
//!
//! Centralized constants for the access ledger. Configuration defaults live
//! here so the config layer and the services agree on the same values.
//!
//! # Categories
//!
//! - **Attempts**: attempt window and retry chain bounds
//! - **Expiration**: scheduler horizon and sweep defaults
//! - **Webhooks**: signature verification defaults
//! - **Queries**: listing limits

// ============================================================================
// Attempts
// ============================================================================

/// Time an attempt may stay pending before it expires (15 minutes)
pub const DEFAULT_ATTEMPT_TTL_SECS: u64 = 15 * 60;

/// Upper bound on a configured attempt window
pub const MAX_ATTEMPT_TTL_SECS: u64 = DEFAULT_ATTEMPT_TTL_SECS;

/// Maximum attempts in one retry chain (the original plus two retries)
pub const MAX_ATTEMPTS_PER_CHAIN: u32 = 3;

/// Placeholder recorded when a client detail cannot be determined
pub const UNKNOWN_CLIENT_VALUE: &str = "unknown";

/// Prefix of caller-facing attempt identifiers
pub const ATTEMPT_ID_PREFIX: &str = "att";

// ============================================================================
// Expiration
// ============================================================================

/// One-shot expiration timers are only armed inside this horizon (24 hours)
pub const EXPIRATION_HORIZON_SECS: u64 = 24 * 60 * 60;

/// Default interval between expiration sweeps
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default maximum attempts expired per sweep
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 500;

/// Actor recorded on transitions made by the expiration scheduler
pub const EXPIRATION_ACTOR: &str = "system:expiration";

/// Actor recorded when the billing reconciler recovers a stalled event
pub const RECONCILER_ACTOR: &str = "system:billing";

// ============================================================================
// Webhooks
// ============================================================================

/// Default header carrying the billing provider signature
pub const DEFAULT_SIGNATURE_HEADER: &str = "x-billing-signature";

/// Maximum accepted age of a signed webhook timestamp (5 minutes)
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: u64 = 5 * 60;

/// Age after which a pending event record may be claimed again
pub const DEFAULT_PENDING_GRACE_SECS: u64 = 5 * 60;

/// Upper bound on the configured pending grace period (24 hours)
pub const MAX_PENDING_GRACE_SECS: u64 = 24 * 60 * 60;

// ============================================================================
// Queries
// ============================================================================

/// Default page size for list operations
pub const DEFAULT_LIST_LIMIT: u32 = 100;

/// Hard cap on page size for list operations
pub const MAX_LIST_LIMIT: u32 = 1000;

// ============================================================================
// Storage
// ============================================================================

/// Optimistic-concurrency retries before a write conflict is surfaced
pub const MAX_CONFLICT_RETRIES: u32 = 8;
