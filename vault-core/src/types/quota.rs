//! Plan tiers and per-subject quota state
//!
//! Quota is counted per window (daily or monthly). The window boundary is
//! always a UTC calendar boundary so every instance computes the same reset
//! instant.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{LedgerError, LedgerResult};

/// Subscription tier
///
/// Variant order is the access order: a subject may access any asset whose
/// required tier is less than or equal to its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Starter,
    Professional,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Starter => "starter",
            Tier::Professional => "professional",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Whether this tier grants access to assets requiring `required`
    pub fn satisfies(&self, required: Tier) -> bool {
        *self >= required
    }
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Free
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "starter" => Ok(Tier::Starter),
            "professional" | "pro" => Ok(Tier::Professional),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(LedgerError::Validation(format!("Unknown tier: {}", other))),
        }
    }
}

/// Window quota limit
///
/// Persisted as an integer where `-1` is the unlimited sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaLimit {
    Limited(u32),
    Unlimited,
}

impl QuotaLimit {
    const UNLIMITED_SENTINEL: i64 = -1;

    /// Whether one more unit fits when `used` units are already consumed
    pub fn allows(&self, used: u32) -> bool {
        match self {
            QuotaLimit::Limited(limit) => used < *limit,
            QuotaLimit::Unlimited => true,
        }
    }

    pub fn as_sentinel(&self) -> i64 {
        match self {
            QuotaLimit::Limited(limit) => i64::from(*limit),
            QuotaLimit::Unlimited => Self::UNLIMITED_SENTINEL,
        }
    }

    pub fn from_sentinel(value: i64) -> LedgerResult<Self> {
        if value == Self::UNLIMITED_SENTINEL {
            return Ok(QuotaLimit::Unlimited);
        }
        u32::try_from(value)
            .map(QuotaLimit::Limited)
            .map_err(|_| LedgerError::Validation(format!("Invalid quota limit: {}", value)))
    }
}

impl fmt::Display for QuotaLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaLimit::Limited(limit) => write!(f, "{}", limit),
            QuotaLimit::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl Serialize for QuotaLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_sentinel())
    }
}

impl<'de> Deserialize<'de> for QuotaLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        QuotaLimit::from_sentinel(value).map_err(serde::de::Error::custom)
    }
}

/// Quota accounting window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaWindow {
    Daily,
    Monthly,
}

impl QuotaWindow {
    /// First window boundary strictly after `now`
    pub fn next_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let next_day = match self {
            QuotaWindow::Daily => today.succ_opt(),
            QuotaWindow::Monthly => {
                let (year, month) = if today.month() == 12 {
                    (today.year() + 1, 1)
                } else {
                    (today.year(), today.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
            }
        };

        next_day
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or_else(|| now + Duration::days(1))
    }
}

impl Default for QuotaWindow {
    fn default() -> Self {
        QuotaWindow::Monthly
    }
}

/// Billing standing of a subject, maintained from payment events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Active,
    PastDue,
    Canceled,
}

impl Default for BillingStatus {
    fn default() -> Self {
        BillingStatus::Active
    }
}

/// Window and limit granted by a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSpec {
    pub window: QuotaWindow,
    pub limit: QuotaLimit,
}

/// Default plan for each tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanCatalog {
    pub free: PlanSpec,
    pub starter: PlanSpec,
    pub professional: PlanSpec,
    pub enterprise: PlanSpec,
}

impl PlanCatalog {
    pub fn for_tier(&self, tier: Tier) -> PlanSpec {
        match tier {
            Tier::Free => self.free,
            Tier::Starter => self.starter,
            Tier::Professional => self.professional,
            Tier::Enterprise => self.enterprise,
        }
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            free: PlanSpec {
                window: QuotaWindow::Daily,
                limit: QuotaLimit::Limited(5),
            },
            starter: PlanSpec {
                window: QuotaWindow::Monthly,
                limit: QuotaLimit::Limited(100),
            },
            professional: PlanSpec {
                window: QuotaWindow::Monthly,
                limit: QuotaLimit::Limited(1000),
            },
            enterprise: PlanSpec {
                window: QuotaWindow::Monthly,
                limit: QuotaLimit::Unlimited,
            },
        }
    }
}

/// Per-subject quota state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaState {
    pub subject_id: String,
    pub tier: Tier,
    pub window: QuotaWindow,
    pub limit: QuotaLimit,
    /// Units consumed in the current window
    pub used: u32,
    /// Units consumed over the subject's lifetime
    pub lifetime_used: u64,
    pub window_reset_at: DateTime<Utc>,
    pub billing_status: BillingStatus,
    /// Last billing event applied to this state
    pub last_event_id: Option<String>,
    /// Optimistic concurrency token, bumped by every stored write
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuotaState {
    /// Provision a subject on `tier` using the catalog defaults
    pub fn provision(subject_id: &str, tier: Tier, plan: PlanSpec, now: DateTime<Utc>) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            tier,
            window: plan.window,
            limit: plan.limit,
            used: 0,
            lifetime_used: 0,
            window_reset_at: plan.window.next_boundary(now),
            billing_status: BillingStatus::Active,
            last_event_id: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the current window has ended
    pub fn window_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_reset_at
    }

    /// Start a fresh window at the next boundary after `now`
    pub fn reset_window(&mut self, now: DateTime<Utc>) {
        self.used = 0;
        self.window_reset_at = self.window.next_boundary(now);
        self.updated_at = now;
    }

    pub fn has_capacity(&self) -> bool {
        self.limit.allows(self.used)
    }

    /// Remaining units in the window, `None` when unlimited
    pub fn remaining(&self) -> Option<u32> {
        match self.limit {
            QuotaLimit::Limited(limit) => Some(limit.saturating_sub(self.used)),
            QuotaLimit::Unlimited => None,
        }
    }

    pub fn exceeded_error(&self) -> LedgerError {
        LedgerError::QuotaExceeded {
            used: self.used,
            limit: self.limit,
            window_reset_at: self.window_reset_at,
        }
    }

    /// Consume one unit, rolling the window first if it has elapsed
    pub fn consume(&mut self, now: DateTime<Utc>) -> LedgerResult<()> {
        if self.window_elapsed(now) {
            self.reset_window(now);
        }
        if !self.has_capacity() {
            return Err(self.exceeded_error());
        }
        self.used += 1;
        self.lifetime_used += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Move the subject onto a new plan
    ///
    /// Usage in the current window carries over, capped at a tighter limit
    /// so `used` never exceeds `limit`.
    pub fn apply_plan(&mut self, tier: Tier, plan: PlanSpec, now: DateTime<Utc>) {
        let window_changed = self.window != plan.window;
        self.tier = tier;
        self.limit = plan.limit;
        self.window = plan.window;
        if let QuotaLimit::Limited(limit) = plan.limit {
            self.used = self.used.min(limit);
        }
        if window_changed {
            self.window_reset_at = plan.window.next_boundary(now);
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_tier_order() {
        assert!(Tier::Free < Tier::Starter);
        assert!(Tier::Starter < Tier::Professional);
        assert!(Tier::Professional < Tier::Enterprise);
        assert!(!Tier::Free.satisfies(Tier::Starter));
        assert!(Tier::Enterprise.satisfies(Tier::Free));
    }

    #[test]
    fn test_quota_limit_sentinel_serialization() {
        assert_eq!(serde_json::to_string(&QuotaLimit::Unlimited).unwrap(), "-1");
        assert_eq!(serde_json::to_string(&QuotaLimit::Limited(7)).unwrap(), "7");
        let parsed: QuotaLimit = serde_json::from_str("-1").unwrap();
        assert_eq!(parsed, QuotaLimit::Unlimited);
        assert!(serde_json::from_str::<QuotaLimit>("-5").is_err());
    }

    #[test]
    fn test_window_boundaries() {
        let now = at(2024, 12, 31, 15);
        assert_eq!(QuotaWindow::Daily.next_boundary(now), at(2025, 1, 1, 0));
        assert_eq!(QuotaWindow::Monthly.next_boundary(now), at(2025, 1, 1, 0));

        let mid_month = at(2024, 2, 10, 8);
        assert_eq!(QuotaWindow::Monthly.next_boundary(mid_month), at(2024, 3, 1, 0));
    }

    #[test]
    fn test_consume_respects_limit() {
        let now = at(2024, 5, 1, 12);
        let plan = PlanSpec {
            window: QuotaWindow::Daily,
            limit: QuotaLimit::Limited(2),
        };
        let mut state = QuotaState::provision("user-1", Tier::Free, plan, now);

        state.consume(now).unwrap();
        state.consume(now).unwrap();
        let err = state.consume(now).unwrap_err();
        assert!(matches!(err, LedgerError::QuotaExceeded { used: 2, .. }));
        assert_eq!(state.lifetime_used, 2);
    }

    #[test]
    fn test_consume_rolls_elapsed_window() {
        let now = at(2024, 5, 1, 12);
        let plan = PlanSpec {
            window: QuotaWindow::Daily,
            limit: QuotaLimit::Limited(1),
        };
        let mut state = QuotaState::provision("user-1", Tier::Free, plan, now);
        state.consume(now).unwrap();

        let tomorrow = at(2024, 5, 2, 1);
        state.consume(tomorrow).unwrap();
        assert_eq!(state.used, 1);
        assert_eq!(state.lifetime_used, 2);
        assert_eq!(state.window_reset_at, at(2024, 5, 3, 0));
    }

    #[test]
    fn test_downgrade_caps_usage_at_new_limit() {
        let now = at(2024, 5, 1, 12);
        let catalog = PlanCatalog::default();
        let mut state = QuotaState::provision("user-1", Tier::Professional, catalog.professional, now);
        state.used = 40;

        state.apply_plan(Tier::Free, catalog.free, now);
        assert_eq!(state.limit, QuotaLimit::Limited(5));
        assert_eq!(state.used, 5);
        assert!(!state.has_capacity());
        assert_eq!(state.window_reset_at, at(2024, 5, 2, 0));

        state.apply_plan(Tier::Enterprise, catalog.enterprise, now);
        assert_eq!(state.used, 5);
        assert!(state.has_capacity());
    }

    #[test]
    fn test_unlimited_never_exhausts() {
        let now = at(2024, 5, 1, 12);
        let plan = PlanCatalog::default().for_tier(Tier::Enterprise);
        let mut state = QuotaState::provision("corp", Tier::Enterprise, plan, now);
        for _ in 0..1000 {
            state.consume(now).unwrap();
        }
        assert_eq!(state.remaining(), None);
    }
}
