//! Subscription tiers and their default limits.
//!
//! The catalog is a static table keyed by tier and scope class. Rates are admissions per
//! 60 seconds; quotas are per day. Classes without a row fall back to
//! [`DEFAULT_RATE`] per [`DEFAULT_WINDOW`] and no quota.

use crate::error::ConfigError;
use crate::scope::ScopeClass;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Process-wide default admissions per window.
pub const DEFAULT_RATE: u32 = 60;
/// Process-wide default sliding window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Default quota bucket size (one day).
pub const DEFAULT_QUOTA_WINDOW: Duration = Duration::from_secs(86_400);

/// Sliding-window limit: at most `rate` admissions in any trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitConfig {
    pub rate: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    /// Create a config with validation.
    pub fn new(rate: u32, window: Duration) -> Result<Self, ConfigError> {
        if rate == 0 {
            return Err(ConfigError::InvalidLimit { field: "rate", provided: 0 });
        }
        if window.is_zero() {
            return Err(ConfigError::InvalidLimit { field: "window", provided: 0 });
        }
        Ok(Self { rate, window })
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { rate: DEFAULT_RATE, window: DEFAULT_WINDOW }
    }
}

/// Fixed-bucket budget. `quota: None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuotaConfig {
    pub quota: Option<u64>,
    pub window: Duration,
}

impl QuotaConfig {
    /// Create a config with validation.
    pub fn new(quota: Option<u64>, window: Duration) -> Result<Self, ConfigError> {
        if quota == Some(0) {
            return Err(ConfigError::InvalidLimit { field: "quota", provided: 0 });
        }
        if window.is_zero() {
            return Err(ConfigError::InvalidLimit { field: "quota window", provided: 0 });
        }
        Ok(Self { quota, window })
    }

    /// No budget at all.
    pub fn unlimited() -> Self {
        Self { quota: None, window: DEFAULT_QUOTA_WINDOW }
    }

    /// A daily budget of `quota`.
    pub fn daily(quota: u64) -> Self {
        Self { quota: Some(quota), window: DEFAULT_QUOTA_WINDOW }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Rate limit and quota for one scope class; swapped as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScopeLimits {
    pub rate: RateLimitConfig,
    pub quota: QuotaConfig,
}

/// Subscription level selecting a catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Tier {
    #[default]
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Basic, Tier::Pro, Tier::Enterprise];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Parse `label`, falling back to [`Tier::Free`] when it is not a known tier.
    pub fn from_label_or_free(label: &str) -> Tier {
        label.parse().unwrap_or_else(|err: ConfigError| {
            tracing::warn!(target: "tollgate::tier", label, error = %err, "unknown tier; using free");
            Tier::Free
        })
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "basic" => Ok(Tier::Basic),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            _ => Err(ConfigError::UnknownTier(s.to_string())),
        }
    }
}

fn catalog_rate(tier: Tier, class: ScopeClass) -> Option<u32> {
    use ScopeClass::*;
    // [api, add, get, update, delete, search, webhook]
    let row: [u32; 7] = match tier {
        Tier::Free => [60, 30, 120, 30, 30, 60, 10],
        Tier::Basic => [120, 60, 240, 60, 60, 120, 30],
        Tier::Pro => [300, 150, 600, 150, 150, 300, 100],
        Tier::Enterprise => [1000, 500, 2000, 500, 500, 1000, 500],
    };
    let idx = match class {
        Api => 0,
        MemoryAdd => 1,
        MemoryGet => 2,
        MemoryUpdate => 3,
        MemoryDelete => 4,
        MemorySearch => 5,
        Webhook => 6,
        User | Project => return None,
    };
    Some(row[idx])
}

fn catalog_quota(tier: Tier, class: ScopeClass) -> Option<u64> {
    use ScopeClass::*;
    // [add, update, delete, search]
    let row: [u64; 4] = match tier {
        Tier::Free => [1_000, 1_000, 1_000, 10_000],
        Tier::Basic => [10_000, 10_000, 10_000, 100_000],
        Tier::Pro => [100_000, 100_000, 100_000, 1_000_000],
        Tier::Enterprise => return None,
    };
    match class {
        MemoryAdd => Some(row[0]),
        MemoryUpdate => Some(row[1]),
        MemoryDelete => Some(row[2]),
        MemorySearch => Some(row[3]),
        _ => None,
    }
}

/// Default rate limit for `scope_class` (a class template) under `tier`.
pub fn limits_for(tier: Tier, scope_class: &str) -> RateLimitConfig {
    ScopeClass::from_template(scope_class)
        .and_then(|class| catalog_rate(tier, class))
        .map(|rate| RateLimitConfig { rate, window: DEFAULT_WINDOW })
        .unwrap_or_default()
}

/// Default quota for `scope_class` under `tier`; `None` when the class is unmetered.
pub fn quota_for(tier: Tier, scope_class: &str) -> Option<QuotaConfig> {
    ScopeClass::from_template(scope_class)
        .and_then(|class| catalog_quota(tier, class))
        .map(QuotaConfig::daily)
}

/// Both halves of the catalog row.
pub fn limits(tier: Tier, scope_class: &str) -> ScopeLimits {
    ScopeLimits {
        rate: limits_for(tier, scope_class),
        quota: quota_for(tier, scope_class).unwrap_or_default(),
    }
}
