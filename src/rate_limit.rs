//! Admission control: sliding-window rate limits plus fixed-bucket quotas.
//!
//! This module provides the building blocks for admission checks:
//! - [`Limiter`]: the engine. Owns all tracker state and scope-class configuration.
//! - [`Admission`]: the trait middleware is generic over.
//! - [`RateLimitLayer`]: Tower middleware that enforces a [`ScopeRule`](crate::enforce::ScopeRule).
//!
//! # Architecture
//!
//! - **Trackers**: [`window::RateWindow`] (sliding-window log) and
//!   [`quota::QuotaWindow`] (current fixed bucket) hold the math.
//! - **Storage**: per-scope state lives behind one mutex per scope; a check holds that
//!   mutex for the whole rate-then-quota read-modify-write.
//! - **Configuration**: limits are registered per scope class (a template such as
//!   `user:{user_id}`) and published through an arc-swap snapshot.
//!
//! A check never sleeps or awaits. It either admits immediately or returns a typed
//! rejection carrying the hints an HTTP layer needs.
//!
//! ```
//! use std::time::Duration;
//! use tollgate::rate_limit::Limiter;
//!
//! let limiter = Limiter::new();
//! limiter.set_rate_limit("user:{user_id}", 2, Duration::from_secs(1), Some(100)).unwrap();
//! assert!(limiter.check("user:42", 1).is_ok());
//! assert!(limiter.check("user:42", 1).is_ok());
//! assert!(limiter.check("user:42", 1).unwrap_err().is_rate_limited());
//! ```

use crate::adaptive::DynamicConfig;
use crate::clock::{to_system_time, Clock, SystemClock};
use crate::error::{AdmissionError, ConfigError};
use crate::scope::{literal_len, template_matches, ScopeClass, ScopeKey};
use crate::tier::{self, QuotaConfig, RateLimitConfig, ScopeLimits, Tier};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub mod middleware;
pub mod quota;
mod store;
pub mod window;

pub use middleware::{RateLimitLayer, RateLimitService};

use store::ScopeStore;
use window::WindowDecision;

/// One admission check: which scope, how much quota, and what to fall back on when no
/// explicit configuration matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    /// Concrete scope being charged.
    pub scope: ScopeKey,
    /// Quota units to consume. Rate limits always count one admission.
    pub amount: u64,
    /// Template the scope was rendered from, for catalog lookups.
    pub class: Option<String>,
    /// Tier selecting the catalog row.
    pub tier: Option<Tier>,
}

impl AdmissionRequest {
    /// A plain request for one unit against `scope`.
    pub fn new(scope: impl Into<ScopeKey>) -> Self {
        Self { scope: scope.into(), amount: 1, class: None, tier: None }
    }

    pub fn amount(mut self, amount: u64) -> Self {
        self.amount = amount;
        self
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }
}

/// Remaining headroom right after a successful check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    /// Admissions left in the sliding window.
    pub remaining: u32,
    /// Quota units left in the current bucket, if a quota applies.
    pub quota_remaining: Option<u64>,
}

/// Sliding-window occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateUsage {
    pub current: u32,
    pub limit: u32,
    pub remaining: u32,
    pub window: Duration,
    /// Time until the oldest live admission leaves the window.
    pub reset_in: Duration,
}

/// Current quota bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuotaUsage {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub reset_time: SystemTime,
    pub reset_in: Duration,
}

/// Read-only snapshot of a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Usage {
    pub scope: String,
    /// Instant the snapshot was taken.
    pub at: SystemTime,
    pub rate_limit: RateUsage,
    /// Present only when a quota applies to the scope.
    pub quota: Option<QuotaUsage>,
}

/// Core interface for admission checks.
///
/// Decouples enforcement (policy, middleware) from the engine so tests and alternative
/// engines can be plugged in.
pub trait Admission: Send + Sync {
    /// Admit or reject `request`, recording it on success.
    fn check_with(&self, request: &AdmissionRequest) -> Result<Admitted, AdmissionError>;

    /// Snapshot the scope in `request` without recording anything.
    fn usage(&self, request: &AdmissionRequest) -> Usage;
}

/// Defaults applied to scopes with no registered or catalog configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    default_limits: ScopeLimits,
}

impl LimiterConfig {
    /// Create a config with validation.
    ///
    /// `quota_window` is also the bucket size used by [`Limiter::set_rate_limit`].
    pub fn new(
        default_rate: u32,
        default_window: Duration,
        default_quota: Option<u64>,
        quota_window: Duration,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            default_limits: ScopeLimits {
                rate: RateLimitConfig::new(default_rate, default_window)?,
                quota: QuotaConfig::new(default_quota, quota_window)?,
            },
        })
    }

    /// Limits used when nothing else matches.
    pub fn default_limits(&self) -> ScopeLimits {
        self.default_limits
    }

    /// Bucket size for quotas registered through [`Limiter::set_rate_limit`].
    pub fn quota_window(&self) -> Duration {
        self.default_limits.quota.window
    }
}

impl Default for LimiterConfig {
    /// 60 admissions per 60 seconds, no quota, daily quota buckets.
    fn default() -> Self {
        Self { default_limits: ScopeLimits::default() }
    }
}

/// Builder for [`Limiter`].
#[derive(Debug, Clone)]
pub struct LimiterBuilder {
    default_rate: u32,
    default_window: Duration,
    default_quota: Option<u64>,
    quota_window: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for LimiterBuilder {
    fn default() -> Self {
        Self {
            default_rate: tier::DEFAULT_RATE,
            default_window: tier::DEFAULT_WINDOW,
            default_quota: None,
            quota_window: tier::DEFAULT_QUOTA_WINDOW,
            clock: Arc::new(SystemClock),
        }
    }
}

impl LimiterBuilder {
    pub fn default_rate(mut self, rate: u32) -> Self {
        self.default_rate = rate;
        self
    }

    pub fn default_window(mut self, window: Duration) -> Self {
        self.default_window = window;
        self
    }

    pub fn default_quota(mut self, quota: Option<u64>) -> Self {
        self.default_quota = quota;
        self
    }

    pub fn quota_window(mut self, window: Duration) -> Self {
        self.quota_window = window;
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<Limiter, ConfigError> {
        let config = LimiterConfig::new(
            self.default_rate,
            self.default_window,
            self.default_quota,
            self.quota_window,
        )?;
        Ok(Limiter::from_parts(config, self.clock))
    }
}

/// The admission engine.
///
/// Construct one per process (or per test) and hand clones to whatever needs admission
/// checks. Clones share configuration and tracker state.
#[derive(Debug, Clone)]
pub struct Limiter {
    config: LimiterConfig,
    classes: DynamicConfig<HashMap<String, ScopeLimits>>,
    store: ScopeStore,
    clock: Arc<dyn Clock>,
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Limiter {
    /// Limiter with [`LimiterConfig::default`] and the system clock.
    pub fn new() -> Self {
        Self::with_config(LimiterConfig::default())
    }

    pub fn with_config(config: LimiterConfig) -> Self {
        Self::from_parts(config, Arc::new(SystemClock))
    }

    pub fn builder() -> LimiterBuilder {
        LimiterBuilder::default()
    }

    fn from_parts(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, classes: DynamicConfig::default(), store: ScopeStore::new(), clock }
    }

    /// Register `rate` admissions per `window` for `scope_class`, with an optional quota
    /// per [`LimiterConfig::quota_window`]. Overwrites any earlier registration.
    ///
    /// `scope_class` may be a concrete scope (`api`, `user:42`) or a template
    /// (`user:{user_id}`) that applies to every scope rendered from it. A placeholder
    /// covers a single `:`-separated segment, so `user:{user_id}` does not reach
    /// `user:42:memory:add`.
    pub fn set_rate_limit(
        &self,
        scope_class: &str,
        rate: u32,
        window: Duration,
        quota: Option<u64>,
    ) -> Result<(), ConfigError> {
        let limits = ScopeLimits {
            rate: RateLimitConfig::new(rate, window)?,
            quota: QuotaConfig::new(quota, self.config.quota_window())?,
        };
        self.set_limits(scope_class, limits);
        Ok(())
    }

    /// Register a complete [`ScopeLimits`] for `scope_class`.
    pub fn set_limits(&self, scope_class: &str, limits: ScopeLimits) {
        let key = scope_class.to_string();
        self.classes.update(|current| {
            let mut next = current.clone();
            next.insert(key.clone(), limits);
            next
        });
        info!(
            target: "tollgate::rate_limit",
            scope_class,
            rate = limits.rate.rate,
            window_secs = limits.rate.window.as_secs_f64(),
            quota = ?limits.quota.quota,
            "rate limit configured"
        );
    }

    /// Forget the registration for `scope_class`. Returns whether one existed.
    pub fn remove_rate_limit(&self, scope_class: &str) -> bool {
        let existed = self.classes.get().contains_key(scope_class);
        if existed {
            self.classes.update(|current| {
                let mut next = current.clone();
                next.remove(scope_class);
                next
            });
        }
        existed
    }

    /// Register every catalog row of `tier`.
    pub fn apply_tier(&self, tier: Tier) {
        for class in ScopeClass::ALL {
            self.set_limits(class.template(), tier::limits(tier, class.template()));
        }
    }

    /// The limits a plain [`check`](Self::check) of `scope` would use.
    pub fn limits_for_scope(&self, scope: &str) -> ScopeLimits {
        self.resolve(&AdmissionRequest::new(scope))
    }

    /// Exact registration, then the class registration, then the most specific matching
    /// template, then the tier catalog, then the limiter default.
    fn resolve(&self, request: &AdmissionRequest) -> ScopeLimits {
        let classes = self.classes.get();
        let scope = request.scope.as_str();
        if let Some(limits) = classes.get(scope) {
            return *limits;
        }
        if let Some(limits) = request.class.as_deref().and_then(|class| classes.get(class)) {
            return *limits;
        }
        let templated = classes
            .iter()
            .filter(|(template, _)| template.contains('{') && template_matches(template, scope))
            .max_by(|a, b| literal_len(a.0).cmp(&literal_len(b.0)).then_with(|| b.0.cmp(a.0)));
        if let Some((_, limits)) = templated {
            return *limits;
        }
        match (request.tier, request.class.as_deref()) {
            (Some(tier), Some(class)) if ScopeClass::from_template(class).is_some() => {
                tier::limits(tier, class)
            }
            _ => self.config.default_limits,
        }
    }

    /// Admit one request against `scope`, charging `amount` quota units.
    ///
    /// # Errors
    /// - [`AdmissionError::RateLimitExceeded`] when the sliding window is full. Quota is
    ///   not touched.
    /// - [`AdmissionError::QuotaExceeded`] when the bucket cannot absorb `amount`. The
    ///   rate window is left as it was before the call.
    /// - [`AdmissionError::Config`] when `amount` is zero.
    pub fn check(&self, scope: &str, amount: u64) -> Result<Admitted, AdmissionError> {
        self.check_with(&AdmissionRequest::new(scope).amount(amount))
    }

    /// Read-only snapshot of `scope`.
    ///
    /// Limits are resolved with the class and tier of the scope's most recent check, so
    /// a scope admitted through the tier catalog is reported against its catalog row.
    pub fn get_usage(&self, scope: &str) -> Usage {
        self.usage(&AdmissionRequest::new(scope))
    }

    /// Full header set for `scope`, suitable for successful responses too.
    pub fn rate_limit_headers(&self, scope: &str) -> http::HeaderMap {
        crate::headers::rate_limit_headers(&self.get_usage(scope))
    }

    /// Clear all rate and quota state. Registered configuration is kept.
    pub fn reset(&self) {
        self.store.clear();
        info!(target: "tollgate::rate_limit", "rate limit state reset");
    }

    /// Evict scopes whose sliding window is empty and whose quota bucket has ended.
    /// Returns the number of scopes removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let removed = self.store.evict_where(|state| {
            state.rate.is_idle(&state.limits.rate, now)
                && state.quota.is_expired(&state.limits.quota, now)
        });
        if removed > 0 {
            debug!(target: "tollgate::rate_limit", removed, "swept idle scopes");
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `every` on the current tokio runtime.
    ///
    /// The task runs until aborted.
    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                limiter.sweep();
            }
        })
    }

    /// Number of scopes currently holding state.
    pub fn tracked_scopes(&self) -> usize {
        self.store.len()
    }

    /// Current clock reading as a `SystemTime`.
    pub fn now(&self) -> SystemTime {
        to_system_time(self.clock.now_millis())
    }
}

impl Admission for Limiter {
    fn check_with(&self, request: &AdmissionRequest) -> Result<Admitted, AdmissionError> {
        if request.amount == 0 {
            return Err(ConfigError::InvalidLimit { field: "amount", provided: 0 }.into());
        }
        let limits = self.resolve(request);
        let scope = request.scope.as_str();
        let now = self.clock.now_millis();

        self.store.with_scope(scope, |state| {
            state.limits = limits;
            if state.class != request.class {
                state.class = request.class.clone();
            }
            state.tier = request.tier;

            if let WindowDecision::Rejected { retry_after } = state.rate.admit(&limits.rate, now) {
                warn!(
                    target: "tollgate::rate_limit",
                    scope,
                    limit = limits.rate.rate,
                    retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                    "rate limit exceeded"
                );
                return Err(AdmissionError::RateLimitExceeded {
                    retry_after,
                    limit: limits.rate.rate,
                    scope: scope.to_string(),
                });
            }

            let quota = state.quota.consume(&limits.quota, request.amount, now);
            if let Some(decision) = quota.filter(|d| !d.allowed) {
                state.rate.retract(now);
                warn!(
                    target: "tollgate::rate_limit",
                    scope,
                    used = decision.used,
                    limit = decision.limit,
                    amount = request.amount,
                    "quota exceeded"
                );
                return Err(AdmissionError::QuotaExceeded {
                    quota_type: scope.to_string(),
                    limit: decision.limit,
                    used: decision.used,
                    reset_time: to_system_time(decision.reset_at),
                });
            }

            let current = u32::try_from(state.rate.len()).unwrap_or(u32::MAX);
            let admitted = Admitted {
                remaining: limits.rate.rate.saturating_sub(current),
                quota_remaining: quota.map(|d| d.limit.saturating_sub(d.used)),
            };
            debug!(
                target: "tollgate::rate_limit",
                scope,
                remaining = admitted.remaining,
                quota_remaining = ?admitted.quota_remaining,
                "admitted"
            );
            Ok(admitted)
        })
    }

    fn usage(&self, request: &AdmissionRequest) -> Usage {
        let now = self.clock.now_millis();
        let (limits, current, reset_in, reading) = self.store.peek(request.scope.as_str(), |state| {
            match state {
                Some(state) => {
                    // A bare scope lookup reports against whatever class and tier the
                    // scope was last admitted under.
                    let limits = if request.class.is_none() && request.tier.is_none() {
                        self.resolve(&AdmissionRequest {
                            scope: request.scope.clone(),
                            amount: request.amount,
                            class: state.class.clone(),
                            tier: state.tier,
                        })
                    } else {
                        self.resolve(request)
                    };
                    let (current, reset_in) = state.rate.peek(&limits.rate, now);
                    (limits, current, reset_in, state.quota.peek(&limits.quota, now))
                }
                None => {
                    let limits = self.resolve(request);
                    let empty = quota::QuotaWindow::new();
                    (limits, 0, Duration::ZERO, empty.peek(&limits.quota, now))
                }
            }
        });
        let current = u32::try_from(current).unwrap_or(u32::MAX);
        Usage {
            scope: request.scope.to_string(),
            at: to_system_time(now),
            rate_limit: RateUsage {
                current,
                limit: limits.rate.rate,
                remaining: limits.rate.rate.saturating_sub(current),
                window: limits.rate.window,
                reset_in,
            },
            quota: reading.map(|r| QuotaUsage {
                used: r.used,
                limit: r.limit,
                remaining: r.limit.saturating_sub(r.used),
                reset_time: to_system_time(r.reset_at),
                reset_in: Duration::from_millis(r.reset_at.saturating_sub(now)),
            }),
        }
    }
}

impl<A: Admission + ?Sized> Admission for Arc<A> {
    fn check_with(&self, request: &AdmissionRequest) -> Result<Admitted, AdmissionError> {
        (**self).check_with(request)
    }

    fn usage(&self, request: &AdmissionRequest) -> Usage {
        (**self).usage(request)
    }
}
