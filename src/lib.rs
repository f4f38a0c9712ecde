#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Tollgate
//!
//! Admission control for multi-tenant APIs: sliding-window rate limits and
//! fixed-bucket usage quotas, keyed by hierarchical scopes and subscription tiers.
//!
//! ## Features
//!
//! - **Sliding-window rate limits** with exact counting and no burst leakage at window
//!   edges
//! - **Usage quotas** over aligned buckets (daily by default)
//! - **Scope templates** such as `user:{user_id}:memory:add`, rendered per request
//! - **Tier catalog** with per-tier defaults for every operation class
//! - **Tower middleware** that derives the scope from the request and maps rejections
//!   to `Retry-After` and `X-RateLimit-*` headers
//! - **Per-scope locking**: independent scopes never contend on the same mutex
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{AdmissionError, Limiter};
//! use std::time::Duration;
//!
//! let limiter = Limiter::new();
//! limiter
//!     .set_rate_limit("user:{user_id}:memory:add", 2, Duration::from_secs(1), Some(1_000))
//!     .unwrap();
//!
//! assert!(limiter.check("user:42:memory:add", 1).is_ok());
//! assert!(limiter.check("user:42:memory:add", 1).is_ok());
//! match limiter.check("user:42:memory:add", 1) {
//!     Err(AdmissionError::RateLimitExceeded { retry_after, .. }) => {
//!         assert!(retry_after <= Duration::from_secs(1));
//!     }
//!     other => panic!("expected a rate limit rejection, got {other:?}"),
//! }
//! ```

pub mod adaptive;
pub mod clock;
pub mod enforce;
pub mod error;
pub mod headers;
pub mod prelude;
pub mod rate_limit;
pub mod scope;
pub mod telemetry;
pub mod tier;

// Re-exports
pub use adaptive::DynamicConfig;
pub use clock::{Clock, ManualClock, SystemClock};
pub use enforce::{Caller, CallerContext, EnforceError, RateLimitPolicy, ScopeRule};
pub use error::{AdmissionError, ConfigError};
pub use rate_limit::{
    Admission, AdmissionRequest, Admitted, Limiter, LimiterBuilder, LimiterConfig, QuotaUsage,
    RateLimitLayer, RateLimitService, RateUsage, Usage,
};
pub use scope::{render, ScopeClass, ScopeKey, ScopeParams};
pub use telemetry::{AdmissionEvent, LogSink, MemorySink, NullSink, TelemetrySink};
pub use tier::{QuotaConfig, RateLimitConfig, ScopeLimits, Tier};
