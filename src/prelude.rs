//! Convenient re-exports for common Tollgate types.
pub use crate::{
    enforce::{Caller, CallerContext, EnforceError, RateLimitPolicy, ScopeRule},
    error::{AdmissionError, ConfigError},
    headers::{rate_limit_headers, rejection_headers},
    rate_limit::{Admission, AdmissionRequest, Limiter, RateLimitLayer, Usage},
    scope::{ScopeClass, ScopeParams},
    tier::Tier,
};
