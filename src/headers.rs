//! HTTP header rendering for admission outcomes.
//!
//! Rejections map to the headers a client needs to back off correctly; usage snapshots
//! map to the informational set sent on every response.
//!
//! | Source | Headers |
//! |---|---|
//! | rate limit rejection | `Retry-After` (whole seconds, rounded up) |
//! | quota rejection | `X-RateLimit-Remaining: 0`, `X-RateLimit-Limit`, `X-RateLimit-Reset` |
//! | usage snapshot | `X-RateLimit-{Limit,Remaining,Reset}`, plus `X-RateLimit-Quota-*` when metered |
//!
//! Reset values are Unix epoch seconds.

use crate::clock::epoch_secs;
use crate::error::AdmissionError;
use crate::rate_limit::Usage;
use http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use std::time::Duration;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_QUOTA_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-quota-limit");
pub const X_RATELIMIT_QUOTA_REMAINING: HeaderName =
    HeaderName::from_static("x-ratelimit-quota-remaining");
pub const X_RATELIMIT_QUOTA_RESET: HeaderName = HeaderName::from_static("x-ratelimit-quota-reset");

/// `Retry-After` value for `wait`: whole seconds, rounded up.
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs();
    if wait.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// Headers for a rejected check. Configuration errors produce none.
pub fn rejection_headers(error: &AdmissionError) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match error {
        AdmissionError::RateLimitExceeded { retry_after, .. } => {
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
        }
        AdmissionError::QuotaExceeded { limit, reset_time, .. } => {
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(*limit));
            headers.insert(X_RATELIMIT_RESET, HeaderValue::from(epoch_secs(*reset_time)));
        }
        AdmissionError::Config(_) => {}
    }
    headers
}

/// Full informational header set for a usage snapshot.
pub fn rate_limit_headers(usage: &Usage) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let rate = &usage.rate_limit;
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(rate.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(rate.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(epoch_secs(usage.at + rate.reset_in)));
    if let Some(quota) = &usage.quota {
        headers.insert(X_RATELIMIT_QUOTA_LIMIT, HeaderValue::from(quota.limit));
        headers.insert(X_RATELIMIT_QUOTA_REMAINING, HeaderValue::from(quota.remaining));
        headers.insert(X_RATELIMIT_QUOTA_RESET, HeaderValue::from(epoch_secs(quota.reset_time)));
    }
    headers
}
