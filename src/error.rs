//! Error types for admission checks and enforcement.
use std::time::{Duration, SystemTime};

/// Caller or operator mistakes. Never retryable.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A `{placeholder}` in a scope template had no matching parameter.
    #[error("scope template '{template}' references '{{{param}}}' but no value was supplied")]
    MissingScopeParam {
        /// Template being rendered.
        template: String,
        /// Name of the missing placeholder.
        param: String,
    },
    /// Unterminated or empty placeholder.
    #[error("malformed scope template '{template}': {reason}")]
    MalformedTemplate {
        /// Offending template.
        template: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// Tier label not in the catalog.
    #[error("unknown tier '{0}' (expected free, basic, pro or enterprise)")]
    UnknownTier(String),
    /// A rate, window, quota or amount that must be positive was not.
    #[error("invalid {field}: must be > 0 (got {provided})")]
    InvalidLimit {
        /// Name of the field.
        field: &'static str,
        /// Value provided by caller.
        provided: u64,
    },
}

/// Outcome of a rejected admission check.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AdmissionError {
    /// Too many admissions inside the scope's sliding window. Transient.
    #[error(
        "rate limit exceeded for {scope}; try again in {:.2} seconds (limit: {limit} per window)",
        .retry_after.as_secs_f64()
    )]
    RateLimitExceeded {
        /// Time until the next admission could succeed; always non-zero.
        retry_after: Duration,
        /// Configured admissions per window.
        limit: u32,
        /// Concrete scope that was rejected.
        scope: String,
    },
    /// Cumulative budget for the current bucket is spent.
    #[error("{quota_type} quota exceeded; used {used}/{limit}")]
    QuotaExceeded {
        /// Scope whose quota is exhausted.
        quota_type: String,
        /// Budget for the bucket.
        limit: u64,
        /// Amount already consumed; unchanged by the rejected request.
        used: u64,
        /// Instant the bucket empties.
        reset_time: SystemTime,
    },
    /// The check itself could not be evaluated.
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}

impl AdmissionError {
    /// Check if this error is a sliding-window rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    /// Check if this error is a quota rejection.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// Whether waiting can make the same request succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }

    /// How long the caller should wait before retrying, if waiting helps.
    ///
    /// Quota rejections report the time left until `reset_time` measured against `now`.
    pub fn retry_after(&self, now: SystemTime) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            Self::QuotaExceeded { reset_time, .. } => {
                Some(reset_time.duration_since(now).unwrap_or(Duration::ZERO))
            }
            Self::Config(_) => None,
        }
    }

    /// Sliding-window wait in fractional seconds.
    pub fn retry_after_secs(&self) -> Option<f64> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => Some(retry_after.as_secs_f64()),
            _ => None,
        }
    }

    /// Access the concrete scope the rejection refers to.
    pub fn scope(&self) -> Option<&str> {
        match self {
            Self::RateLimitExceeded { scope, .. } => Some(scope),
            Self::QuotaExceeded { quota_type, .. } => Some(quota_type),
            Self::Config(_) => None,
        }
    }
}
