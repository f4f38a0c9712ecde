//! Enforcing admission around an operation.
//!
//! Enforcement is three separate steps:
//!
//! 1. **Scope derivation**: [`ScopeRule::resolve`] turns a caller context into an
//!    [`AdmissionRequest`] (tier, concrete scope, amount).
//! 2. **Admission**: [`Admission::check_with`].
//! 3. **Header translation**: [`rejection_headers`] turns a rejection into the headers
//!    the transport should send.
//!
//! [`RateLimitPolicy::execute`] composes them around an async operation, and
//! [`RateLimitLayer`](crate::rate_limit::RateLimitLayer) does the same as tower
//! middleware.

use crate::error::{AdmissionError, ConfigError};
use crate::headers::rejection_headers;
use crate::rate_limit::{Admission, AdmissionRequest, Admitted};
use crate::scope::{render, ScopeClass, ScopeParams};
use crate::tier::Tier;
use http::HeaderMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What enforcement needs to know about the caller.
///
/// Every method has a default, so a context only implements what it carries.
pub trait CallerContext {
    fn user_id(&self) -> Option<&str> {
        None
    }

    fn project_id(&self) -> Option<&str> {
        None
    }

    /// The caller's subscription tier, if known.
    fn tier(&self) -> Option<Tier> {
        None
    }
}

impl<C: CallerContext + ?Sized> CallerContext for &C {
    fn user_id(&self) -> Option<&str> {
        (**self).user_id()
    }

    fn project_id(&self) -> Option<&str> {
        (**self).project_id()
    }

    fn tier(&self) -> Option<Tier> {
        (**self).tier()
    }
}

/// A simple owned context, handy for tests and for callers without their own type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub tier: Option<Tier>,
}

impl Caller {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self { user_id: Some(user_id.into()), ..Self::default() }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }
}

impl CallerContext for Caller {
    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    fn tier(&self) -> Option<Tier> {
        self.tier
    }
}

/// How to derive an admission request from a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRule {
    class: String,
    params: ScopeParams,
    amount: u64,
    tier: Option<Tier>,
}

impl ScopeRule {
    /// Charge one unit against the scope rendered from `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self { class: class.into(), params: ScopeParams::new(), amount: 1, tier: None }
    }

    /// Extra template parameter. Overrides context-derived values of the same name.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name, value);
        self
    }

    /// Quota units charged per request.
    pub fn amount(mut self, amount: u64) -> Self {
        self.amount = amount;
        self
    }

    /// Pin the tier instead of reading it from the caller.
    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Rule tier, else caller tier, else [`Tier::Free`].
    pub fn resolve_tier<C: CallerContext + ?Sized>(&self, ctx: &C) -> Tier {
        self.tier.or_else(|| ctx.tier()).unwrap_or_default()
    }

    /// Render the concrete scope and build the request.
    ///
    /// # Errors
    /// [`ConfigError::MissingScopeParam`] when the template needs a value neither the
    /// caller nor the rule supplies.
    pub fn resolve<C: CallerContext + ?Sized>(&self, ctx: &C) -> Result<AdmissionRequest, ConfigError> {
        let mut params = ScopeParams::new();
        if let Some(user_id) = ctx.user_id() {
            params.insert("user_id", user_id);
        }
        if let Some(project_id) = ctx.project_id() {
            params.insert("project_id", project_id);
        }
        params.extend(&self.params);
        let scope = render(&self.class, &params)?;
        Ok(AdmissionRequest {
            scope,
            amount: self.amount,
            class: Some(self.class.clone()),
            tier: Some(self.resolve_tier(ctx)),
        })
    }
}

impl From<ScopeClass> for ScopeRule {
    fn from(class: ScopeClass) -> Self {
        ScopeRule::new(class.template())
    }
}

/// Error from an enforced operation.
#[derive(Debug)]
pub enum EnforceError<E> {
    /// Admission was refused. `headers` carry the retry hints for the transport.
    Rejected { error: AdmissionError, headers: HeaderMap },
    /// The operation itself failed.
    Inner(E),
}

impl<E> EnforceError<E> {
    /// Build a rejection with its transport headers.
    pub fn rejected(error: AdmissionError) -> Self {
        let headers = rejection_headers(&error);
        EnforceError::Rejected { error, headers }
    }

    /// The admission error, if this is a rejection.
    pub fn admission(&self) -> Option<&AdmissionError> {
        match self {
            EnforceError::Rejected { error, .. } => Some(error),
            EnforceError::Inner(_) => None,
        }
    }

    /// Transport headers, if this is a rejection.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            EnforceError::Rejected { headers, .. } => Some(headers),
            EnforceError::Inner(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, EnforceError::Rejected { .. })
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            EnforceError::Inner(e) => Some(e),
            EnforceError::Rejected { .. } => None,
        }
    }
}

impl<E> From<AdmissionError> for EnforceError<E> {
    fn from(error: AdmissionError) -> Self {
        EnforceError::rejected(error)
    }
}

impl<E: fmt::Display> fmt::Display for EnforceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforceError::Rejected { error, .. } => write!(f, "{}", error),
            EnforceError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for EnforceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EnforceError::Rejected { error, .. } => Some(error),
            EnforceError::Inner(e) => Some(e),
        }
    }
}

/// Run `rule` through `admission` for `ctx`: steps 1 and 2 with step 3 applied to any
/// rejection.
pub fn admit<A, C>(admission: &A, rule: &ScopeRule, ctx: &C) -> Result<Admitted, AdmissionError>
where
    A: Admission + ?Sized,
    C: CallerContext + ?Sized,
{
    let request = rule.resolve(ctx)?;
    admission.check_with(&request)
}

/// Guards operations with an admission check.
///
/// # Examples
/// ```
/// use tollgate::enforce::{Caller, RateLimitPolicy, ScopeRule};
/// use tollgate::rate_limit::Limiter;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let limiter = Limiter::new();
/// limiter.set_rate_limit("user:{user_id}", 1, Duration::from_secs(60), None).unwrap();
/// let policy = RateLimitPolicy::new(limiter, ScopeRule::new("user:{user_id}"));
/// let caller = Caller::user("42");
///
/// let first = policy.execute(&caller, || async { Ok::<_, std::io::Error>("ok") }).await;
/// assert_eq!(first.unwrap(), "ok");
/// let second = policy.execute(&caller, || async { Ok::<_, std::io::Error>("ok") }).await;
/// assert!(second.unwrap_err().headers().unwrap().contains_key("retry-after"));
/// # }
/// ```
#[derive(Debug)]
pub struct RateLimitPolicy<A> {
    admission: Arc<A>,
    rule: ScopeRule,
}

impl<A> Clone for RateLimitPolicy<A> {
    fn clone(&self) -> Self {
        Self { admission: self.admission.clone(), rule: self.rule.clone() }
    }
}

impl<A: Admission> RateLimitPolicy<A> {
    pub fn new(admission: A, rule: ScopeRule) -> Self {
        Self { admission: Arc::new(admission), rule }
    }

    /// Share an existing engine handle.
    pub fn from_arc(admission: Arc<A>, rule: ScopeRule) -> Self {
        Self { admission, rule }
    }

    pub fn rule(&self) -> &ScopeRule {
        &self.rule
    }

    /// Check admission for `ctx`, then run `operation`. The operation is not started
    /// when admission is refused; its result passes through untouched otherwise.
    pub async fn execute<T, E, Fut, Op, C>(&self, ctx: &C, operation: Op) -> Result<T, EnforceError<E>>
    where
        C: CallerContext + ?Sized,
        Fut: Future<Output = Result<T, E>>,
        Op: FnOnce() -> Fut,
    {
        admit(self.admission.as_ref(), &self.rule, ctx)?;
        operation().await.map_err(EnforceError::Inner)
    }
}
