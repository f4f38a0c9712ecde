use crate::enforce::{CallerContext, EnforceError, ScopeRule};
use crate::error::AdmissionError;
use crate::rate_limit::Admission;
use crate::telemetry::{emit_best_effort, AdmissionEvent, NullSink};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that admits each request through an [`Admission`] engine before forwarding it.
///
/// The scope is derived per request from the request's [`CallerContext`] using `rule`.
/// Rejected requests never reach the inner service; they fail with
/// [`EnforceError::Rejected`] carrying the response headers.
#[derive(Debug)]
pub struct RateLimitLayer<A, Sink = NullSink> {
    admission: Arc<A>,
    rule: ScopeRule,
    sink: Sink,
}

impl<A, Sink: Clone> Clone for RateLimitLayer<A, Sink> {
    fn clone(&self) -> Self {
        Self { admission: self.admission.clone(), rule: self.rule.clone(), sink: self.sink.clone() }
    }
}

impl<A> RateLimitLayer<A> {
    /// Create a new rate limit layer.
    pub fn new(admission: A, rule: ScopeRule) -> Self {
        Self::from_arc(Arc::new(admission), rule)
    }

    /// Share an engine that other layers or handlers also use.
    pub fn from_arc(admission: Arc<A>, rule: ScopeRule) -> Self {
        Self { admission, rule, sink: NullSink }
    }
}

impl<A, Sink> RateLimitLayer<A, Sink> {
    /// Emit one [`AdmissionEvent`] per request to `sink`.
    pub fn with_sink<NewSink>(self, sink: NewSink) -> RateLimitLayer<A, NewSink> {
        RateLimitLayer { admission: self.admission, rule: self.rule, sink }
    }
}

impl<S, A, Sink> Layer<S> for RateLimitLayer<A, Sink>
where
    Sink: Clone,
{
    type Service = RateLimitService<S, A, Sink>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            admission: self.admission.clone(),
            rule: self.rule.clone(),
            sink: self.sink.clone(),
        }
    }
}

/// Middleware service that enforces admission.
#[derive(Debug)]
pub struct RateLimitService<S, A, Sink = NullSink> {
    inner: S,
    admission: Arc<A>,
    rule: ScopeRule,
    sink: Sink,
}

impl<S: Clone, A, Sink: Clone> Clone for RateLimitService<S, A, Sink> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            admission: self.admission.clone(),
            rule: self.rule.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<S, A, Sink, Req> Service<Req> for RateLimitService<S, A, Sink>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    A: Admission + 'static,
    Sink: Service<AdmissionEvent, Response = ()> + Clone + Send + 'static,
    Sink::Error: std::error::Error + Send + 'static,
    Sink::Future: Send + 'static,
    Req: CallerContext + Send + 'static,
{
    type Response = S::Response;
    type Error = EnforceError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(EnforceError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // The decision is taken here, not when the future is first polled, so requests
        // are charged in call order.
        let decision = self.rule.resolve(&req).map_err(AdmissionError::from).and_then(|request| {
            self.admission.check_with(&request).map(|admitted| (request.scope, admitted))
        });
        let sink = self.sink.clone();

        match decision {
            Ok((scope, admitted)) => {
                let event =
                    AdmissionEvent::Admitted { scope: scope.into_string(), remaining: admitted.remaining };
                // Keep the instance that was polled ready.
                let clone = self.inner.clone();
                let mut inner = std::mem::replace(&mut self.inner, clone);
                Box::pin(async move {
                    emit_best_effort(sink, event).await;
                    inner.call(req).await.map_err(EnforceError::Inner)
                })
            }
            Err(error) => {
                let event = AdmissionEvent::from(&error);
                Box::pin(async move {
                    emit_best_effort(sink, event).await;
                    Err(EnforceError::rejected(error))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::enforce::Caller;
    use crate::rate_limit::Limiter;
    use crate::scope::ScopeClass;
    use crate::telemetry::MemorySink;
    use crate::tier::Tier;
    use http::header::RETRY_AFTER;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::{service_fn, ServiceExt};

    fn limiter() -> Limiter {
        Limiter::builder().clock(ManualClock::new(1_700_000_000_000)).build().unwrap()
    }

    #[tokio::test]
    async fn forwards_until_window_is_full() {
        let limiter = limiter();
        limiter.set_rate_limit("user:{user_id}", 2, Duration::from_secs(60), None).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let inner = service_fn(move |req: Caller| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(req.user_id.unwrap_or_default())
            }
        });
        let svc = RateLimitLayer::new(limiter, ScopeRule::from(ScopeClass::User)).layer(inner);

        for _ in 0..2 {
            let out = svc.clone().oneshot(Caller::user("a")).await.unwrap();
            assert_eq!(out, "a");
        }
        let err = svc.clone().oneshot(Caller::user("a")).await.unwrap_err();
        assert!(err.is_rejected());
        assert_eq!(err.headers().unwrap().get(RETRY_AFTER).unwrap(), "60");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(svc.oneshot(Caller::user("b")).await.is_ok(), "other users unaffected");
    }

    #[tokio::test]
    async fn emits_events_to_sink() {
        let limiter = limiter();
        limiter.set_rate_limit("api", 1, Duration::from_secs(5), None).unwrap();
        let sink = MemorySink::with_capacity(8);
        let inner = service_fn(|_req: Caller| async { Ok::<_, Infallible>(()) });
        let svc = RateLimitLayer::new(limiter, ScopeRule::from(ScopeClass::Api))
            .with_sink(sink.clone())
            .layer(inner);

        svc.clone().oneshot(Caller::default()).await.unwrap();
        let _ = svc.oneshot(Caller::default()).await;

        assert_eq!(
            sink.events(),
            vec![
                AdmissionEvent::Admitted { scope: "api".into(), remaining: 0 },
                AdmissionEvent::RateLimited {
                    scope: "api".into(),
                    limit: 1,
                    retry_after: Duration::from_secs(5),
                },
            ]
        );
    }

    #[tokio::test]
    async fn caller_tier_selects_catalog_row() {
        let shared = Arc::new(limiter());
        let inner = service_fn(|_req: Caller| async { Ok::<_, Infallible>(()) });
        let svc = RateLimitLayer::from_arc(shared.clone(), ScopeRule::from(ScopeClass::Webhook).param("webhook_id", "w"))
            .layer(inner);
        let enterprise = Caller::default().with_tier(Tier::Enterprise);
        for _ in 0..10 {
            svc.clone().oneshot(enterprise.clone()).await.unwrap();
        }
        let request = ScopeRule::from(ScopeClass::Webhook).param("webhook_id", "w").resolve(&enterprise).unwrap();
        let usage = shared.usage(&request);
        assert_eq!(usage.rate_limit.limit, 500);
        assert_eq!(usage.rate_limit.current, 10);
    }

    #[tokio::test]
    async fn inner_errors_pass_through() {
        #[derive(Debug, PartialEq)]
        struct Boom;

        let inner = service_fn(|_req: Caller| async { Err::<(), _>(Boom) });
        let svc = RateLimitLayer::new(limiter(), ScopeRule::new("api")).layer(inner);
        let err = svc.oneshot(Caller::default()).await.unwrap_err();
        assert!(!err.is_rejected());
        assert_eq!(err.into_inner(), Some(Boom));
    }
}
