//! Compile-time prelude coverage test.
use std::time::Duration;
use tollgate::prelude::*;
use tower::service_fn;
use tower_layer::Layer;
use tower_service::Service;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let limiter = Limiter::new();
    limiter.set_rate_limit("api", 10, Duration::from_secs(1), None).expect("valid limit");
    let usage: Usage = limiter.get_usage("api");
    assert!(!rate_limit_headers(&usage).is_empty());

    let layer = RateLimitLayer::new(limiter, ScopeRule::from(ScopeClass::Api));
    let mut svc = layer.layer(service_fn(|_req: Caller| async { Ok::<_, std::io::Error>(()) }));
    svc.call(Caller::default()).await.expect("service call failed");

    let _: Result<_, ConfigError> = ScopeClass::User.render(&ScopeParams::new().with("user_id", "1"));
    let _ = rejection_headers(&AdmissionError::Config(ConfigError::UnknownTier("x".into())));
    let _ = Tier::default();
}
