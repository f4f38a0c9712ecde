use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tollgate::{
    Admission, AdmissionError, AdmissionRequest, Limiter, ManualClock, ScopeClass, ScopeParams,
    Tier,
};

const T0: u64 = 1_700_000_000_000;

fn manual_limiter() -> (Limiter, ManualClock) {
    let clock = ManualClock::new(T0);
    let limiter = Limiter::builder().clock(clock.clone()).build().expect("valid defaults");
    (limiter, clock)
}

#[test]
fn window_slides_instead_of_resetting() {
    let (limiter, clock) = manual_limiter();
    limiter.set_rate_limit("api", 3, Duration::from_secs(10), None).unwrap();

    limiter.check("api", 1).unwrap();
    clock.advance(Duration::from_secs(6));
    limiter.check("api", 1).unwrap();
    limiter.check("api", 1).unwrap();

    // A fixed window starting at T0 would reset at T0+10s and allow a burst of three.
    clock.advance(Duration::from_secs(4));
    limiter.check("api", 1).unwrap();
    let err = limiter.check("api", 1).unwrap_err();
    assert_eq!(err.retry_after(limiter.now()), Some(Duration::from_secs(6)));
}

#[test]
fn quota_resets_at_bucket_boundary() {
    let (limiter, clock) = manual_limiter();
    limiter.set_rate_limit("memory:add", 1_000, Duration::from_secs(60), Some(5)).unwrap();
    limiter.check("memory:add", 5).unwrap();
    assert!(limiter.check("memory:add", 1).unwrap_err().is_quota_exceeded());

    // T0 is 6_400s before the next UTC midnight.
    clock.advance(Duration::from_secs(6_399));
    assert!(limiter.check("memory:add", 1).is_err());
    clock.advance(Duration::from_secs(1));
    let admitted = limiter.check("memory:add", 1).unwrap();
    assert_eq!(admitted.quota_remaining, Some(4));
}

#[test]
fn concurrent_checks_never_over_admit() {
    let limiter = Limiter::new();
    limiter.set_rate_limit("shared", 100, Duration::from_secs(60), None).unwrap();
    let admitted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = limiter.clone();
            let admitted = admitted.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    if limiter.check("shared", 1).is_ok() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 100);
    assert_eq!(limiter.get_usage("shared").rate_limit.current, 100);
}

#[test]
fn scopes_are_isolated_across_threads() {
    let limiter = Limiter::new();
    limiter.set_rate_limit("user:{user_id}", 20, Duration::from_secs(60), Some(20)).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let limiter = limiter.clone();
            thread::spawn(move || {
                let params = ScopeParams::new().with("user_id", n.to_string());
                let scope = ScopeClass::User.render(&params).unwrap();
                (0..20).all(|_| limiter.check(scope.as_str(), 1).is_ok())
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap(), "every user gets its full allowance");
    }
    assert_eq!(limiter.tracked_scopes(), 8);
}

#[test]
fn rejection_is_immediate_and_records_nothing() {
    let (limiter, _clock) = manual_limiter();
    limiter.set_rate_limit("s", 1, Duration::from_secs(60), Some(10)).unwrap();
    limiter.check("s", 1).unwrap();
    let before = limiter.get_usage("s");
    for _ in 0..100 {
        assert!(matches!(limiter.check("s", 1), Err(AdmissionError::RateLimitExceeded { .. })));
    }
    assert_eq!(limiter.get_usage("s"), before);
}

#[test]
fn reset_clears_every_scope() {
    let (limiter, _clock) = manual_limiter();
    limiter.set_rate_limit("a", 1, Duration::from_secs(60), None).unwrap();
    limiter.set_rate_limit("b", 1, Duration::from_secs(60), Some(1)).unwrap();
    limiter.check("a", 1).unwrap();
    limiter.check("b", 1).unwrap();
    limiter.reset();
    assert_eq!(limiter.get_usage("a").rate_limit.current, 0);
    assert_eq!(limiter.get_usage("b").quota.unwrap().used, 0);
    assert!(limiter.check("a", 1).is_ok());
    assert!(limiter.check("b", 1).is_ok());
}

#[test]
fn tier_requests_use_catalog_defaults() {
    let (limiter, _clock) = manual_limiter();
    let request = AdmissionRequest::new("memory:delete").class("memory:delete").tier(Tier::Free);
    let usage = limiter.usage(&request);
    assert_eq!(usage.rate_limit.limit, 30);
    assert_eq!(usage.quota.unwrap().limit, 1_000);

    let enterprise = request.clone().tier(Tier::Enterprise);
    let usage = limiter.usage(&enterprise);
    assert_eq!(usage.rate_limit.limit, 500);
    assert!(usage.quota.is_none(), "enterprise quotas are unlimited");
}

#[tokio::test(start_paused = true)]
async fn background_sweeper_evicts_idle_scopes() {
    let (limiter, clock) = manual_limiter();
    limiter.set_rate_limit("short", 5, Duration::from_secs(1), None).unwrap();
    limiter.check("short", 1).unwrap();
    clock.advance(Duration::from_secs(2));

    let sweeper = limiter.spawn_sweeper(Duration::from_secs(30));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(limiter.tracked_scopes(), 0);
    sweeper.abort();
}
