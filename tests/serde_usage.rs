#![cfg(feature = "serde")]
use std::time::Duration;
use tollgate::{Limiter, ManualClock, RateLimitConfig, ScopeLimits, Tier, Usage};

#[test]
fn usage_snapshot_serializes() {
    let limiter = Limiter::builder().clock(ManualClock::new(1_700_000_000_000)).build().unwrap();
    limiter.set_rate_limit("api", 10, Duration::from_secs(60), Some(50)).unwrap();
    limiter.check("api", 3).unwrap();

    let usage = limiter.get_usage("api");
    let json = serde_json::to_value(&usage).expect("serialize usage");
    assert_eq!(json["scope"], "api");
    assert_eq!(json["rate_limit"]["limit"], 10);
    assert_eq!(json["rate_limit"]["remaining"], 9);
    assert_eq!(json["quota"]["used"], 3);

    let back: Usage = serde_json::from_value(json).expect("deserialize usage");
    assert_eq!(back, usage);
}

#[test]
fn tiers_and_limits_use_config_friendly_names() {
    assert_eq!(serde_json::to_string(&Tier::Enterprise).unwrap(), "\"enterprise\"");
    let tier: Tier = serde_json::from_str("\"pro\"").unwrap();
    assert_eq!(tier, Tier::Pro);

    let limits = ScopeLimits {
        rate: RateLimitConfig::new(5, Duration::from_secs(1)).unwrap(),
        ..ScopeLimits::default()
    };
    let json = serde_json::to_string(&limits).unwrap();
    assert_eq!(serde_json::from_str::<ScopeLimits>(&json).unwrap(), limits);
}
