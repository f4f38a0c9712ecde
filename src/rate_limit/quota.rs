//! Fixed-bucket quota tracking.
//!
//! Buckets are aligned to multiples of the quota window since the epoch, so a daily
//! quota resets at midnight UTC. Only the current bucket is kept per scope: the first
//! check that lands in a newer bucket replaces the old one.

use crate::tier::QuotaConfig;

/// Result of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Usage after the check (unchanged on rejection).
    pub used: u64,
    pub limit: u64,
    /// Epoch millis at which the bucket resets.
    pub reset_at: u64,
}

/// Usage of the bucket that is current at some instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaReading {
    pub used: u64,
    pub limit: u64,
    pub reset_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bucket {
    window_start: u64,
    used: u64,
}

/// Current quota bucket for one scope.
#[derive(Debug, Default, Clone)]
pub struct QuotaWindow {
    bucket: Option<Bucket>,
}

fn window_millis(config: &QuotaConfig) -> u64 {
    u64::try_from(config.window.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn window_start(config: &QuotaConfig, now: u64) -> u64 {
    let window = window_millis(config);
    (now / window) * window
}

impl QuotaWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn used_at(&self, start: u64) -> u64 {
        match self.bucket {
            Some(b) if b.window_start == start => b.used,
            _ => 0,
        }
    }

    /// Consume `amount` at `now`. Returns `None` when the config has no quota.
    pub fn consume(&mut self, config: &QuotaConfig, amount: u64, now: u64) -> Option<QuotaDecision> {
        let limit = config.quota?;
        let start = window_start(config, now);
        let reset_at = start.saturating_add(window_millis(config));
        let used = self.used_at(start);
        if !self.bucket.is_some_and(|b| b.window_start == start) {
            self.bucket = Some(Bucket { window_start: start, used: 0 });
        }
        match used.checked_add(amount) {
            Some(next) if next <= limit => {
                self.bucket = Some(Bucket { window_start: start, used: next });
                Some(QuotaDecision { allowed: true, used: next, limit, reset_at })
            }
            _ => Some(QuotaDecision { allowed: false, used, limit, reset_at }),
        }
    }

    /// Usage of the bucket current at `now`, without creating or rolling buckets.
    pub fn peek(&self, config: &QuotaConfig, now: u64) -> Option<QuotaReading> {
        let limit = config.quota?;
        let start = window_start(config, now);
        Some(QuotaReading {
            used: self.used_at(start),
            limit,
            reset_at: start.saturating_add(window_millis(config)),
        })
    }

    /// True when the held bucket (if any) has ended by `now`.
    pub fn is_expired(&self, config: &QuotaConfig, now: u64) -> bool {
        !self.bucket.is_some_and(|b| now < b.window_start.saturating_add(window_millis(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const DAY: u64 = 86_400_000;

    #[test]
    fn unlimited_is_untracked() {
        let mut q = QuotaWindow::new();
        assert_eq!(q.consume(&QuotaConfig::unlimited(), 1_000_000, 5), None);
        assert_eq!(q.peek(&QuotaConfig::unlimited(), 5), None);
    }

    #[test]
    fn exact_budget_then_reject_without_mutation() {
        let mut q = QuotaWindow::new();
        let c = QuotaConfig::daily(3);
        let now = 3 * DAY + 1_234;
        for i in 1..=3 {
            let d = q.consume(&c, 1, now).unwrap();
            assert!(d.allowed);
            assert_eq!(d.used, i);
        }
        let d = q.consume(&c, 1, now).unwrap();
        assert_eq!(d, QuotaDecision { allowed: false, used: 3, limit: 3, reset_at: 4 * DAY });
        assert_eq!(q.peek(&c, now).unwrap().used, 3);
    }

    #[test]
    fn oversized_amount_rejected_but_smaller_fits() {
        let mut q = QuotaWindow::new();
        let c = QuotaConfig::daily(10);
        assert!(q.consume(&c, 8, 0).unwrap().allowed);
        assert!(!q.consume(&c, 3, 1).unwrap().allowed);
        assert!(q.consume(&c, 2, 2).unwrap().allowed);
        assert!(!q.consume(&c, u64::MAX, 3).unwrap().allowed);
    }

    #[test]
    fn new_bucket_replaces_old() {
        let mut q = QuotaWindow::new();
        let c = QuotaConfig::new(Some(1), Duration::from_secs(60)).unwrap();
        assert!(q.is_expired(&c, 0), "no bucket yet");
        assert!(q.consume(&c, 1, 59_999).unwrap().allowed);
        assert!(!q.consume(&c, 1, 59_999).unwrap().allowed);
        assert!(q.is_expired(&c, 60_000));
        let d = q.consume(&c, 1, 60_000).unwrap();
        assert!(d.allowed);
        assert_eq!(d.reset_at, 120_000);
        assert!(!q.is_expired(&c, 60_000));
    }

    #[test]
    fn peek_reports_zero_for_stale_bucket() {
        let mut q = QuotaWindow::new();
        let c = QuotaConfig::daily(5);
        q.consume(&c, 2, 10).unwrap();
        let reading = q.peek(&c, DAY + 10).unwrap();
        assert_eq!(reading, QuotaReading { used: 0, limit: 5, reset_at: 2 * DAY });
    }
}
