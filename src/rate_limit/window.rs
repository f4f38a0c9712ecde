//! Sliding-window log: exact admission counting over a trailing window.
//!
//! Each admission records its timestamp. A check first forgets timestamps older than the
//! window, then admits only if fewer than `rate` remain. Memory and pruning cost are
//! O(rate) per scope, which is fine for the tens-to-hundreds rates this is used with.

use crate::tier::RateLimitConfig;
use std::collections::VecDeque;
use std::time::Duration;

/// Result of a sliding-window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    Allowed,
    /// Rejected; one more admission becomes possible after `retry_after`.
    Rejected { retry_after: Duration },
}

/// Admission timestamps (epoch millis) for one scope, oldest first.
#[derive(Debug, Default, Clone)]
pub struct RateWindow {
    stamps: VecDeque<u64>,
}

fn window_millis(config: &RateLimitConfig) -> u64 {
    u64::try_from(config.window.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl RateWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every stamp `<= now - window`.
    fn prune(&mut self, window: u64, now: u64) {
        let cutoff = now.saturating_sub(window);
        while self.stamps.front().is_some_and(|&t| t <= cutoff && now >= window) {
            self.stamps.pop_front();
        }
    }

    /// Admit one request at `now` if the window has room, recording it.
    pub fn admit(&mut self, config: &RateLimitConfig, now: u64) -> WindowDecision {
        let window = window_millis(config);
        self.prune(window, now);
        let rate = config.rate as usize;
        if self.stamps.len() >= rate {
            return WindowDecision::Rejected { retry_after: self.wait_for_slot(window, rate, now) };
        }
        self.stamps.push_back(now);
        WindowDecision::Allowed
    }

    /// `(current, reset_in)` as `admit` would see them at `now`, without pruning.
    ///
    /// `reset_in` is the time until the oldest live stamp leaves the window; zero when
    /// the window is empty.
    pub fn peek(&self, config: &RateLimitConfig, now: u64) -> (usize, Duration) {
        let window = window_millis(config);
        let live = self.live(window, now);
        let current = live.clone().count();
        let reset_in = live
            .min()
            .map(|oldest| Duration::from_millis((oldest + window).saturating_sub(now)))
            .unwrap_or(Duration::ZERO);
        (current, reset_in)
    }

    fn live(&self, window: u64, now: u64) -> impl Iterator<Item = u64> + Clone + '_ {
        let cutoff = now.saturating_sub(window);
        let whole_history = now < window;
        self.stamps.iter().copied().filter(move |&t| whole_history || t > cutoff)
    }

    /// Stamps that must expire before one more admission fits: with `n` live stamps and a
    /// limit of `rate`, the `(n - rate)`-th oldest stamp has to leave. When the limit was
    /// lowered after admissions were recorded, `n` can exceed `rate`.
    fn wait_for_slot(&self, window: u64, rate: usize, now: u64) -> Duration {
        let idx = self.stamps.len().saturating_sub(rate);
        let stamp = self.stamps.get(idx).copied().unwrap_or(now);
        Duration::from_millis((stamp + window).saturating_sub(now).max(1))
    }

    /// Undo the admission recorded at `now`, if it is the newest stamp.
    pub fn retract(&mut self, now: u64) {
        if self.stamps.back() == Some(&now) {
            self.stamps.pop_back();
        }
    }

    /// True when nothing in the window is still live at `now`.
    pub fn is_idle(&self, config: &RateLimitConfig, now: u64) -> bool {
        self.live(window_millis(config), now).next().is_none()
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(rate: u32, secs: u64) -> RateLimitConfig {
        RateLimitConfig::new(rate, Duration::from_secs(secs)).unwrap()
    }

    #[test]
    fn admits_up_to_rate_then_rejects() {
        let mut w = RateWindow::new();
        let c = cfg(2, 1);
        let t0 = 10_000;
        assert_eq!(w.admit(&c, t0), WindowDecision::Allowed);
        assert_eq!(w.admit(&c, t0), WindowDecision::Allowed);
        assert_eq!(
            w.admit(&c, t0),
            WindowDecision::Rejected { retry_after: Duration::from_millis(1_000) }
        );
        assert_eq!(w.len(), 2, "rejections are not recorded");
    }

    #[test]
    fn boundary_stamp_expires_exactly_at_window() {
        let mut w = RateWindow::new();
        let c = cfg(1, 1);
        assert_eq!(w.admit(&c, 5_000), WindowDecision::Allowed);
        assert_eq!(
            w.admit(&c, 5_999),
            WindowDecision::Rejected { retry_after: Duration::from_millis(1) }
        );
        assert_eq!(w.admit(&c, 6_000), WindowDecision::Allowed);
    }

    #[test]
    fn no_burst_leak_across_window_edges() {
        let mut w = RateWindow::new();
        let c = cfg(3, 10);
        for t in [1_000, 9_000, 10_500] {
            assert_eq!(w.admit(&c, t), WindowDecision::Allowed);
        }
        // 1_000 expired at 11_000; the other two are still live.
        assert!(matches!(w.admit(&c, 10_900), WindowDecision::Rejected { .. }));
        assert_eq!(w.admit(&c, 11_000), WindowDecision::Allowed);
        assert!(matches!(w.admit(&c, 11_001), WindowDecision::Rejected { .. }));
    }

    #[test]
    fn lowered_rate_waits_for_enough_expiries() {
        let mut w = RateWindow::new();
        let wide = cfg(4, 10);
        for t in [0, 1_000, 2_000, 3_000] {
            assert_eq!(w.admit(&wide, 10_000 + t), WindowDecision::Allowed);
        }
        let narrow = cfg(2, 10);
        // Three of four stamps must expire; the third (12_000) leaves at 22_000.
        assert_eq!(
            w.admit(&narrow, 14_000),
            WindowDecision::Rejected { retry_after: Duration::from_millis(8_000) }
        );
        assert_eq!(w.admit(&narrow, 22_000), WindowDecision::Allowed);
    }

    #[test]
    fn peek_does_not_mutate() {
        let mut w = RateWindow::new();
        let c = cfg(5, 60);
        w.admit(&c, 100_000);
        w.admit(&c, 130_000);
        assert_eq!(w.peek(&c, 150_000), (2, Duration::from_millis(10_000)));
        assert_eq!(w.peek(&c, 170_000), (1, Duration::from_millis(20_000)));
        assert_eq!(w.len(), 2);
        assert!(!w.is_idle(&c, 189_999));
        assert!(w.is_idle(&c, 190_000));
    }

    #[test]
    fn early_clock_readings_keep_history() {
        let mut w = RateWindow::new();
        let c = cfg(1, 60);
        assert_eq!(w.admit(&c, 0), WindowDecision::Allowed);
        assert!(matches!(w.admit(&c, 10), WindowDecision::Rejected { .. }));
    }
}
