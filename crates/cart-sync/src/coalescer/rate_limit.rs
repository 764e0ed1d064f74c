//! Per-line interaction spacing

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// Verdict for one interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    /// Spacing respected; clock advanced
    Accepted,
    /// Too soon after the last accepted interaction; clock untouched
    Limited,
}

/// Rate-limit clock: last accepted instant per line
#[derive(Debug)]
pub(crate) struct RateLimiter<K> {
    window: Duration,
    clock: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            clock: HashMap::new(),
        }
    }

    /// Check an interaction at `now`; only accepted interactions move the clock
    pub(crate) fn check(&mut self, key: &K, now: Instant) -> Gate {
        if let Some(last) = self.clock.get(key) {
            if now.saturating_duration_since(*last) < self.window {
                return Gate::Limited;
            }
        }
        self.clock.insert(key.clone(), now);
        Gate::Accepted
    }

    pub(crate) fn forget(&mut self, key: &K) {
        self.clock.remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.clock.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn second_tap_inside_window_is_limited() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert_eq!(limiter.check(&"a", t0), Gate::Accepted);
        assert_eq!(
            limiter.check(&"a", t0 + Duration::from_millis(40)),
            Gate::Limited
        );
        assert_eq!(
            limiter.check(&"a", t0 + Duration::from_millis(100)),
            Gate::Accepted
        );
    }

    #[test]
    fn lines_are_independent() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert_eq!(limiter.check(&"a", t0), Gate::Accepted);
        assert_eq!(limiter.check(&"b", t0), Gate::Accepted);
    }

    #[test]
    fn zero_window_never_limits() {
        let mut limiter = RateLimiter::new(Duration::ZERO);
        let t0 = Instant::now();

        assert_eq!(limiter.check(&"a", t0), Gate::Accepted);
        assert_eq!(limiter.check(&"a", t0), Gate::Accepted);
    }

    #[test]
    fn forget_resets_line() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100));
        let t0 = Instant::now();

        limiter.check(&"a", t0);
        limiter.forget(&"a");
        assert_eq!(limiter.check(&"a", t0), Gate::Accepted);
    }

    proptest! {
        #[test]
        fn accepts_iff_spaced_from_last_accepted(
            window_ms in 0u64..300,
            gaps in proptest::collection::vec(0u64..400, 1..40)
        ) {
            let window = Duration::from_millis(window_ms);
            let mut limiter = RateLimiter::new(window);
            let t0 = Instant::now();

            let mut now = t0;
            let mut last_accepted: Option<Instant> = None;
            for gap in gaps {
                now += Duration::from_millis(gap);
                let expected = match last_accepted {
                    Some(last) if now - last < window => Gate::Limited,
                    _ => Gate::Accepted,
                };
                prop_assert_eq!(limiter.check(&"line", now), expected);
                if expected == Gate::Accepted {
                    last_accepted = Some(now);
                }
            }
        }
    }
}
