//! Per-key requeue delays.
//!
//! A healthy key is redelivered once per poll interval. A failing key backs
//! off exponentially from the base delay, never faster than the poll
//! interval and never slower than the cap. Success resets the history.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::ControllerConfig;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    poll_interval: Duration,
    failure_base: Duration,
    failure_max: Duration,
    failures: HashMap<String, u32>,
}

impl RateLimiter {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            failure_base: config.failure_base_delay,
            failure_max: config.failure_max_delay.max(config.poll_interval),
            failures: HashMap::new(),
        }
    }

    /// Record a failure of `key` and return the delay before its retry.
    pub fn on_failure(&mut self, key: &str) -> Duration {
        let count = self.failures.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);

        // Double per failure; the shift is bounded so it cannot overflow.
        let exponent = (*count - 1).min(31);
        let backoff = self
            .failure_base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.failure_max);

        backoff.max(self.poll_interval).min(self.failure_max)
    }

    /// Drop the failure history of `key`.
    pub fn forget(&mut self, key: &str) {
        self.failures.remove(key);
    }

    /// Consecutive failures recorded for `key`.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(poll: u64, base: u64, max: u64) -> RateLimiter {
        RateLimiter::new(&ControllerConfig {
            poll_interval: Duration::from_secs(poll),
            failure_base_delay: Duration::from_secs(base),
            failure_max_delay: Duration::from_secs(max),
            ..ControllerConfig::default()
        })
    }

    #[test]
    fn failures_double_up_to_cap() {
        let mut rl = limiter(1, 5, 60);
        let delays: Vec<u64> = (0..6).map(|_| rl.on_failure("a/b").as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
        assert_eq!(rl.num_requeues("a/b"), 6);
    }

    #[test]
    fn backoff_never_faster_than_poll_interval() {
        let mut rl = limiter(10, 5, 300);
        assert_eq!(rl.on_failure("a/b"), Duration::from_secs(10));
        assert_eq!(rl.on_failure("a/b"), Duration::from_secs(10));
        assert_eq!(rl.on_failure("a/b"), Duration::from_secs(20));
    }

    #[test]
    fn cap_below_poll_interval_uses_poll_interval() {
        let mut rl = limiter(30, 5, 10);
        for _ in 0..5 {
            assert_eq!(rl.on_failure("a/b"), Duration::from_secs(30));
        }
    }

    #[test]
    fn forget_resets_history() {
        let mut rl = limiter(1, 5, 60);
        rl.on_failure("a/b");
        rl.on_failure("a/b");
        rl.forget("a/b");
        assert_eq!(rl.num_requeues("a/b"), 0);
        assert_eq!(rl.on_failure("a/b"), Duration::from_secs(5));
    }

    #[test]
    fn keys_are_independent() {
        let mut rl = limiter(1, 5, 60);
        rl.on_failure("a/b");
        rl.on_failure("a/b");
        assert_eq!(rl.on_failure("c/d"), Duration::from_secs(5));
    }

    #[test]
    fn many_failures_do_not_overflow() {
        let mut rl = limiter(1, 5, 300);
        for _ in 0..100 {
            assert!(rl.on_failure("a/b") <= Duration::from_secs(300));
        }
    }
}
