//! Controller configuration, constructed once and passed to the controller.

use std::time::Duration;

/// Tunables of the reconcile loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Interval between periodic deliveries of an unchanged key.
    pub poll_interval: Duration,
    /// Minimum time since the last scale action before a scale-down.
    pub scale_down_cooldown: Duration,
    /// Number of parallel workers draining the queue.
    pub workers: usize,
    /// First retry delay for a failing key; doubles on each failure.
    pub failure_base_delay: Duration,
    /// Upper bound of the failure backoff.
    pub failure_max_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            scale_down_cooldown: Duration::from_secs(3 * 60),
            workers: 1,
            failure_base_delay: Duration::from_secs(5),
            failure_max_delay: Duration::from_secs(300),
        }
    }
}
