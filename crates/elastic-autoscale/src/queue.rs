//! Deduplicating work queue with per-key exclusion.
//!
//! ```text
//!   add ──► dirty? ──yes──► (no-op)
//!             │no
//!             ▼
//!        processing? ──yes──► mark dirty, redeliver on done()
//!             │no
//!             ▼
//!          queue ──get()──► processing ──done()──► (dirty? requeue)
//! ```
//!
//! Delayed adds keep a single pending wake-up per key; an earlier deadline
//! replaces a later one. Failure requeues take their delay from the
//! [`RateLimiter`] and always replace the pending wake-up, so a failure
//! right after a scheduled poll waits out its backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::trace;

use crate::config::ControllerConfig;
use crate::rate_limit::RateLimiter;

/// Shared handle to the queue; clones refer to the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,
    notify: Notify,
    poll_interval: Duration,
}

struct Inner {
    queue: VecDeque<String>,
    /// Keys that need processing: queued, or re-added while in flight.
    dirty: HashSet<String>,
    processing: HashSet<String>,
    /// Deadline of the pending delayed add per key.
    waiting: HashMap<String, Instant>,
    shutting_down: bool,
    limiter: RateLimiter,
}

impl Inner {
    /// Returns true if a worker should be woken.
    fn add(&mut self, key: &str) -> bool {
        if self.shutting_down || self.dirty.contains(key) {
            return false;
        }
        self.dirty.insert(key.to_string());
        if self.processing.contains(key) {
            return false;
        }
        self.queue.push_back(key.to_string());
        true
    }
}

impl WorkQueue {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    waiting: HashMap::new(),
                    shutting_down: false,
                    limiter: RateLimiter::new(config),
                }),
                notify: Notify::new(),
                poll_interval: config.poll_interval,
            }),
        }
    }

    /// Interval between periodic deliveries of a healthy key.
    pub fn poll_interval(&self) -> Duration {
        self.shared.poll_interval
    }

    /// Enqueue `key` for immediate delivery.
    pub async fn add(&self, key: &str) {
        let wake = self.shared.inner.lock().await.add(key);
        if wake {
            trace!(%key, "queued");
            self.shared.notify.notify_one();
        }
    }

    /// Enqueue `key` once `delay` has elapsed.
    ///
    /// A pending earlier wake-up of the same key wins.
    pub async fn add_after(&self, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key).await;
            return;
        }
        self.schedule(key, delay, false).await;
    }

    /// Enqueue a failed `key` after its backoff delay.
    ///
    /// The backoff replaces any pending wake-up of the key.
    pub async fn add_rate_limited(&self, key: &str) -> Duration {
        let delay = self.shared.inner.lock().await.limiter.on_failure(key);
        self.schedule(key, delay, true).await;
        delay
    }

    async fn schedule(&self, key: &str, delay: Duration, replace_pending: bool) {
        let deadline = Instant::now() + delay;
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.shutting_down {
                return;
            }
            if !replace_pending
                && matches!(inner.waiting.get(key), Some(pending) if *pending <= deadline)
            {
                return;
            }
            inner.waiting.insert(key.to_string(), deadline);
        }

        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let wake = {
                let mut inner = queue.shared.inner.lock().await;
                // Superseded by another wake-up.
                if inner.waiting.get(&key) != Some(&deadline) {
                    return;
                }
                inner.waiting.remove(&key);
                inner.add(&key)
            };
            if wake {
                queue.shared.notify.notify_one();
            }
        });
    }

    /// Clear the failure history of `key`.
    pub async fn forget(&self, key: &str) {
        self.shared.inner.lock().await.limiter.forget(key);
    }

    /// Consecutive failure requeues of `key`.
    pub async fn num_requeues(&self, key: &str) -> u32 {
        self.shared.inner.lock().await.limiter.num_requeues(key)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The returned key is marked in-flight until [`done`](Self::done).
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent wake-up is not lost.
            notified.as_mut().enable();
            {
                let mut inner = self.shared.inner.lock().await;
                if inner.shutting_down {
                    return None;
                }
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark `key` as no longer in flight, redelivering it if it was re-added
    /// meanwhile.
    pub async fn done(&self, key: &str) {
        let wake = {
            let mut inner = self.shared.inner.lock().await;
            inner.processing.remove(key);
            if inner.dirty.contains(key) && !inner.shutting_down {
                inner.queue.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if wake {
            self.shared.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker.
    pub async fn shut_down(&self) {
        self.shared.inner.lock().await.shutting_down = true;
        self.shared.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.shared.inner.lock().await.shutting_down
    }

    /// Keys ready for delivery.
    pub async fn len(&self) -> usize {
        self.shared.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_processing(&self, key: &str) -> bool {
        self.shared.inner.lock().await.processing.contains(key)
    }
}
