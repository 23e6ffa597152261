//! The reconcile loop.
//!
//! Each cycle reads one policy, samples the rate, plans replicas and applies
//! at most one scale action. Keys flow through a [`WorkQueue`], so a policy
//! is never reconciled by two workers at once.
//!
//! ```text
//!   Queued ──get()──► Processing ──┬── Ok        ──► requeue after poll interval
//!                                  ├── Dropped   ──► forgotten
//!                                  └── Err/panic ──► requeue with backoff
//! ```

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use elastic_metrics::{ControllerMetrics, Observation};
use elastic_state::{Policy, PolicyStatus, StateStore, epoch_secs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capability::{RateSource, ScaleGateway, ScaleReading, StatusStore};
use crate::config::ControllerConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::planner::{self, ReplicaPlan};
use crate::queue::WorkQueue;

/// Status message written after an executed scale action.
pub const SCALED_MESSAGE: &str = "Successfully scaled deployment";

/// Why a scale action was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
    /// More instances run than the policy allows.
    BoundCorrection,
}

/// Why no scale action was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoChangeReason {
    /// The deployment declares zero replicas.
    Paused,
    AtTarget,
    /// A scale-down is due but the cooldown has not elapsed.
    CoolingDown,
}

/// Outcome of the decision step for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    ScaleTo {
        replicas: u32,
        buffer: u32,
        direction: ScaleDirection,
    },
    NoChange(NoChangeReason),
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The policy no longer exists.
    Dropped,
    NoChange(NoChangeReason),
    Scaled {
        from: u32,
        to: u32,
        direction: ScaleDirection,
    },
}

/// Decide whether to act on `plan` given the deployment's current scale.
///
/// `now` and the policy's `lastScaleTime` are Unix seconds. A policy that
/// was never scaled is not subject to the cooldown.
pub fn decide(
    policy: &Policy,
    plan: ReplicaPlan,
    reading: ScaleReading,
    now: u64,
    cooldown: Duration,
) -> ScaleDecision {
    if reading.declared == 0 {
        return ScaleDecision::NoChange(NoChangeReason::Paused);
    }
    if reading.declared == plan.total {
        return ScaleDecision::NoChange(NoChangeReason::AtTarget);
    }

    let max = policy.spec.deployment.max_replicas;
    if reading.actual > max {
        return ScaleDecision::ScaleTo {
            replicas: max,
            buffer: plan.buffer,
            direction: ScaleDirection::BoundCorrection,
        };
    }

    if plan.total < reading.declared {
        let cooled_down = match policy.status.last_scale_time {
            Some(last) => now >= last.saturating_add(cooldown.as_secs()),
            None => true,
        };
        if !cooled_down {
            return ScaleDecision::NoChange(NoChangeReason::CoolingDown);
        }
        return ScaleDecision::ScaleTo {
            replicas: plan.total,
            buffer: plan.buffer,
            direction: ScaleDirection::Down,
        };
    }

    ScaleDecision::ScaleTo {
        replicas: plan.total,
        buffer: plan.buffer,
        direction: ScaleDirection::Up,
    }
}

/// Drives every stored policy towards its planned replica count.
pub struct Controller {
    store: StateStore,
    rates: Arc<dyn RateSource>,
    scales: Arc<dyn ScaleGateway>,
    statuses: Arc<dyn StatusStore>,
    metrics: Arc<ControllerMetrics>,
    config: ControllerConfig,
    queue: WorkQueue,
}

impl Controller {
    /// Create a controller reading policies from `store`.
    pub fn new(
        store: StateStore,
        rates: Arc<dyn RateSource>,
        scales: Arc<dyn ScaleGateway>,
        statuses: Arc<dyn StatusStore>,
        metrics: Arc<ControllerMetrics>,
        config: ControllerConfig,
    ) -> Self {
        let queue = WorkQueue::new(&config);
        Self {
            store,
            rates,
            scales,
            statuses,
            metrics,
            config,
            queue,
        }
    }

    /// Standalone wiring: the store also serves as scale gateway and status
    /// store.
    pub fn standalone(
        store: StateStore,
        rates: Arc<dyn RateSource>,
        metrics: Arc<ControllerMetrics>,
        config: ControllerConfig,
    ) -> Self {
        let shared = Arc::new(store.clone());
        Self::new(store, rates, shared.clone(), shared, metrics, config)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Run one reconciliation cycle for `key`.
    pub async fn reconcile(&self, key: &str) -> ReconcileResult<ReconcileOutcome> {
        let Some(policy) = self.store.get_policy(key)? else {
            debug!(policy = %key, "policy no longer exists");
            return Ok(ReconcileOutcome::Dropped);
        };

        let rate = self
            .rates
            .get_rate(&policy.spec.workload)
            .await
            .map_err(ReconcileError::Rate)?;
        if !rate.is_finite() || rate < 0.0 {
            return Err(ReconcileError::InvalidRate(rate));
        }

        let namespace = policy.namespace.as_str();
        let deployment = policy.spec.deployment.name.as_str();
        let reading = self
            .scales
            .get(namespace, deployment)
            .await
            .map_err(|source| ReconcileError::ScaleRead {
                deployment: policy.scale_key(),
                source,
            })?;

        let plan = planner::calc_replicas(&policy, rate, reading.actual);
        let now = epoch_secs();
        let decision = decide(&policy, plan, reading, now, self.config.scale_down_cooldown);

        debug!(
            policy = %key,
            rate,
            declared = reading.declared,
            actual = reading.actual,
            desired = plan.total,
            buffer = plan.buffer,
            ?decision,
            "reconciled"
        );
        self.metrics
            .record_observation(
                key,
                Observation {
                    measured_rate: rate,
                    desired_replicas: plan.total,
                    buffered_replicas: plan.buffer,
                    declared_replicas: reading.declared,
                    actual_replicas: reading.actual,
                },
            )
            .await;

        let (replicas, buffer, direction) = match decision {
            ScaleDecision::NoChange(reason) => return Ok(ReconcileOutcome::NoChange(reason)),
            ScaleDecision::ScaleTo {
                replicas,
                buffer,
                direction,
            } => (replicas, buffer, direction),
        };

        self.scales
            .update(namespace, deployment, replicas)
            .await
            .map_err(|source| ReconcileError::ScaleWrite {
                deployment: policy.scale_key(),
                source,
            })?;
        self.metrics
            .record_scale(key, reading.declared, replicas)
            .await;

        let status = PolicyStatus {
            message: SCALED_MESSAGE.to_string(),
            current_replicas: reading.actual,
            buffered_replicas: buffer,
            desired_replicas: replicas,
            last_scale_time: Some(now),
        };
        self.statuses
            .update(key, status)
            .await
            .map_err(ReconcileError::StatusWrite)?;

        info!(
            policy = %key,
            deployment = %policy.scale_key(),
            from = reading.declared,
            to = replicas,
            buffer,
            ?direction,
            "scaled deployment"
        );
        Ok(ReconcileOutcome::Scaled {
            from: reading.declared,
            to: replicas,
            direction,
        })
    }

    /// Reconcile `key` on its own task so a panic only fails this item.
    async fn reconcile_isolated(self: &Arc<Self>, key: &str) -> ReconcileResult<ReconcileOutcome> {
        let this = Arc::clone(self);
        let owned = key.to_string();
        match tokio::spawn(async move { this.reconcile(&owned).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ReconcileError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(ReconcileError::Panicked(e.to_string())),
        }
    }

    /// Process one dequeued key and schedule its next delivery.
    pub async fn process(self: &Arc<Self>, key: &str) {
        match self.reconcile_isolated(key).await {
            Ok(ReconcileOutcome::Dropped) => {
                self.queue.forget(key).await;
                self.metrics.forget(key).await;
            }
            Ok(_) => {
                self.queue.forget(key).await;
                self.queue.add_after(key, self.queue.poll_interval()).await;
            }
            Err(e) => {
                self.metrics.record_failure(key).await;
                let retry_in = self.queue.add_rate_limited(key).await;
                error!(
                    policy = %key,
                    error = %e,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "reconcile failed"
                );
            }
        }
    }

    async fn worker(self: Arc<Self>, id: usize) {
        debug!(worker = id, "worker started");
        while let Some(key) = self.queue.get().await {
            self.process(&key).await;
            self.queue.done(&key).await;
        }
        debug!(worker = id, "worker stopped");
    }

    /// Enqueue every stored policy.
    ///
    /// Records are not decoded here; a malformed one fails its own cycle.
    pub async fn resync(&self) -> ReconcileResult<usize> {
        let keys = self.store.list_policy_keys()?;
        for key in &keys {
            self.queue.add(key).await;
        }
        Ok(keys.len())
    }

    /// Subscribe to changes, enqueue every stored policy and spawn the
    /// workers.
    ///
    /// An error means the initial sync failed and nothing was started. The
    /// returned handle completes once `shutdown` turns true and in-flight
    /// cycles have finished.
    pub async fn start(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> ReconcileResult<JoinHandle<()>> {
        // Subscribe before the resync so no change falls in between.
        let events = self.store.subscribe();
        let queued = self.resync().await?;

        let producer = tokio::spawn(crate::watch::forward_events(
            self.store.clone(),
            self.queue.clone(),
            events,
            shutdown.clone(),
        ));

        let workers = self.config.workers.max(1);
        let handles: Vec<_> = (0..workers)
            .map(|id| tokio::spawn(Arc::clone(&self).worker(id)))
            .collect();

        info!(
            workers,
            queued,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            scale_down_cooldown_secs = self.config.scale_down_cooldown.as_secs(),
            "controller started"
        );

        Ok(tokio::spawn(self.supervise(shutdown, producer, handles)))
    }

    /// Run until `shutdown` turns true.
    ///
    /// In-flight cycles are allowed to finish; queued keys are discarded.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> ReconcileResult<()> {
        let handle = self.start(shutdown).await?;
        handle
            .await
            .map_err(|e| ReconcileError::Panicked(e.to_string()))
    }

    async fn supervise(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        producer: JoinHandle<()>,
        handles: Vec<JoinHandle<()>>,
    ) {
        // A dropped sender also means stop.
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        info!("controller shutting down");

        self.queue.shut_down().await;
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker exited abnormally");
            }
        }
        if let Err(e) = producer.await {
            warn!(error = %e, "event producer exited abnormally");
        }
        info!("controller stopped");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
