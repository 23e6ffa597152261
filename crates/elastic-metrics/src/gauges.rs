//! Controller gauges — per-policy view of the last reconciliation.
//!
//! The reconcile loop records every observation and every executed scale
//! action here; the API renders a snapshot for scraping.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

/// Point-in-time gauges and counters for one policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyGauges {
    /// Policy key (`{namespace}/{name}`).
    pub policy: String,
    /// Last measured ingestion rate.
    pub measured_rate: f64,
    /// Total replicas computed by the last cycle.
    pub desired_replicas: u32,
    /// Buffer replicas computed by the last cycle.
    pub buffered_replicas: u32,
    /// Declared replicas of the managed deployment at the last cycle.
    pub declared_replicas: u32,
    /// Observed replicas of the managed deployment at the last cycle.
    pub actual_replicas: u32,
    pub reconciles_total: u64,
    pub failures_total: u64,
    pub scale_ups_total: u64,
    pub scale_downs_total: u64,
}

/// One cycle's inputs and plan, as recorded by the reconcile loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub measured_rate: f64,
    pub desired_replicas: u32,
    pub buffered_replicas: u32,
    pub declared_replicas: u32,
    pub actual_replicas: u32,
}

/// Shared registry of per-policy gauges.
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    policies: RwLock<HashMap<String, PolicyGauges>>,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_entry<F: FnOnce(&mut PolicyGauges)>(&self, policy: &str, f: F) {
        let mut policies = self.policies.write().await;
        let entry = policies
            .entry(policy.to_string())
            .or_insert_with(|| PolicyGauges {
                policy: policy.to_string(),
                ..PolicyGauges::default()
            });
        f(entry);
    }

    /// Record a completed observation (rate sample and computed plan).
    pub async fn record_observation(&self, policy: &str, obs: Observation) {
        self.with_entry(policy, |g| {
            g.measured_rate = obs.measured_rate;
            g.desired_replicas = obs.desired_replicas;
            g.buffered_replicas = obs.buffered_replicas;
            g.declared_replicas = obs.declared_replicas;
            g.actual_replicas = obs.actual_replicas;
            g.reconciles_total += 1;
        })
        .await;
    }

    /// Record an executed scale action from `from` to `to` declared replicas.
    pub async fn record_scale(&self, policy: &str, from: u32, to: u32) {
        self.with_entry(policy, |g| {
            if to > from {
                g.scale_ups_total += 1;
            } else {
                g.scale_downs_total += 1;
            }
            g.declared_replicas = to;
        })
        .await;
    }

    /// Record a failed or panicked cycle.
    pub async fn record_failure(&self, policy: &str) {
        self.with_entry(policy, |g| g.failures_total += 1).await;
    }

    /// Drop the gauges of a policy that no longer exists.
    pub async fn forget(&self, policy: &str) {
        if self.policies.write().await.remove(policy).is_some() {
            debug!(%policy, "policy gauges removed");
        }
    }

    /// Copy out all gauges, sorted by policy key.
    pub async fn snapshot(&self) -> Vec<PolicyGauges> {
        let policies = self.policies.read().await;
        let mut out: Vec<PolicyGauges> = policies.values().cloned().collect();
        out.sort_by(|a, b| a.policy.cmp(&b.policy));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(rate: f64, desired: u32) -> Observation {
        Observation {
            measured_rate: rate,
            desired_replicas: desired,
            buffered_replicas: 1,
            declared_replicas: 3,
            actual_replicas: 3,
        }
    }

    #[tokio::test]
    async fn observation_updates_gauges_and_counts_cycles() {
        let metrics = ControllerMetrics::new();
        metrics.record_observation("payroll/a", obs(20.0, 4)).await;
        metrics.record_observation("payroll/a", obs(22.0, 5)).await;

        let snap = metrics.snapshot().await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].measured_rate, 22.0);
        assert_eq!(snap[0].desired_replicas, 5);
        assert_eq!(snap[0].reconciles_total, 2);
    }

    #[tokio::test]
    async fn scale_direction_is_counted() {
        let metrics = ControllerMetrics::new();
        metrics.record_scale("payroll/a", 3, 5).await;
        metrics.record_scale("payroll/a", 5, 4).await;
        metrics.record_scale("payroll/a", 4, 2).await;

        let snap = metrics.snapshot().await;
        assert_eq!(snap[0].scale_ups_total, 1);
        assert_eq!(snap[0].scale_downs_total, 2);
        assert_eq!(snap[0].declared_replicas, 2);
    }

    #[tokio::test]
    async fn forget_removes_policy_and_snapshot_is_sorted() {
        let metrics = ControllerMetrics::new();
        metrics.record_failure("ns/b").await;
        metrics.record_failure("ns/a").await;
        metrics.record_failure("ns/c").await;
        metrics.forget("ns/c").await;

        let keys: Vec<String> = metrics
            .snapshot()
            .await
            .into_iter()
            .map(|g| g.policy)
            .collect();
        assert_eq!(keys, vec!["ns/a", "ns/b"]);
    }
}
