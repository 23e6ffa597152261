//! Live capability adapters.
//!
//! The state store doubles as scale gateway and status store in standalone
//! mode; rates come from Prometheus or from a fixed value.

use anyhow::Context;
use elastic_metrics::PrometheusClient;
use elastic_state::{PolicyStatus, StateError, StateStore, WorkloadRef};

use crate::capability::{CapabilityFuture, RateSource, ScaleGateway, ScaleReading, StatusStore};

/// Counter the default rate query is computed over.
pub const DEFAULT_RATE_METRIC: &str = "rabbitmq_queue_messages_published_total";

/// Range window of the default rate query.
pub const DEFAULT_RATE_WINDOW: &str = "1m";

impl ScaleGateway for StateStore {
    fn get<'a>(
        &'a self,
        namespace: &'a str,
        deployment: &'a str,
    ) -> CapabilityFuture<'a, ScaleReading> {
        Box::pin(async move {
            let key = format!("{namespace}/{deployment}");
            let scale = self
                .get_scale(&key)?
                .ok_or_else(|| StateError::NotFound(format!("scale {key}")))?;
            Ok(ScaleReading {
                declared: scale.declared,
                actual: scale.actual,
            })
        })
    }

    fn update<'a>(
        &'a self,
        namespace: &'a str,
        deployment: &'a str,
        replicas: u32,
    ) -> CapabilityFuture<'a, ()> {
        Box::pin(async move {
            self.set_declared_replicas(&format!("{namespace}/{deployment}"), replicas)?;
            Ok(())
        })
    }
}

impl StatusStore for StateStore {
    fn update<'a>(&'a self, key: &'a str, status: PolicyStatus) -> CapabilityFuture<'a, ()> {
        Box::pin(async move {
            self.update_policy_status(key, &status)?;
            Ok(())
        })
    }
}

/// Rate of a queue's published-messages counter, read from Prometheus.
#[derive(Debug, Clone)]
pub struct PrometheusRateSource {
    client: PrometheusClient,
    metric: String,
    window: String,
}

impl PrometheusRateSource {
    pub fn new(client: PrometheusClient) -> Self {
        Self {
            client,
            metric: DEFAULT_RATE_METRIC.to_string(),
            window: DEFAULT_RATE_WINDOW.to_string(),
        }
    }

    /// Use a different counter metric.
    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    /// Use a different range window, e.g. `30s` or `5m`.
    pub fn with_window(mut self, window: impl Into<String>) -> Self {
        self.window = window.into();
        self
    }

    /// The PromQL expression for `workload`.
    pub fn query_for(&self, workload: &WorkloadRef) -> String {
        let queue = workload.queue.replace('\\', "\\\\").replace('\'', "\\'");
        format!("rate({}{{queue='{}'}}[{}])", self.metric, queue, self.window)
    }
}

impl RateSource for PrometheusRateSource {
    fn get_rate<'a>(&'a self, workload: &'a WorkloadRef) -> CapabilityFuture<'a, f64> {
        Box::pin(async move {
            let query = self.query_for(workload);
            let rate = self
                .client
                .query_scalar(&query)
                .await
                .with_context(|| format!("querying rate of queue {}", workload.queue))?;
            Ok(rate)
        })
    }
}

/// Reports the same rate for every workload.
#[derive(Debug, Clone, Copy)]
pub struct FixedRateSource(pub f64);

impl RateSource for FixedRateSource {
    fn get_rate<'a>(&'a self, _workload: &'a WorkloadRef) -> CapabilityFuture<'a, f64> {
        let rate = self.0;
        Box::pin(async move { Ok(rate) })
    }
}
