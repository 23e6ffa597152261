//! Capabilities the reconcile loop depends on.
//!
//! Each is a trait object injected at construction so the live adapters
//! (state store, Prometheus) and test doubles are interchangeable. Methods
//! return boxed futures to keep the traits object-safe.

use std::future::Future;
use std::pin::Pin;

use elastic_state::{PolicyStatus, WorkloadRef};

/// Boxed future alias for capability results.
pub type CapabilityFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Declared and observed instance counts of a managed deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleReading {
    /// `spec.replicas`: what the deployment is asked to run.
    pub declared: u32,
    /// `status.replicas`: what is actually running.
    pub actual: u32,
}

/// Yields the current ingestion rate of a workload.
///
/// Implementations must bound their own latency: a stalled backend has to
/// surface as an error rather than block the caller.
pub trait RateSource: Send + Sync {
    fn get_rate<'a>(&'a self, workload: &'a WorkloadRef) -> CapabilityFuture<'a, f64>;
}

/// Reads and writes the scale subresource of a managed deployment.
pub trait ScaleGateway: Send + Sync {
    fn get<'a>(
        &'a self,
        namespace: &'a str,
        deployment: &'a str,
    ) -> CapabilityFuture<'a, ScaleReading>;

    fn update<'a>(
        &'a self,
        namespace: &'a str,
        deployment: &'a str,
        replicas: u32,
    ) -> CapabilityFuture<'a, ()>;
}

/// Persists the observable status of a policy.
pub trait StatusStore: Send + Sync {
    fn update<'a>(&'a self, key: &'a str, status: PolicyStatus) -> CapabilityFuture<'a, ()>;
}
