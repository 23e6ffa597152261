//! elastic-metrics — observability plumbing for the elasticity controller.
//!
//! Two directions:
//!
//! ```text
//! PrometheusClient
//!   └── query_scalar() → instant query against a Prometheus server,
//!                         bounded by a timeout
//!
//! ControllerMetrics
//!   ├── record_*()      ← called by the reconcile loop
//!   ├── snapshot()      → Vec<PolicyGauges>
//!   └── render_prometheus() → text/plain for the /metrics endpoint
//! ```

pub mod gauges;
pub mod prometheus;
pub mod query;

pub use gauges::{ControllerMetrics, Observation, PolicyGauges};
pub use prometheus::render_prometheus;
pub use query::{PrometheusClient, QueryError};
