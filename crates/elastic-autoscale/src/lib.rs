//! elastic-autoscale — buffered replica planning and reconciliation.
//!
//! Reads Elasticity policies from the state store, samples the workload
//! ingestion rate, and drives the managed deployment towards a base pool
//! sized to current load plus a buffer pool of pre-warmed standby
//! instances.
//!
//! # Planning Algorithm
//!
//! ```text
//! if rate < capacity:
//!     return (minReplicas + buffer.initial, buffer.initial)
//!
//! seed   = status.bufferedReplicas or buffer.initial
//! base   = ceil(rate / capacity)
//! buffer = grow by 1 if overflow into the buffer exceeds threshold%,
//!          shrink by 1 (floor 1) if the base pool alone covers the rate
//! total  = base + buffer
//!
//! if total > maxReplicas:
//!     (maxReplicas, buffer.initial)
//! ```
//!
//! # Reconciliation
//!
//! ```text
//! store events ──► WorkQueue (dedup, per-key exclusion, delayed requeue)
//!                     │
//!                     ▼  N workers
//!              Controller::reconcile(key)
//!                ├── RateSource::get_rate
//!                ├── ScaleGateway::get
//!                ├── planner::calc_replicas
//!                ├── decide (pause / bound / cooldown)
//!                └── ScaleGateway::update + StatusStore::update
//! ```
//!
//! Scale-up is immediate; scale-down waits for the cooldown window since the
//! last scale action.

pub mod capability;
pub mod config;
pub mod controller;
pub mod error;
pub mod planner;
pub mod queue;
pub mod rate_limit;
pub mod sources;
pub mod watch;

pub use capability::{RateSource, ScaleGateway, ScaleReading, StatusStore};
pub use config::ControllerConfig;
pub use controller::{
    Controller, NoChangeReason, ReconcileOutcome, SCALED_MESSAGE, ScaleDecision, ScaleDirection,
    decide,
};
pub use error::{ReconcileError, ReconcileResult};
pub use planner::ReplicaPlan;
pub use queue::WorkQueue;
pub use rate_limit::RateLimiter;
pub use sources::{FixedRateSource, PrometheusRateSource};
