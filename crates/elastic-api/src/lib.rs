//! elastic-api — REST API for Elasticity policies.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/policies` | List all policies |
//! | POST | `/api/v1/policies` | Create or update a policy |
//! | GET | `/api/v1/policies/{id}` | Get a policy with its status |
//! | DELETE | `/api/v1/policies/{id}` | Delete a policy |
//! | GET | `/api/v1/scales/{id}` | Get the scale record of a deployment |
//! | PUT | `/api/v1/scales/{id}` | Report declared and/or actual replicas |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |
//!
//! Ids are `{namespace}/{name}` with the slash URL-encoded (`payroll%2Fapi`).

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use elastic_metrics::ControllerMetrics;
use elastic_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub metrics: Arc<ControllerMetrics>,
}

/// Build the complete API router (REST + metrics + health).
pub fn build_router(store: StateStore, metrics: Arc<ControllerMetrics>) -> Router {
    let state = ApiState { store, metrics };

    let api_routes = Router::new()
        .route(
            "/policies",
            get(handlers::list_policies).post(handlers::apply_policy),
        )
        .route(
            "/policies/{id}",
            get(handlers::get_policy).delete(handlers::delete_policy),
        )
        .route(
            "/scales/{id}",
            get(handlers::get_scale).put(handlers::report_scale),
        )
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
        .route("/healthz", get(handlers::healthz))
}
