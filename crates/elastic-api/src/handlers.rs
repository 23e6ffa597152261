//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns JSON responses.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{info, warn};

use elastic_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn internal_error(e: StateError) -> axum::response::Response {
    warn!(error = %e, "state store request failed");
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

// ── Policies ───────────────────────────────────────────────────

/// Create-or-update request: identity plus the declared spec. Status is
/// owned by the controller and cannot be set here.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApplyPolicyRequest {
    pub namespace: String,
    pub name: String,
    pub spec: PolicySpec,
}

/// GET /api/v1/policies
pub async fn list_policies(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_policies() {
        Ok(policies) => ApiResponse::ok(policies).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/policies/{id}
pub async fn get_policy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_policy(&id) {
        Ok(Some(policy)) => ApiResponse::ok(policy).into_response(),
        Ok(None) => error_response("policy not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /api/v1/policies
///
/// Returns 201 for a new policy and 200 when an existing spec was replaced.
pub async fn apply_policy(
    State(state): State<ApiState>,
    Json(req): Json<ApplyPolicyRequest>,
) -> impl IntoResponse {
    let candidate = Policy::new(&req.namespace, &req.name, req.spec.clone(), 0);
    if let Err(e) = candidate.validate() {
        return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
    }

    let key = candidate.table_key();
    let existed = match state.store.get_policy(&key) {
        Ok(existing) => existing.is_some(),
        Err(e) => return internal_error(e),
    };

    match state.store.apply_policy(&req.namespace, &req.name, req.spec) {
        Ok(policy) => {
            info!(policy = %key, created = !existed, "policy applied");
            let status = if existed {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (status, ApiResponse::ok(policy)).into_response()
        }
        Err(e) => internal_error(e),
    }
}

/// DELETE /api/v1/policies/{id}
pub async fn delete_policy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_policy(&id) {
        Ok(true) => {
            info!(policy = %id, "policy deleted");
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response("policy not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Scales ─────────────────────────────────────────────────────

/// Replica counts reported by the platform. Omitted fields are kept.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ScaleReport {
    pub declared: Option<u32>,
    pub actual: Option<u32>,
}

/// GET /api/v1/scales/{id}
pub async fn get_scale(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_scale(&id) {
        Ok(Some(scale)) => ApiResponse::ok(scale).into_response(),
        Ok(None) => error_response("scale not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => internal_error(e),
    }
}

/// PUT /api/v1/scales/{id}
pub async fn report_scale(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(report): Json<ScaleReport>,
) -> impl IntoResponse {
    let Some((namespace, deployment)) = split_key(&id) else {
        return error_response(
            "id must be {namespace}/{deployment}",
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    };
    if report.declared.is_none() && report.actual.is_none() {
        return error_response("declared or actual is required", StatusCode::BAD_REQUEST)
            .into_response();
    }

    match state
        .store
        .report_scale(namespace, deployment, report.declared, report.actual)
    {
        Ok(scale) => ApiResponse::ok(scale).into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Metrics ────────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let gauges = state.metrics.snapshot().await;
    let body = elastic_metrics::render_prometheus(&gauges);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use elastic_metrics::{ControllerMetrics, Observation};

    fn test_state() -> ApiState {
        ApiState {
            store: StateStore::open_in_memory().unwrap(),
            metrics: Arc::new(ControllerMetrics::new()),
        }
    }

    fn test_request(ns: &str, name: &str) -> ApplyPolicyRequest {
        ApplyPolicyRequest {
            namespace: ns.to_string(),
            name: name.to_string(),
            spec: PolicySpec {
                deployment: DeploymentRef {
                    name: "choreography".to_string(),
                    capacity: 8,
                    min_replicas: 1,
                    max_replicas: 20,
                },
                buffer: BufferSpec {
                    initial: 1,
                    threshold: 50,
                },
                workload: WorkloadRef {
                    queue: "payroll.runs".to_string(),
                },
            },
        }
    }

    #[tokio::test]
    async fn list_policies_empty() {
        let resp = list_policies(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn apply_creates_then_updates() {
        let state = test_state();

        let resp = apply_policy(State(state.clone()), Json(test_request("payroll", "api")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let mut update = test_request("payroll", "api");
        update.spec.deployment.max_replicas = 30;
        let resp = apply_policy(State(state.clone()), Json(update))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let stored = state.store.get_policy("payroll/api").unwrap().unwrap();
        assert_eq!(stored.spec.deployment.max_replicas, 30);
        assert_eq!(stored.status.message, CREATED_MESSAGE);
    }

    #[tokio::test]
    async fn apply_keeps_controller_status() {
        let state = test_state();
        state
            .store
            .apply_policy("payroll", "api", test_request("payroll", "api").spec)
            .unwrap();
        let status = PolicyStatus {
            desired_replicas: 6,
            buffered_replicas: 2,
            ..PolicyStatus::default()
        };
        state
            .store
            .update_policy_status("payroll/api", &status)
            .unwrap();

        let resp = apply_policy(State(state.clone()), Json(test_request("payroll", "api")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            state.store.get_policy("payroll/api").unwrap().unwrap().status,
            status
        );
    }

    #[tokio::test]
    async fn apply_rejects_invalid_spec() {
        let state = test_state();
        let mut req = test_request("payroll", "api");
        req.spec.deployment.min_replicas = 50;
        let resp = apply_policy(State(state.clone()), Json(req))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.get_policy("payroll/api").unwrap().is_none());

        let mut req = test_request("payroll", "api");
        req.spec.deployment.capacity = 0;
        let resp = apply_policy(State(state), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_nonexistent_policy() {
        let resp = get_policy(State(test_state()), Path("payroll/nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_policy_exists_then_missing() {
        let state = test_state();
        state
            .store
            .apply_policy("payroll", "api", test_request("payroll", "api").spec)
            .unwrap();

        let resp = delete_policy(State(state.clone()), Path("payroll/api".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = delete_policy(State(state), Path("payroll/api".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn report_and_get_scale() {
        let state = test_state();
        let resp = report_scale(
            State(state.clone()),
            Path("payroll/choreography".to_string()),
            Json(ScaleReport {
                declared: Some(3),
                actual: Some(2),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = report_scale(
            State(state.clone()),
            Path("payroll/choreography".to_string()),
            Json(ScaleReport {
                declared: None,
                actual: Some(3),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let scale = state.store.get_scale("payroll/choreography").unwrap().unwrap();
        assert_eq!((scale.declared, scale.actual), (3, 3));

        let resp = get_scale(State(state), Path("payroll/choreography".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn report_scale_rejects_bad_input() {
        let state = test_state();
        let resp = report_scale(
            State(state.clone()),
            Path("no-namespace".to_string()),
            Json(ScaleReport {
                declared: Some(1),
                actual: None,
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = report_scale(
            State(state),
            Path("payroll/choreography".to_string()),
            Json(ScaleReport::default()),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_missing_scale() {
        let resp = get_scale(State(test_state()), Path("payroll/nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let state = test_state();
        state
            .metrics
            .record_observation(
                "payroll/api",
                Observation {
                    measured_rate: 20.0,
                    desired_replicas: 4,
                    buffered_replicas: 1,
                    declared_replicas: 3,
                    actual_replicas: 3,
                },
            )
            .await;

        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        assert_eq!(healthz().await.into_response().status(), StatusCode::OK);
    }
}
