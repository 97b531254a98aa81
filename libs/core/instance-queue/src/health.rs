//! Health check handlers for instance queue workers.
//!
//! - Liveness checks (`/health`, `/healthz`)
//! - Readiness checks (`/ready`, `/readyz`), ready only while the queue is polling
//! - Prometheus metrics (`/metrics`)

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::metrics;
use crate::queue::QueueState;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub app_name: String,
    pub app_version: String,
    /// Name of the instance queue being served
    pub queue_name: String,
    state: watch::Receiver<QueueState>,
}

impl HealthState {
    /// `state` comes from [`crate::InstanceQueue::subscribe_state`]
    pub fn new(
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        queue_name: impl Into<String>,
        state: watch::Receiver<QueueState>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
            queue_name: queue_name.into(),
            state,
        }
    }

    pub fn queue_state(&self) -> QueueState {
        *self.state.borrow()
    }
}

/// Health response for liveness checks.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "healthy" if responding
    pub status: String,
    pub name: String,
    pub version: String,
}

/// Liveness handler. Always OK while the process serves HTTP.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness handler.
///
/// Ready only while the poll loop is running; provisioning, stopping and a
/// failed loop all report 503.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let queue_state = state.queue_state();
    let body = json!({
        "status": if queue_state == QueueState::Running { "ready" } else { "not_ready" },
        "checks": {
            "queue": state.queue_name,
            "state": format!("{:?}", queue_state).to_lowercase(),
        }
    });

    if queue_state == QueueState::Running {
        Ok((StatusCode::OK, Json(body)))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(body)))
    }
}

/// Prometheus metrics endpoint handler.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Router with `/health`, `/healthz`, `/ready`, `/readyz` and `/metrics`.
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
