// src/handlers/execute.rs
//! Gateway endpoints - run a workflow, report health and status

use axum::{
    body::Bytes,
    extract::{Extension, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::OrchestratorError;
use crate::graph::Workflow;
use crate::AppState;

#[derive(Deserialize)]
pub struct ExecuteParams {
    pub timeout_secs: Option<u64>,
}

/// Decrements the in-flight counter when the request finishes, however it finishes
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// POST /api/execute - Run a workflow (either encoding) and return the artifact bytes
pub async fn execute_workflow(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ExecuteParams>,
    body: Bytes,
) -> Response {
    if state.is_draining() {
        return draining_response();
    }

    let workflow = match Workflow::from_slice(&body) {
        Ok(workflow) => workflow,
        Err(e) => {
            tracing::warn!("Rejected workflow: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "InvalidGraph", "message": e.to_string()})),
            )
                .into_response();
        }
    };

    let timeout = match params.timeout_secs {
        None => state.orchestrator.default_timeout(),
        Some(secs) if secs == 0 || Duration::from_secs(secs) > state.config.max_job_timeout => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "InvalidTimeout",
                    "message": format!(
                        "timeout_secs must be between 1 and {}",
                        state.config.max_job_timeout.as_secs()
                    ),
                })),
            )
                .into_response();
        }
        Some(secs) => Duration::from_secs(secs),
    };

    let _permit = match state.job_slots.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return draining_response(),
    };
    // The engine may have gone away while this request waited for a slot
    if state.is_draining() {
        return draining_response();
    }
    let _in_flight = InFlight::enter(&state.in_flight);

    match state.orchestrator.execute(&workflow, timeout).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) if e.is_fatal() => {
            tracing::error!("🛑 {}; draining container", e);
            state.shutdown.cancel();
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": e.kind(), "message": e.to_string()})),
            )
                .into_response()
        }
        Err(OrchestratorError::CliExecutionFailed {
            exit_code,
            stdout,
            stderr,
        }) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "CliExecutionFailed",
                "exit_code": exit_code,
                "stdout": stdout,
                "stderr": stderr,
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": e.kind(), "message": e.to_string()})),
        )
            .into_response(),
    }
}

/// GET /health - 200 while accepting work
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    if state.is_draining() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::OK, "ok")
    }
}

/// GET /api/status - Engine and job pool snapshot
pub async fn status(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let engine_state = state.orchestrator.lifecycle().state();
    let launcher_pid = state.supervisor.pid().await;
    let launcher_running = state.supervisor.is_running().await;
    let status = if state.is_draining() { "draining" } else { "operational" };

    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "engine": {
            "state": engine_state,
            "port": state.config.engine_port,
            "launcher_pid": launcher_pid,
            "launcher_running": launcher_running,
        },
        "jobs": {
            "in_flight": state.in_flight(),
            "capacity": state.config.max_concurrent_jobs,
            "available_slots": state.job_slots.available_permits(),
        }
    }))
}

fn draining_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "error": "EngineUnhealthy",
            "message": "engine is unhealthy; this container is draining",
        })),
    )
        .into_response()
}

pub fn gateway_routes() -> Router {
    Router::new()
        .route("/api/execute", post(execute_workflow))
        .route("/api/status", get(status))
        .route("/health", get(health))
}
