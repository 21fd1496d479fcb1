//! HTTP control plane.
//!
//! One POST surface starts a repair run; the handler always answers with
//! the structured run result, never an exception body.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::orchestrator::{Orchestrator, RunResult};

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    #[serde(default)]
    task: String,
}

/// Build the router for the control plane.
pub fn build_app(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cir/run", post(run_task))
        .with_state(AppState { orchestrator })
}

/// Bind and serve until the process is stopped.
pub async fn serve(orchestrator: Arc<Orchestrator>, port: u16) -> anyhow::Result<()> {
    let app = build_app(orchestrator);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "control plane listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn run_task(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> impl IntoResponse {
    if request.task.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "task must not be empty" })),
        );
    }

    let result = match state.orchestrator.run_task(&request.task).await {
        Ok(result) => result,
        Err(err) => {
            // transport exhaustion and other fatal errors become a
            // structured failure, never a thrown response
            error!(error = %err, "run failed before producing a result");
            RunResult {
                success: false,
                total_iterations: 0,
                status: format!("run failed: {err:#}"),
                details: String::new(),
            }
        }
    };

    (
        StatusCode::OK,
        Json(serde_json::to_value(&result).unwrap_or_else(|_| json!({ "success": false }))),
    )
}
