//! Local test API endpoints
//!
//! This module implements the HTTP endpoints served with `--serve-api`, which
//! run jobs synchronously through the same handler the queue worker uses.

use crate::core::client::WebUiClient;
use crate::core::config::Config;
use crate::core::constants::status;
use crate::core::handler::JobHandler;
use crate::models::job::JobResult;
use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub handler: Arc<JobHandler>,
    /// Client without retries, used for health probes
    pub probe: WebUiClient,
}

/// Body of `POST /runsync`
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub input: Value,
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/runsync", post(run_sync))
        .route("/health", get(health_check))
        .with_state(state)
}

/// POST /runsync - Run a job and wait for its result
async fn run_sync(State(state): State<AppState>, Json(request): Json<RunRequest>) -> Json<Value> {
    let job_id = uuid::Uuid::new_v4().to_string();
    info!("📥 Local job {} received", job_id);
    debug!("Job input: {}", request.input);

    let output = state.handler.handle(request.input).await;

    let body = match JobResult::from_output(output) {
        JobResult::Output(output) => json!({
            "id": job_id,
            "status": status::COMPLETED,
            "output": output,
        }),
        JobResult::Error(error) => json!({
            "id": job_id,
            "status": status::FAILED,
            "error": error,
        }),
    };
    Json(body)
}

/// GET / - Root endpoint
async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "message": "Stable Diffusion WebUI worker",
        "status": "running",
        "config": {
            "webui_base_url": state.config.webui.base_url,
            "checkpoint": state.config.webui.checkpoint,
            "inference_timeout": state.config.request.inference_timeout,
        },
        "endpoints": {
            "runsync": "/runsync",
            "health": "/health",
        },
    }))
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let webui_ready = state.probe.check_ready().await.is_ok();
    Json(json!({
        "status": if webui_ready { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "webui_ready": webui_ready,
    }))
}
