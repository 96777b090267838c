//! HTTP Server Module
//!
//! Health and status endpoints for the resident scheduler, for container
//! health checks and a quick look at what is planned today.

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use crate::state::{SchedulerState, SchedulerStateStore};
use crate::templates::{DirectoryCatalog, TemplateCatalog};

#[derive(Clone)]
pub struct AppState {
    pub scheduler_state: Arc<SchedulerStateStore>,
    pub templates_dir: PathBuf,
}

/// Create and configure the HTTP server router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/schedule", get(schedule_endpoint))
        .with_state(state)
}

/// Healthy while at least one template is available to render.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let catalog = DirectoryCatalog::new(&state.templates_dir);
    let templates = tokio::task::spawn_blocking(move || catalog.list_template_ids().map(|ids| ids.len()))
        .await
        .ok()
        .and_then(|listed| listed.ok())
        .unwrap_or(0);

    let (code, status) = if templates > 0 {
        (StatusCode::OK, "ok")
    } else {
        log::warn!("Health check: no templates found in {}", state.templates_dir.display());
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "service": "daily_post_scheduler",
            "timestamp": Utc::now().to_rfc3339(),
            "templates": templates
        })),
    )
}

/// Current scheduler state record
async fn schedule_endpoint(State(state): State<AppState>) -> Json<SchedulerState> {
    let scheduler_state = state.scheduler_state.clone();
    let record = tokio::task::spawn_blocking(move || scheduler_state.read())
        .await
        .unwrap_or_default();
    Json(record)
}

/// Start the HTTP server
pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .context("Failed to bind HTTP server")?;

    log::info!("HTTP server listening on port {}", port);

    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    Ok(())
}
