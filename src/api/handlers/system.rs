//! Liveness endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the snapshot store cannot be read.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Modification time of the stored schedule, if there is one.
    pub schedule_modified: Option<DateTime<Utc>>,
}

/// `GET /health`: Process liveness and the age of the stored schedule.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    responses(
        (status = 200, description = "Process is up", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let none: &[&str] = &[];
    let (status, schedule_modified) = match state.events.get_latest_snapshot(none).await {
        Ok(snapshot) if snapshot.fingerprint.is_empty() => ("ok", None),
        Ok(snapshot) => ("ok", Some(snapshot.modified_at)),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not read snapshot");
            ("degraded", None)
        }
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schedule_modified,
    })
}

/// Routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
