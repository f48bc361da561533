//! Sync trigger handlers.
//!
//! Unauthorised calls get an empty `200 OK`.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::JobResponse;
use crate::app_state::AppState;
use crate::error::{BackendError, ErrorResponse};
use crate::service::{Caller, SyncOutcome};

/// Shared-token header sent by the upstream change notification channel.
pub const CHANNEL_TOKEN_HEADER: &str = "x-goog-channel-token";
/// Header set by the cron scheduler.
pub const CRON_HEADER: &str = "x-cron";
/// Header set by the task queue.
pub const TASK_NAME_HEADER: &str = "x-task-name";

/// Identifies the caller from request headers.
///
/// Scheduler and queue headers mark an internal caller only when
/// `trust_scheduler_headers` is set, which requires a front end that strips
/// them from outside requests. Otherwise every caller is judged by the
/// channel token.
#[must_use]
pub fn caller(headers: &HeaderMap, trust_scheduler_headers: bool) -> Caller {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    if trust_scheduler_headers {
        let cron = header(CRON_HEADER).is_some_and(|v| v == "true");
        let task = header(TASK_NAME_HEADER).is_some_and(|v| !v.is_empty());
        if cron || task {
            return Caller::Scheduler;
        }
    }
    Caller::Token(header(CHANNEL_TOKEN_HEADER).map(str::to_string))
}

fn outcome_response(outcome: &SyncOutcome) -> Response {
    let body = match outcome {
        SyncOutcome::Unauthorized => return StatusCode::OK.into_response(),
        SyncOutcome::AlreadyRunning => JobResponse::status("already_running"),
        SyncOutcome::NotModified => JobResponse::status("not_modified"),
        SyncOutcome::EmptyDiff => JobResponse::status("empty_diff"),
        SyncOutcome::Synced { sessions } => JobResponse::counted("synced", *sessions),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// `POST /sync/gcs`: Pull the upstream schedule and fan out changes.
///
/// # Errors
///
/// Returns the failing step's error; nothing was written in that case.
#[utoipa::path(
    post,
    path = "/sync/gcs",
    tag = "Jobs",
    summary = "Sync the schedule",
    description = "Fetches the upstream manifest, diffs it against the stored snapshot, stores both and queues notifications.",
    responses(
        (status = 200, description = "Sync outcome, or empty when unauthorised", body = JobResponse),
        (status = 500, description = "Sync failed", body = ErrorResponse),
    )
)]
pub async fn sync_gcs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, BackendError> {
    let outcome = state.sync.run(&caller(&headers, state.trust_scheduler_headers)).await?;
    Ok(outcome_response(&outcome))
}

/// `POST /sync/reset`: Forget stored snapshots so the next sync is full.
///
/// # Errors
///
/// Returns a store or cache error.
#[utoipa::path(
    post,
    path = "/sync/reset",
    tag = "Jobs",
    summary = "Reset stored schedule",
    responses(
        (status = 200, description = "Snapshots deleted, or empty when unauthorised", body = JobResponse),
        (status = 500, description = "Reset failed", body = ErrorResponse),
    )
)]
pub async fn sync_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, BackendError> {
    if !state.sync.authorized(&caller(&headers, state.trust_scheduler_headers)) {
        tracing::warn!("unauthorized reset request dropped");
        return Ok(StatusCode::OK.into_response());
    }
    let deleted = state.events.reset().await?;
    Ok((StatusCode::OK, Json(JobResponse::counted("reset", deleted))).into_response())
}

/// Sync routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/gcs", post(sync_gcs))
        .route("/sync/reset", post(sync_reset))
}
