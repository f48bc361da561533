//! Job trigger handlers for the session clock and the wipeout.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use super::sync::caller;
use crate::api::dto::JobResponse;
use crate::app_state::AppState;
use crate::error::{BackendError, ErrorResponse};

/// `POST /task/clock`: Announce starting and upcoming sessions.
///
/// # Errors
///
/// Returns a store error.
#[utoipa::path(
    post,
    path = "/task/clock",
    tag = "Jobs",
    summary = "Run the session clock",
    responses(
        (status = 200, description = "Sessions announced, or empty when unauthorised", body = JobResponse),
        (status = 500, description = "Clock failed", body = ErrorResponse),
    )
)]
pub async fn run_clock(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, BackendError> {
    if !state.sync.authorized(&caller(&headers, state.trust_scheduler_headers)) {
        return Ok(StatusCode::OK.into_response());
    }
    let announced = state.clock.run().await?;
    Ok((StatusCode::OK, Json(JobResponse::counted("announced", announced))).into_response())
}

/// `POST /task/wipeout`: Delete users inactive for 30 days.
///
/// # Errors
///
/// Returns the first shard failure.
#[utoipa::path(
    post,
    path = "/task/wipeout",
    tag = "Jobs",
    summary = "Wipe out inactive users",
    responses(
        (status = 200, description = "Users deleted, or empty when unauthorised", body = JobResponse),
        (status = 500, description = "Wipeout failed", body = ErrorResponse),
    )
)]
pub async fn run_wipeout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, BackendError> {
    if !state.sync.authorized(&caller(&headers, state.trust_scheduler_headers)) {
        return Ok(StatusCode::OK.into_response());
    }
    let deleted = state.wipeout.run().await?;
    Ok((StatusCode::OK, Json(JobResponse::counted("deleted", deleted))).into_response())
}

/// Task routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/task/clock", post(run_clock))
        .route("/task/wipeout", post(run_wipeout))
}
