//! Schedule read handlers: full schedule, change feed, session lookup.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{ChangesParams, ScheduleResponse};
use crate::app_state::AppState;
use crate::domain::{ChangeSet, Session};
use crate::error::{BackendError, ErrorResponse};

/// Splits every `If-None-Match` header into its candidate etags.
fn if_none_match(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// `GET /schedule`: Latest full schedule.
///
/// # Errors
///
/// Returns [`BackendError::NotModified`] (rendered as 304) when an
/// `If-None-Match` candidate matches, or a store error.
#[utoipa::path(
    get,
    path = "/api/v1/schedule",
    tag = "Schedule",
    summary = "Get the schedule",
    description = "Returns the latest schedule snapshot. Honours `If-None-Match` with quoted etags and `*`.",
    params(
        ("If-None-Match" = Option<String>, Header, description = "Candidate etags"),
    ),
    responses(
        (status = 200, description = "Current schedule", body = ScheduleResponse),
        (status = 304, description = "Schedule unchanged"),
        (status = 500, description = "Store failure", body = ErrorResponse),
    )
)]
pub async fn get_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, BackendError> {
    let etags = if_none_match(&headers);
    let snapshot = state.events.get_latest_snapshot(etags.as_slice()).await?;

    let mut response_headers = HeaderMap::new();
    if !snapshot.fingerprint.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", snapshot.fingerprint)) {
            response_headers.insert(header::ETAG, value);
        }
    }
    Ok((
        StatusCode::OK,
        response_headers,
        Json(ScheduleResponse::from(snapshot)),
    ))
}

/// `GET /changes?since=`: Everything that changed after a timestamp.
///
/// # Errors
///
/// Returns [`BackendError::InvalidRequest`] if `since` is missing, or a
/// store error.
#[utoipa::path(
    get,
    path = "/api/v1/changes",
    tag = "Schedule",
    summary = "Get changes since a timestamp",
    description = "Merges every change record newer than `since`, oldest first, into one change set.",
    params(ChangesParams),
    responses(
        (status = 200, description = "Merged changes", body = ChangeSet),
        (status = 400, description = "Missing or malformed timestamp", body = ErrorResponse),
    )
)]
pub async fn get_changes(
    State(state): State<AppState>,
    Query(params): Query<ChangesParams>,
) -> Result<Json<ChangeSet>, BackendError> {
    let since = params
        .since
        .ok_or_else(|| BackendError::InvalidRequest("missing `since` timestamp".to_string()))?;
    let changes = state.events.changes_since(since).await?;
    Ok(Json(changes))
}

/// `GET /sessions/{id}`: One session of the latest schedule.
///
/// # Errors
///
/// Returns [`BackendError::NotFound`] for unknown ids.
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}",
    tag = "Schedule",
    summary = "Get a session",
    params(("id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "The session", body = Session),
        (status = 404, description = "No such session", body = ErrorResponse),
    )
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, BackendError> {
    let session = state.events.get_session_by_id(&id).await?;
    Ok(Json(session))
}

/// Schedule routes, mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/schedule", get(get_schedule))
        .route("/changes", get(get_changes))
        .route("/sessions/{id}", get(get_session))
}
