//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Schedule reads are mounted under `/api/v1`; job triggers and the health
//! check live at the root.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI description of every endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "schedule-sync", description = "Event schedule sync and notification service"),
    paths(
        handlers::schedule::get_schedule,
        handlers::schedule::get_changes,
        handlers::schedule::get_session,
        handlers::sync::sync_gcs,
        handlers::sync::sync_reset,
        handlers::tasks::run_clock,
        handlers::tasks::run_wipeout,
        handlers::system::health_handler,
    ),
    tags(
        (name = "Schedule", description = "Schedule reads"),
        (name = "Jobs", description = "Background job triggers"),
        (name = "System", description = "Service status"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::sync::routes())
        .merge(handlers::tasks::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}
