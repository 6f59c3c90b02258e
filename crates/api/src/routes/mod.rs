pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                     list, create
/// /jobs/{job_id}            get, delete
/// /jobs/{job_id}/retry      retry a FAILED job
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/jobs",
            get(handlers::jobs::list_jobs).post(handlers::jobs::create_job),
        )
        .route(
            "/jobs/{job_id}",
            get(handlers::jobs::get_job).delete(handlers::jobs::delete_job),
        )
        .route("/jobs/{job_id}/retry", post(handlers::jobs::retry_job))
}

/// Build the `/internal/v1` route tree.
///
/// ```text
/// /orchestrations           start a run for an uploaded job
/// /progress                 worker progress events
/// ```
pub fn internal_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/orchestrations",
            post(handlers::internal::start_orchestration),
        )
        .route("/progress", post(handlers::internal::publish_progress))
}
