//! Internal endpoints for the intake collaborator and the workers.
//!
//! These sit behind the network boundary rather than the owner header: the
//! caller states the owner explicitly.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use unplugd_core::job_events::ProgressEvent;
use unplugd_core::storage_keys::{validate_owner_id, ObjectRef};
use unplugd_core::types::JobId;
use unplugd_events::ProgressNotice;
use unplugd_pipeline::StartRequest;
use validator::Validate;

use crate::error::AppResult;
use crate::handlers::jobs::validation_error;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOrchestrationRequest {
    pub owner_id: String,
    pub job_id: JobId,
    pub source: ObjectRef,
    #[serde(default)]
    pub content_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    pub owner_id: String,
    pub event: ProgressEvent,
}

/// POST /internal/v1/orchestrations
///
/// Start a run for an uploaded job. Returns 202, or 409 if the job was
/// already started.
pub async fn start_orchestration(
    State(state): State<AppState>,
    Json(input): Json<StartOrchestrationRequest>,
) -> AppResult<impl IntoResponse> {
    validate_owner_id(&input.owner_id)?;

    let job = state
        .jobs
        .start(StartRequest {
            owner_id: input.owner_id,
            job_id: input.job_id,
            source: input.source,
            content_metadata: input.content_metadata,
        })
        .await?;

    tracing::info!(
        job_id = %job.job_id,
        owner_id = %job.owner_id,
        execution_ref = job.execution_ref.as_deref().unwrap_or_default(),
        "Orchestration started",
    );
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}

/// POST /internal/v1/progress
///
/// Fire-and-forget worker progress. Returns 202 once the event is on the
/// bus; delivery happens out of band.
pub async fn publish_progress(
    State(state): State<AppState>,
    Json(input): Json<ProgressRequest>,
) -> AppResult<StatusCode> {
    validate_owner_id(&input.owner_id)?;
    input.event.validate().map_err(validation_error)?;

    state
        .event_bus
        .publish(ProgressNotice::new(input.owner_id, input.event));
    Ok(StatusCode::ACCEPTED)
}
