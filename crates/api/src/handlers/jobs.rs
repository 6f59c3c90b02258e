//! Handlers for the `/jobs` resource.
//!
//! All endpoints identify the caller via [`Caller`]; a caller only ever
//! sees and touches their own jobs.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use unplugd_core::error::CoreError;
use unplugd_core::job_status::JobStatus;
use unplugd_core::types::JobId;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::owner::Caller;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
    #[validate(length(max = 255))]
    pub content_type: Option<String>,
}

/// Where the client should upload the media for a new job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedJob {
    pub job_id: JobId,
    pub status: JobStatus,
    pub upload_bucket: String,
    pub source_key: String,
}

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
}

pub(crate) fn validation_error(err: validator::ValidationErrors) -> AppError {
    AppError::Core(CoreError::Validation(err.to_string()))
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Create a `PENDING_UPLOAD` job. Returns 201 with the upload location.
pub async fn create_job(
    caller: Caller,
    State(state): State<AppState>,
    Json(input): Json<CreateJobRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate().map_err(validation_error)?;

    let job = state
        .jobs
        .create_job(&caller.owner_id, &input.filename, input.content_type)
        .await?;

    let created = CreatedJob {
        job_id: job.job_id,
        status: job.status,
        upload_bucket: state.jobs.upload_bucket().to_string(),
        source_key: job.source_key,
    };
    Ok((StatusCode::CREATED, Json(DataResponse { data: created })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// The caller's jobs, newest first, optionally filtered by `status`.
pub async fn list_jobs(
    caller: Caller,
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let status = params.status.as_deref().map(JobStatus::parse).transpose()?;
    let jobs = state.jobs.list(&caller.owner_id, status).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{job_id}
pub async fn get_job(
    caller: Caller,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.jobs.get(&caller.owner_id, job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// DELETE /api/v1/jobs/{job_id}
///
/// Removes artifacts, the upload and the record. Returns 204, or 404 if
/// there was no record.
pub async fn delete_job(
    caller: Caller,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<StatusCode> {
    if state.jobs.delete(&caller.owner_id, job_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{job_id}/retry
///
/// Re-run a FAILED job from its original upload. Returns 202, or 409 if
/// the job is not FAILED.
pub async fn retry_job(
    caller: Caller,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.jobs.retry(&caller.owner_id, job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}
