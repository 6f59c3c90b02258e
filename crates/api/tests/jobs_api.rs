//! Integration tests for the `/api/v1/jobs` and `/internal/v1` surfaces.

mod common;

use axum::extract::ws::Message;
use axum::http::StatusCode;
use common::{body_json, build_test_app, build_test_app_with, TestApp, UPLOAD_BUCKET};
use serde_json::json;
use unplugd_core::stages::StageKind;
use unplugd_db::models::connection::Connection;
use unplugd_db::ConnectionRegistry;
use unplugd_pipeline::runners::Script;
use unplugd_pipeline::{ObjectStore, StageError};

const OWNER: &str = "alice";

/// Create a job over HTTP and put its upload in place. Returns the job id.
async fn uploaded_job(app: &TestApp) -> (String, String) {
    let response = app
        .post_json(
            "/api/v1/jobs",
            Some(OWNER),
            json!({ "filename": "song.mp3", "contentType": "audio/mpeg" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let data = body_json(response).await["data"].clone();
    let job_id = data["jobId"].as_str().unwrap().to_string();
    let source_key = data["sourceKey"].as_str().unwrap().to_string();

    app.objects
        .put(UPLOAD_BUCKET, &source_key, b"ID3 audio".to_vec())
        .await
        .unwrap();
    (job_id, source_key)
}

async fn start(app: &TestApp, job_id: &str, source_key: &str) -> axum::response::Response {
    app.post_json(
        "/internal/v1/orchestrations",
        None,
        json!({
            "ownerId": OWNER,
            "jobId": job_id,
            "source": { "bucket": UPLOAD_BUCKET, "key": source_key },
            "contentMetadata": { "sizeBytes": 9 },
        }),
    )
    .await
}

async fn job_json(app: &TestApp, job_id: &str) -> serde_json::Value {
    let response = app.get(&format!("/api/v1/jobs/{job_id}"), Some(OWNER)).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["data"].clone()
}

// ---------------------------------------------------------------------------
// Caller identity
// ---------------------------------------------------------------------------

/// Requests without the owner header are rejected.
#[tokio::test]
async fn test_missing_owner_header_is_401() {
    let app = build_test_app();
    let response = app.get("/api/v1/jobs", None).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UNAUTHORIZED");
}

/// An owner id that would span key segments is rejected before any job
/// is created under it.
#[tokio::test]
async fn test_owner_with_path_separator_is_401() {
    let app = build_test_app();
    let response = app
        .post_json("/api/v1/jobs", Some("alice/../bob"), json!({ "filename": "song.mp3" }))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.jobs.is_empty().await);
}

/// The internal start endpoint applies the same owner rule.
#[tokio::test]
async fn test_internal_start_rejects_owner_with_separator() {
    let app = build_test_app();
    let (job_id, source_key) = uploaded_job(&app).await;

    let response = app
        .post_json(
            "/internal/v1/orchestrations",
            None,
            json!({
                "ownerId": "alice/x",
                "jobId": job_id,
                "source": { "bucket": UPLOAD_BUCKET, "key": source_key },
            }),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(job_json(&app, &job_id).await["status"], "PENDING_UPLOAD");
}

/// A job is invisible to other owners.
#[tokio::test]
async fn test_other_owner_gets_404() {
    let app = build_test_app();
    let (job_id, _) = uploaded_job(&app).await;

    let response = app.get(&format!("/api/v1/jobs/{job_id}"), Some("mallory")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Create / list / get
// ---------------------------------------------------------------------------

/// Creating a job returns its upload location under the owner's prefix.
#[tokio::test]
async fn test_create_job_returns_upload_location() {
    let app = build_test_app();
    let response = app
        .post_json("/api/v1/jobs", Some(OWNER), json!({ "filename": "song.mp3" }))
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let data = body_json(response).await["data"].clone();
    let job_id = data["jobId"].as_str().unwrap();
    assert_eq!(data["status"], "PENDING_UPLOAD");
    assert_eq!(data["uploadBucket"], UPLOAD_BUCKET);
    assert_eq!(
        data["sourceKey"],
        format!("uploads/{OWNER}/{job_id}/song.mp3")
    );
}

/// Path separators in the filename are a validation error.
#[tokio::test]
async fn test_create_job_rejects_bad_filename() {
    let app = build_test_app();
    let response = app
        .post_json("/api/v1/jobs", Some(OWNER), json!({ "filename": "../etc/passwd" }))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

/// Empty filenames fail request validation.
#[tokio::test]
async fn test_create_job_rejects_empty_filename() {
    let app = build_test_app();
    let response = app
        .post_json("/api/v1/jobs", Some(OWNER), json!({ "filename": "" }))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// Listing filters by status and rejects unknown statuses.
#[tokio::test]
async fn test_list_jobs_with_status_filter() {
    let app = build_test_app();
    uploaded_job(&app).await;
    uploaded_job(&app).await;

    let response = app.get("/api/v1/jobs", Some(OWNER)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 2);

    let response = app.get("/api/v1/jobs?status=PENDING_UPLOAD", Some(OWNER)).await;
    assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 2);

    let response = app.get("/api/v1/jobs?status=COMPLETED", Some(OWNER)).await;
    assert!(body_json(response).await["data"].as_array().unwrap().is_empty());

    let response = app.get("/api/v1/jobs?status=DONE", Some(OWNER)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// A started job runs to COMPLETED and exposes its artifacts.
#[tokio::test]
async fn test_start_runs_job_to_completion() {
    let app = build_test_app();
    let (job_id, source_key) = uploaded_job(&app).await;

    let response = start(&app, &job_id, &source_key).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let data = body_json(response).await["data"].clone();
    assert_eq!(data["status"], "PROCESSING");
    assert!(data["executionRef"].is_string());

    app.state.jobs.wait_idle().await;

    let job = job_json(&app, &job_id).await;
    assert_eq!(job["status"], "COMPLETED");
    assert!(job["artifactLocations"].is_object());
    assert!(job["errorMessage"].is_null());
    assert!(job["completedAt"].is_string());
}

/// A second start for the same job is rejected.
#[tokio::test]
async fn test_second_start_is_409() {
    let app = build_test_app();
    let (job_id, source_key) = uploaded_job(&app).await;

    assert_eq!(start(&app, &job_id, &source_key).await.status(), StatusCode::ACCEPTED);
    let response = start(&app, &job_id, &source_key).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "ALREADY_STARTED");

    app.state.jobs.wait_idle().await;
    assert_eq!(app.runner.invocations(StageKind::Separation), 1);
}

/// Starting a job that does not exist is 404.
#[tokio::test]
async fn test_start_unknown_job_is_404() {
    let app = build_test_app();
    let response = start(&app, &uuid::Uuid::new_v4().to_string(), "uploads/alice/x/song.mp3").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// A permanent stage failure ends FAILED, and retry re-runs it.
#[tokio::test]
async fn test_failed_job_can_be_retried() {
    let app = build_test_app_with(|runner| {
        runner.script(
            StageKind::Separation,
            [Script::Fail(StageError::validation("unsupported codec"))],
        )
    });
    let (job_id, source_key) = uploaded_job(&app).await;

    start(&app, &job_id, &source_key).await;
    app.state.jobs.wait_idle().await;

    let job = job_json(&app, &job_id).await;
    assert_eq!(job["status"], "FAILED");
    assert!(job["errorMessage"].as_str().unwrap().contains("unsupported codec"));
    assert!(job["artifactLocations"].is_null());

    let response = app
        .post_json(&format!("/api/v1/jobs/{job_id}/retry"), Some(OWNER), json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    app.state.jobs.wait_idle().await;

    let job = job_json(&app, &job_id).await;
    assert_eq!(job["status"], "COMPLETED");
    assert!(job["errorMessage"].is_null());
}

/// Retry of a job that is not FAILED is a conflict.
#[tokio::test]
async fn test_retry_pending_job_is_409() {
    let app = build_test_app();
    let (job_id, _) = uploaded_job(&app).await;

    let response = app
        .post_json(&format!("/api/v1/jobs/{job_id}/retry"), Some(OWNER), json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "NOT_RETRYABLE");
}

/// Lifecycle notices reach the owner's WebSocket connection.
#[tokio::test]
async fn test_lifecycle_notices_reach_local_socket() {
    let app = build_test_app();
    let mut rx = app.state.ws_manager.add("conn-1".into(), OWNER).await;
    app.connections
        .put(Connection::open("conn-1", OWNER, chrono::Duration::hours(2)))
        .await
        .unwrap();

    let (job_id, source_key) = uploaded_job(&app).await;
    start(&app, &job_id, &source_key).await;
    app.state.jobs.wait_idle().await;

    let mut types = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(json["jobId"], job_id);
            types.push(json["type"].as_str().unwrap().to_string());
        }
    }
    assert_eq!(types, vec!["PROCESSING_STARTED", "COMPLETED"]);
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Worker progress is accepted and published on the bus.
#[tokio::test]
async fn test_progress_is_published() {
    let app = build_test_app();
    let mut receiver = app.state.event_bus.subscribe();
    let job_id = uuid::Uuid::new_v4();

    let response = app
        .post_json(
            "/internal/v1/progress",
            None,
            json!({
                "ownerId": OWNER,
                "event": { "jobId": job_id, "stage": "separation", "percent": 40, "message": "demucs" },
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let notice = receiver.recv().await.unwrap();
    assert_eq!(notice.owner_id, OWNER);
    assert_eq!(notice.event.job_id, job_id);
    assert_eq!(notice.event.percent, 40);
}

/// Out-of-range progress is rejected.
#[tokio::test]
async fn test_progress_rejects_percent_over_100() {
    let app = build_test_app();
    let response = app
        .post_json(
            "/internal/v1/progress",
            None,
            json!({
                "ownerId": OWNER,
                "event": { "jobId": uuid::Uuid::new_v4(), "stage": "separation", "percent": 140 },
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// Deleting a completed job removes the record, the upload and artifacts.
#[tokio::test]
async fn test_delete_removes_everything() {
    let app = build_test_app();
    let (job_id, source_key) = uploaded_job(&app).await;
    start(&app, &job_id, &source_key).await;
    app.state.jobs.wait_idle().await;

    let response = app.delete(&format!("/api/v1/jobs/{job_id}"), Some(OWNER)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(!app.objects.exists(UPLOAD_BUCKET, &source_key).await.unwrap());
    let outputs = app
        .objects
        .list(common::OUTPUT_BUCKET, &format!("output/{OWNER}/{job_id}/"))
        .await
        .unwrap();
    assert!(outputs.is_empty());
    assert!(app.jobs.is_empty().await);

    let response = app.delete(&format!("/api/v1/jobs/{job_id}"), Some(OWNER)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
