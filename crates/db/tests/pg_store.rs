//! Postgres store tests.
//!
//! Run with `DATABASE_URL` pointing at a server and `--ignored`.

use assert_matches::assert_matches;
use sqlx::PgPool;
use unplugd_core::job_status::JobStatus;
use unplugd_db::models::connection::Connection;
use unplugd_db::models::job::{ArtifactLocations, JobField, NewJob, StatusUpdate};
use unplugd_db::{ConnectionRegistry, JobStore, PgConnectionRegistry, PgJobStore, StoreError};

fn new_job(owner: &str) -> NewJob {
    let job_id = uuid::Uuid::now_v7();
    NewJob {
        owner_id: owner.to_string(),
        job_id,
        title: "song.mp3".to_string(),
        source_key: format!("uploads/{owner}/{job_id}/song.mp3"),
        content_type: None,
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn bootstrap_seeds_job_statuses(pool: PgPool) {
    unplugd_db::health_check(&pool).await.unwrap();

    let names: Vec<String> = sqlx::query_scalar("SELECT name FROM job_statuses ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    let expected: Vec<String> = JobStatus::ALL.iter().map(|s| s.as_str().to_string()).collect();
    assert_eq!(names, expected);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn full_lifecycle_clears_error_on_completion(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = store.create(new_job("u1")).await.unwrap();

    store
        .update_status(
            "u1",
            job.job_id,
            StatusUpdate::new(JobStatus::Processing)
                .expecting(&[JobStatus::PendingUpload])
                .execution_ref("run-1")
                .content_metadata(serde_json::json!({"durationSecs": 200})),
        )
        .await
        .unwrap();
    store
        .update_status(
            "u1",
            job.job_id,
            StatusUpdate::new(JobStatus::Failed).error_message("TaskExecutionError: boom"),
        )
        .await
        .unwrap();
    store
        .update_status("u1", job.job_id, StatusUpdate::new(JobStatus::Processing).as_retry())
        .await
        .unwrap();

    let locations = ArtifactLocations::from([(
        "transcript".to_string(),
        format!("output/u1/{}/lyrics.json", job.job_id),
    )]);
    let done = store
        .update_status(
            "u1",
            job.job_id,
            StatusUpdate::new(JobStatus::Completed)
                .expecting(&[JobStatus::Processing])
                .artifact_locations(locations.clone())
                .completed_at(chrono::Utc::now())
                .clear(JobField::ErrorMessage)
                .clear(JobField::Stage),
        )
        .await
        .unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.error_message.is_none());
    assert_eq!(done.artifact_locations, Some(locations));
    assert_eq!(
        done.content_metadata,
        Some(serde_json::json!({"durationSecs": 200}))
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn update_after_delete_is_not_found(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let job = store.create(new_job("u1")).await.unwrap();
    assert!(store.delete("u1", job.job_id).await.unwrap());

    let result = store
        .update_status("u1", job.job_id, StatusUpdate::new(JobStatus::Processing))
        .await;
    assert_matches!(result, Err(StoreError::NotFound { .. }));
    assert!(store.list_by_owner("u1", None).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn duplicate_create_is_already_exists(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let input = new_job("u1");
    store.create(input.clone()).await.unwrap();

    assert_matches!(
        store.create(input).await,
        Err(StoreError::AlreadyExists { .. })
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore]
async fn connections_expire_and_purge(pool: PgPool) {
    let registry = PgConnectionRegistry::new(pool);
    registry
        .put(Connection::open("c1", "u1", chrono::Duration::hours(2)))
        .await
        .unwrap();
    registry
        .put(Connection::open("c2", "u1", chrono::Duration::seconds(-5)))
        .await
        .unwrap();

    assert_eq!(registry.list_by_owner("u1").await.unwrap(), vec!["c1"]);
    assert_eq!(registry.purge_expired(chrono::Utc::now()).await.unwrap(), 1);
    assert!(!registry.delete("c2").await.unwrap());
    assert!(registry.delete("c1").await.unwrap());
}
