//! Repository for the `jobs` table.
//!
//! Every query is keyed by the composite `(owner_id, job_id)` identity.

use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use unplugd_core::job_status::JobStatus;
use unplugd_core::types::JobId;

use crate::models::job::{JobRow, NewJob, StatusUpdate};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    owner_id, job_id, status_id, stage, title, source_key, content_type, \
    content_metadata, error_message, artifact_locations, execution_ref, \
    created_at, updated_at, completed_at";

/// Provides CRUD operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new job in `PENDING_UPLOAD`.
    pub async fn create(pool: &PgPool, input: &NewJob) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (owner_id, job_id, status_id, title, source_key, content_type) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(&input.owner_id)
            .bind(input.job_id)
            .bind(JobStatus::PendingUpload.id())
            .bind(&input.title)
            .bind(&input.source_key)
            .bind(&input.content_type)
            .fetch_one(pool)
            .await
    }

    pub async fn find(
        pool: &PgPool,
        owner_id: &str,
        job_id: JobId,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE owner_id = $1 AND job_id = $2");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(owner_id)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// Lock the row for the duration of the surrounding transaction.
    pub async fn find_for_update(
        conn: &mut PgConnection,
        owner_id: &str,
        job_id: JobId,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE owner_id = $1 AND job_id = $2 FOR UPDATE"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(owner_id)
            .bind(job_id)
            .fetch_optional(conn)
            .await
    }

    /// Apply a status update. Never inserts: returns `None` if the row is gone.
    ///
    /// Transition checks are the caller's job; this only writes.
    pub async fn apply_update(
        conn: &mut PgConnection,
        owner_id: &str,
        job_id: JobId,
        update: &StatusUpdate,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE jobs SET status_id = ");
        qb.push_bind(update.status.id());
        qb.push(", updated_at = NOW()");

        if let Some(stage) = &update.stage {
            qb.push(", stage = ").push_bind(stage.clone());
        }
        if let Some(message) = &update.error_message {
            qb.push(", error_message = ").push_bind(message.clone());
        }
        if let Some(locations) = &update.artifact_locations {
            qb.push(", artifact_locations = ")
                .push_bind(sqlx::types::Json(locations.clone()));
        }
        if let Some(execution_ref) = &update.execution_ref {
            qb.push(", execution_ref = ").push_bind(execution_ref.clone());
        }
        if let Some(metadata) = &update.content_metadata {
            qb.push(", content_metadata = ").push_bind(metadata.clone());
        }
        if let Some(at) = update.completed_at {
            qb.push(", completed_at = ").push_bind(at);
        }
        for field in update.effective_clears() {
            qb.push(format!(", {} = NULL", field.column()));
        }

        qb.push(" WHERE owner_id = ").push_bind(owner_id.to_string());
        qb.push(" AND job_id = ").push_bind(job_id);
        qb.push(format!(" RETURNING {COLUMNS}"));

        qb.build_query_as::<JobRow>().fetch_optional(conn).await
    }

    /// List an owner's jobs, newest first, optionally filtered by status.
    pub async fn list_by_owner(
        pool: &PgPool,
        owner_id: &str,
        status: Option<JobStatus>,
    ) -> Result<Vec<JobRow>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM jobs WHERE owner_id = "));
        qb.push_bind(owner_id.to_string());
        if let Some(status) = status {
            qb.push(" AND status_id = ").push_bind(status.id());
        }
        qb.push(" ORDER BY created_at DESC, job_id DESC");

        qb.build_query_as::<JobRow>().fetch_all(pool).await
    }

    /// Delete a job. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, owner_id: &str, job_id: JobId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jobs WHERE owner_id = $1 AND job_id = $2")
            .bind(owner_id)
            .bind(job_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
