//! Postgres-backed stores delegating to the SQL repositories.

use async_trait::async_trait;
use sqlx::PgPool;
use unplugd_core::job_status::JobStatus;
use unplugd_core::types::{ConnectionId, JobId, Timestamp};

use crate::models::connection::Connection;
use crate::models::job::{Job, NewJob, StatusUpdate};
use crate::repositories::{ConnectionRepo, JobRepo};
use crate::store::{check_update, ConnectionRegistry, JobStore, StoreError};

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> Result<Job, StoreError> {
        match JobRepo::create(&self.pool, &job).await {
            Ok(row) => Job::try_from(row),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::AlreadyExists {
                    entity: "Job",
                    id: format!("{}/{}", job.owner_id, job.job_id),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, owner_id: &str, job_id: JobId) -> Result<Job, StoreError> {
        JobRepo::find(&self.pool, owner_id, job_id)
            .await?
            .ok_or_else(|| StoreError::job_not_found(owner_id, job_id))
            .and_then(Job::try_from)
    }

    async fn update_status(
        &self,
        owner_id: &str,
        job_id: JobId,
        update: StatusUpdate,
    ) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;

        let current = JobRepo::find_for_update(&mut *tx, owner_id, job_id)
            .await?
            .ok_or_else(|| StoreError::job_not_found(owner_id, job_id))
            .and_then(Job::try_from)?;
        check_update(current.status, &update)?;

        let row = JobRepo::apply_update(&mut *tx, owner_id, job_id, &update)
            .await?
            .ok_or_else(|| StoreError::job_not_found(owner_id, job_id))?;
        tx.commit().await?;

        Job::try_from(row)
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, StoreError> {
        JobRepo::list_by_owner(&self.pool, owner_id, status)
            .await?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    async fn delete(&self, owner_id: &str, job_id: JobId) -> Result<bool, StoreError> {
        Ok(JobRepo::delete(&self.pool, owner_id, job_id).await?)
    }
}

#[derive(Clone)]
pub struct PgConnectionRegistry {
    pool: PgPool,
}

impl PgConnectionRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionRegistry for PgConnectionRegistry {
    async fn put(&self, connection: Connection) -> Result<(), StoreError> {
        Ok(ConnectionRepo::upsert(&self.pool, &connection).await?)
    }

    async fn delete(&self, connection_id: &str) -> Result<bool, StoreError> {
        Ok(ConnectionRepo::delete(&self.pool, connection_id).await?)
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ConnectionId>, StoreError> {
        Ok(ConnectionRepo::list_live_ids_by_owner(&self.pool, owner_id).await?)
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<u64, StoreError> {
        Ok(ConnectionRepo::delete_expired(&self.pool, now).await?)
    }
}
