//! In-memory stores with the same semantics as the Postgres ones.
//!
//! Used by tests and by local runs without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use unplugd_core::job_status::JobStatus;
use unplugd_core::types::{ConnectionId, JobId, OwnerId, Timestamp};

use crate::models::connection::Connection;
use crate::models::job::{Job, JobField, NewJob, StatusUpdate};
use crate::store::{check_update, ConnectionRegistry, JobStore, StoreError};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<(OwnerId, JobId), Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

fn apply(job: &mut Job, update: StatusUpdate, now: Timestamp) {
    for field in update.effective_clears().collect::<Vec<_>>() {
        match field {
            JobField::Stage => job.stage = None,
            JobField::ErrorMessage => job.error_message = None,
            JobField::ArtifactLocations => job.artifact_locations = None,
            JobField::ExecutionRef => job.execution_ref = None,
            JobField::CompletedAt => job.completed_at = None,
        }
    }

    job.status = update.status;
    job.updated_at = now;
    if let Some(stage) = update.stage {
        job.stage = Some(stage);
    }
    if let Some(message) = update.error_message {
        job.error_message = Some(message);
    }
    if let Some(locations) = update.artifact_locations {
        job.artifact_locations = Some(locations);
    }
    if let Some(execution_ref) = update.execution_ref {
        job.execution_ref = Some(execution_ref);
    }
    if let Some(metadata) = update.content_metadata {
        job.content_metadata = Some(metadata);
    }
    if let Some(at) = update.completed_at {
        job.completed_at = Some(at);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, input: NewJob) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let key = (input.owner_id.clone(), input.job_id);
        if jobs.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                entity: "Job",
                id: format!("{}/{}", input.owner_id, input.job_id),
            });
        }

        let now = chrono::Utc::now();
        let job = Job {
            owner_id: input.owner_id,
            job_id: input.job_id,
            status: JobStatus::PendingUpload,
            stage: None,
            title: input.title,
            source_key: input.source_key,
            content_type: input.content_type,
            content_metadata: None,
            error_message: None,
            artifact_locations: None,
            execution_ref: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        jobs.insert(key, job.clone());
        Ok(job)
    }

    async fn get(&self, owner_id: &str, job_id: JobId) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(&(owner_id.to_string(), job_id))
            .cloned()
            .ok_or_else(|| StoreError::job_not_found(owner_id, job_id))
    }

    async fn update_status(
        &self,
        owner_id: &str,
        job_id: JobId,
        update: StatusUpdate,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&(owner_id.to_string(), job_id))
            .ok_or_else(|| StoreError::job_not_found(owner_id, job_id))?;

        check_update(job.status, &update)?;
        apply(job, update, chrono::Utc::now());
        Ok(job.clone())
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|j| j.owner_id == owner_id)
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.job_id.cmp(&a.job_id))
        });
        Ok(result)
    }

    async fn delete(&self, owner_id: &str, job_id: JobId) -> Result<bool, StoreError> {
        Ok(self
            .jobs
            .write()
            .await
            .remove(&(owner_id.to_string(), job_id))
            .is_some())
    }
}

#[derive(Default)]
pub struct MemoryConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl MemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a row exists for `connection_id`, expired or not.
    pub async fn contains(&self, connection_id: &str) -> bool {
        self.connections.read().await.contains_key(connection_id)
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryConnectionRegistry {
    async fn put(&self, connection: Connection) -> Result<(), StoreError> {
        self.connections
            .write()
            .await
            .insert(connection.connection_id.clone(), connection);
        Ok(())
    }

    async fn delete(&self, connection_id: &str) -> Result<bool, StoreError> {
        Ok(self.connections.write().await.remove(connection_id).is_some())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ConnectionId>, StoreError> {
        let now = chrono::Utc::now();
        let connections = self.connections.read().await;
        let mut live: Vec<&Connection> = connections
            .values()
            .filter(|c| c.owner_id == owner_id && !c.is_expired_at(now))
            .collect();
        live.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        Ok(live.into_iter().map(|c| c.connection_id.clone()).collect())
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<u64, StoreError> {
        let mut connections = self.connections.write().await;
        let before = connections.len();
        connections.retain(|_, c| !c.is_expired_at(now));
        Ok((before - connections.len()) as u64)
    }
}
