//! Storage seams used by the orchestration core.
//!
//! The orchestrator, compensator and dispatcher only see these traits, so
//! they run unchanged against Postgres in production and the in-memory
//! implementations in tests.

use async_trait::async_trait;
use unplugd_core::job_status::{self, JobStatus};
use unplugd_core::types::{ConnectionId, JobId, Timestamp};

use crate::models::connection::Connection;
use crate::models::job::{Job, NewJob, StatusUpdate};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("Invalid status transition from {current} to {requested}")]
    InvalidTransition {
        current: JobStatus,
        requested: JobStatus,
    },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn job_not_found(owner_id: &str, job_id: JobId) -> Self {
        StoreError::NotFound {
            entity: "Job",
            id: format!("{owner_id}/{job_id}"),
        }
    }
}

/// Durable, keyed job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a job in `PENDING_UPLOAD`.
    async fn create(&self, job: NewJob) -> Result<Job, StoreError>;

    async fn get(&self, owner_id: &str, job_id: JobId) -> Result<Job, StoreError>;

    /// Write a new status together with the fields it sets and clears.
    ///
    /// Never inserts. Returns `NotFound` when the record is missing and
    /// `InvalidTransition` when the edge (or the expected-status guard)
    /// rejects the write.
    async fn update_status(
        &self,
        owner_id: &str,
        job_id: JobId,
        update: StatusUpdate,
    ) -> Result<Job, StoreError>;

    /// An owner's jobs, newest first.
    async fn list_by_owner(
        &self,
        owner_id: &str,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, StoreError>;

    /// Returns `true` if a record was removed.
    async fn delete(&self, owner_id: &str, job_id: JobId) -> Result<bool, StoreError>;
}

/// Live client connections indexed by owner.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn put(&self, connection: Connection) -> Result<(), StoreError>;

    /// Idempotent: deleting an unknown connection returns `Ok(false)`.
    async fn delete(&self, connection_id: &str) -> Result<bool, StoreError>;

    /// IDs of the owner's connections that have not expired.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ConnectionId>, StoreError>;

    /// Remove connections expired at `now`. Returns the number removed.
    async fn purge_expired(&self, now: Timestamp) -> Result<u64, StoreError>;
}

/// Check a status update against the current status.
///
/// Applies the expected-status guard first, then the transition graph
/// (or the retry edge when the update is an explicit retry).
pub fn check_update(current: JobStatus, update: &StatusUpdate) -> Result<(), StoreError> {
    let rejected = || StoreError::InvalidTransition {
        current,
        requested: update.status,
    };

    if !update.expected.is_empty() && !update.expected.contains(&current) {
        return Err(rejected());
    }

    let allowed = if update.retry {
        job_status::validate_retry(current).is_ok() && update.status == JobStatus::Processing
    } else {
        job_status::can_transition(current, update.status)
    };

    if allowed {
        Ok(())
    } else {
        Err(rejected())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn guard_rejects_unexpected_current() {
        let update = StatusUpdate::new(JobStatus::Processing).expecting(&[JobStatus::PendingUpload]);
        assert_matches!(
            check_update(JobStatus::Processing, &update),
            Err(StoreError::InvalidTransition {
                current: JobStatus::Processing,
                requested: JobStatus::Processing
            })
        );
    }

    #[test]
    fn graph_rejects_terminal_rewrite() {
        let update = StatusUpdate::new(JobStatus::Failed);
        assert!(check_update(JobStatus::Completed, &update).is_err());
    }

    #[test]
    fn retry_edge_requires_flag() {
        let plain = StatusUpdate::new(JobStatus::Processing);
        assert!(check_update(JobStatus::Failed, &plain).is_err());
        let retry = StatusUpdate::new(JobStatus::Processing).as_retry();
        assert!(check_update(JobStatus::Failed, &retry).is_ok());
    }

    #[test]
    fn retry_flag_does_not_open_other_edges() {
        let retry = StatusUpdate::new(JobStatus::Processing).as_retry();
        assert!(check_update(JobStatus::Completed, &retry).is_err());
        let retry_to_completed = StatusUpdate::new(JobStatus::Completed).as_retry();
        assert!(check_update(JobStatus::Failed, &retry_to_completed).is_err());
    }

    #[test]
    fn stage_bookkeeping_allowed() {
        let update = StatusUpdate::new(JobStatus::Processing).stage("transcription");
        assert!(check_update(JobStatus::Processing, &update).is_ok());
    }
}
