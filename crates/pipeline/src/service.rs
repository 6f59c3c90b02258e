//! Job intake and the admission gate in front of orchestration.
//!
//! [`JobService`] owns every spawned run. Runs wait on a semaphore before
//! `ValidateInput`, so at most `max_concurrent_runs` execute stages at once;
//! the rest queue in order of arrival. A [`TaskTracker`] lets shutdown drain
//! in-flight runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use unplugd_core::error::CoreError;
use unplugd_core::job_events::PushMessage;
use unplugd_core::job_status::JobStatus;
use unplugd_core::storage_keys::{output_prefix, upload_key, upload_prefix, validate_filename, ObjectRef};
use unplugd_core::types::{new_job_id, JobId};
use unplugd_db::models::job::{Job, JobField, NewJob, StatusUpdate};
use unplugd_db::{JobStore, StoreError};
use unplugd_events::NotificationDispatcher;

use crate::object_store::{ObjectStore, StorageError};
use crate::orchestrator::{Orchestrator, RunRequest};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from starting or retrying a run.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("Job not found: {owner_id}/{job_id}")]
    NotFound { owner_id: String, job_id: JobId },

    #[error("Job already started (status {0})")]
    AlreadyStarted(JobStatus),

    #[error("Only FAILED jobs can be retried (status {0})")]
    NotRetryable(JobStatus),

    #[error(transparent)]
    Store(StoreError),
}

/// Errors from the job read/write paths other than start.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Intake -> orchestrator start.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub owner_id: String,
    pub job_id: JobId,
    pub source: ObjectRef,
    pub content_metadata: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct JobService {
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    orchestrator: Arc<Orchestrator>,
    dispatcher: Arc<NotificationDispatcher>,
    admission: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        orchestrator: Arc<Orchestrator>,
        dispatcher: Arc<NotificationDispatcher>,
        max_concurrent_runs: usize,
    ) -> Self {
        Self {
            jobs,
            objects,
            orchestrator,
            dispatcher,
            admission: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    pub fn upload_bucket(&self) -> &str {
        &self.orchestrator.settings().upload_bucket
    }

    fn output_bucket(&self) -> &str {
        &self.orchestrator.settings().output_bucket
    }

    /// Create a `PENDING_UPLOAD` job whose upload goes to
    /// `uploads/{owner}/{job}/{filename}`.
    pub async fn create_job(
        &self,
        owner_id: &str,
        filename: &str,
        content_type: Option<String>,
    ) -> Result<Job, ServiceError> {
        validate_filename(filename)?;
        let job_id = new_job_id();
        let job = self
            .jobs
            .create(NewJob {
                owner_id: owner_id.to_string(),
                job_id,
                title: filename.to_string(),
                source_key: upload_key(owner_id, job_id, filename),
                content_type,
            })
            .await?;
        tracing::info!(owner_id, job_id = %job_id, "Job created");
        Ok(job)
    }

    /// Read model: artifact locations are only exposed once COMPLETED.
    pub async fn get(&self, owner_id: &str, job_id: JobId) -> Result<Job, ServiceError> {
        Ok(read_model(self.jobs.get(owner_id, job_id).await?))
    }

    pub async fn list(
        &self,
        owner_id: &str,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, ServiceError> {
        let jobs = self.jobs.list_by_owner(owner_id, status).await?;
        Ok(jobs.into_iter().map(read_model).collect())
    }

    /// Start orchestration for a `PENDING_UPLOAD` job.
    ///
    /// The `PROCESSING` write is conditional on `PENDING_UPLOAD`, so a second
    /// start for the same job is rejected without touching the record.
    pub async fn start(&self, request: StartRequest) -> Result<Job, StartError> {
        let execution_ref = uuid::Uuid::new_v4().to_string();
        let mut update = StatusUpdate::new(JobStatus::Processing)
            .expecting(&[JobStatus::PendingUpload])
            .execution_ref(execution_ref.clone());
        if let Some(metadata) = request.content_metadata {
            update = update.content_metadata(metadata);
        }

        let job = self
            .jobs
            .update_status(&request.owner_id, request.job_id, update)
            .await
            .map_err(|e| start_error(&request.owner_id, request.job_id, e, StartError::AlreadyStarted))?;

        self.spawn_run(RunRequest {
            owner_id: request.owner_id,
            job_id: request.job_id,
            source: request.source,
            execution_ref,
        });
        Ok(job)
    }

    /// Explicitly re-run a `FAILED` job from its original upload.
    ///
    /// The old error message stays visible until the new run reaches a
    /// terminal state.
    pub async fn retry(&self, owner_id: &str, job_id: JobId) -> Result<Job, StartError> {
        let execution_ref = uuid::Uuid::new_v4().to_string();
        let update = StatusUpdate::new(JobStatus::Processing)
            .expecting(&[JobStatus::Failed])
            .as_retry()
            .execution_ref(execution_ref.clone())
            .clear(JobField::Stage)
            .clear(JobField::ArtifactLocations)
            .clear(JobField::CompletedAt);

        let job = self
            .jobs
            .update_status(owner_id, job_id, update)
            .await
            .map_err(|e| start_error(owner_id, job_id, e, StartError::NotRetryable))?;

        tracing::info!(owner_id, job_id = %job_id, "Retrying failed job");
        self.spawn_run(RunRequest {
            owner_id: owner_id.to_string(),
            job_id,
            source: ObjectRef::new(self.upload_bucket(), job.source_key.clone()),
            execution_ref,
        });
        Ok(job)
    }

    /// Delete a job's artifacts, upload and record.
    ///
    /// Returns `false` if there was no record. A run still in flight for the
    /// job finds the record gone and ends without recreating it.
    pub async fn delete(&self, owner_id: &str, job_id: JobId) -> Result<bool, ServiceError> {
        self.objects
            .delete_prefix(self.output_bucket(), &output_prefix(owner_id, job_id))
            .await?;
        self.objects
            .delete_prefix(self.upload_bucket(), &upload_prefix(owner_id, job_id))
            .await?;
        let deleted = self.jobs.delete(owner_id, job_id).await?;
        tracing::info!(owner_id, job_id = %job_id, deleted, "Job deleted");
        Ok(deleted)
    }

    /// Runs spawned and not yet finished, queued ones included.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every spawned run has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Close the tracker and wait up to `timeout` for in-flight runs.
    /// Returns `true` if they all finished.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "Waiting for in-flight orchestration runs");
        }
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }

    fn spawn_run(&self, run: RunRequest) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let dispatcher = Arc::clone(&self.dispatcher);
        let admission = Arc::clone(&self.admission);
        let span = tracing::info_span!(
            "orchestration",
            job_id = %run.job_id,
            owner_id = %run.owner_id,
            execution_ref = %run.execution_ref,
        );

        self.tracker.spawn(
            async move {
                let started = PushMessage::ProcessingStarted { job_id: run.job_id };
                dispatcher.notify(&run.owner_id, &started).await;

                let _permit = match admission.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::error!("Admission gate closed, run dropped");
                        return;
                    }
                };

                let outcome = orchestrator.run(&run).await;
                tracing::info!(?outcome, "Orchestration finished");
            }
            .instrument(span),
        );
    }
}

fn start_error(
    owner_id: &str,
    job_id: JobId,
    error: StoreError,
    rejected: fn(JobStatus) -> StartError,
) -> StartError {
    match error {
        StoreError::NotFound { .. } => StartError::NotFound {
            owner_id: owner_id.to_string(),
            job_id,
        },
        StoreError::InvalidTransition { current, .. } => rejected(current),
        other => StartError::Store(other),
    }
}

fn read_model(mut job: Job) -> Job {
    if job.status != JobStatus::Completed {
        job.artifact_locations = None;
    }
    job
}
