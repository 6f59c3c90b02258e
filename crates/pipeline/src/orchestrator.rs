//! Orchestration executor.
//!
//! Drives one job through the pipeline: performs the side effect for the
//! current [`PipelineState`], feeds the [`StepOutcome`] to
//! [`transition`](crate::state::transition) and sleeps for any backoff before
//! moving on. The only long wait is a running stage, bounded by the stage's
//! timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use unplugd_core::job_events::{ProgressEvent, PushMessage};
use unplugd_core::job_status::JobStatus;
use unplugd_core::retry::RetryPolicy;
use unplugd_core::stages::StageKind;
use unplugd_core::storage_keys::{
    artifact_key, output_prefix, upload_prefix, validate_owner_id, ObjectRef,
};
use unplugd_core::types::{JobId, OwnerId};
use unplugd_db::models::job::{ArtifactLocations, JobField, StatusUpdate};
use unplugd_db::{JobStore, StoreError};
use unplugd_events::{EventBus, NotificationDispatcher, ProgressNotice};

use crate::compensator::FailureCompensator;
use crate::object_store::ObjectStore;
use crate::state::{transition, PipelineState, RunOutcome, StepOutcome};
use crate::task::{ProducedArtifact, StageError, TaskMessage, TaskRequest, TaskRunner};

/// Default wall-clock limit for the separation stage.
pub const DEFAULT_SEPARATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default wall-clock limit for the transcription stage.
pub const DEFAULT_TRANSCRIPTION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Tunables for the executor.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub policy: RetryPolicy,
    pub separation_timeout: Duration,
    pub transcription_timeout: Duration,
    pub upload_bucket: String,
    pub output_bucket: String,
}

impl OrchestratorSettings {
    pub fn new(upload_bucket: impl Into<String>, output_bucket: impl Into<String>) -> Self {
        Self {
            policy: RetryPolicy::default(),
            separation_timeout: DEFAULT_SEPARATION_TIMEOUT,
            transcription_timeout: DEFAULT_TRANSCRIPTION_TIMEOUT,
            upload_bucket: upload_bucket.into(),
            output_bucket: output_bucket.into(),
        }
    }

    pub fn stage_timeout(&self, stage: StageKind) -> Duration {
        match stage {
            StageKind::Separation => self.separation_timeout,
            StageKind::Transcription => self.transcription_timeout,
        }
    }
}

/// Input of one orchestration run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub owner_id: OwnerId,
    pub job_id: JobId,
    /// The uploaded object the first stage reads.
    pub source: ObjectRef,
    /// Correlation id carried in every task request of this run.
    pub execution_ref: String,
}

pub struct Orchestrator {
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    runner: Arc<dyn TaskRunner>,
    dispatcher: Arc<NotificationDispatcher>,
    bus: Arc<EventBus>,
    compensator: FailureCompensator,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        runner: Arc<dyn TaskRunner>,
        dispatcher: Arc<NotificationDispatcher>,
        bus: Arc<EventBus>,
        settings: OrchestratorSettings,
    ) -> Self {
        let compensator = FailureCompensator::new(
            Arc::clone(&jobs),
            Arc::clone(&objects),
            Arc::clone(&dispatcher),
            settings.output_bucket.clone(),
        );
        Self {
            jobs,
            objects,
            runner,
            dispatcher,
            bus,
            compensator,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run the pipeline for one job until it reaches `Done`.
    pub async fn run(&self, request: &RunRequest) -> RunOutcome {
        let mut state = PipelineState::start();
        let mut artifacts = ArtifactLocations::new();

        loop {
            let outcome = match &state {
                PipelineState::Done(outcome) => return *outcome,
                PipelineState::ValidateInput { .. } => self.validate_input(request).await,
                PipelineState::RunStage { stage, attempts } => {
                    self.run_stage(request, *stage, attempts.total() + 1, &mut artifacts)
                        .await
                }
                PipelineState::MarkCompleted => self.mark_completed(request, &artifacts).await,
                PipelineState::SendCompletionNotice => {
                    let notice = PushMessage::Completed {
                        job_id: request.job_id,
                    };
                    self.dispatcher.notify(&request.owner_id, &notice).await;
                    StepOutcome::Notified
                }
                PipelineState::CleanupIntermediateInputs => {
                    self.cleanup_inputs(request).await;
                    StepOutcome::CleanedUp
                }
                PipelineState::Failed { error } => {
                    self.compensator
                        .compensate(&request.owner_id, request.job_id, error)
                        .await;
                    StepOutcome::Compensated
                }
            };

            let next = transition(&state, outcome, &self.settings.policy);
            if let Some(delay) = next.delay {
                tracing::info!(
                    job_id = %request.job_id,
                    state = next.next.name(),
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry",
                );
                tokio::time::sleep(delay).await;
            }
            state = next.next;
        }
    }

    async fn validate_input(&self, request: &RunRequest) -> StepOutcome {
        if let Err(e) = validate_owner_id(&request.owner_id) {
            return StepOutcome::Invalid(StageError::validation(e.to_string()));
        }
        if request.job_id.is_nil() {
            return StepOutcome::Invalid(StageError::validation("job id is nil"));
        }
        if request.source.bucket != self.settings.upload_bucket {
            return StepOutcome::Invalid(StageError::validation(format!(
                "source {} is not in the upload bucket",
                request.source
            )));
        }
        let prefix = upload_prefix(&request.owner_id, request.job_id);
        if !request.source.key.starts_with(&prefix) {
            return StepOutcome::Invalid(StageError::validation(format!(
                "source {} is outside {prefix}",
                request.source
            )));
        }

        match self
            .objects
            .exists(&request.source.bucket, &request.source.key)
            .await
        {
            Ok(true) => StepOutcome::Validated,
            Ok(false) => StepOutcome::Invalid(StageError::validation(format!(
                "source object not found: {}",
                request.source
            ))),
            Err(e) => StepOutcome::Invalid(StageError::transient(e.to_string())),
        }
    }

    async fn run_stage(
        &self,
        request: &RunRequest,
        stage: StageKind,
        attempt: u32,
        artifacts: &mut ArtifactLocations,
    ) -> StepOutcome {
        // Bookkeeping only; a deleted record must not stop the run here.
        let bookkeeping = StatusUpdate::new(JobStatus::Processing)
            .expecting(&[JobStatus::Processing])
            .stage(stage.name());
        if let Err(e) = self
            .jobs
            .update_status(&request.owner_id, request.job_id, bookkeeping)
            .await
        {
            tracing::warn!(job_id = %request.job_id, stage = %stage, error = %e, "Failed to record stage");
        }

        let out_prefix = output_prefix(&request.owner_id, request.job_id);
        let input = match stage.input_artifact() {
            None => request.source.clone(),
            Some(file_name) => ObjectRef::new(
                self.settings.output_bucket.clone(),
                format!("{out_prefix}{file_name}"),
            ),
        };

        let task = TaskRequest {
            correlation_id: request.execution_ref.clone(),
            job_id: request.job_id,
            owner_id: request.owner_id.clone(),
            stage,
            input,
            output_bucket: self.settings.output_bucket.clone(),
            output_prefix: out_prefix,
        };

        tracing::info!(job_id = %request.job_id, stage = %stage, attempt, "Stage started");

        let mut handle = match self.runner.submit(task).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(job_id = %request.job_id, stage = %stage, error = %e, "Stage submission failed");
                return StepOutcome::StageFailed(e);
            }
        };

        let limit = self.settings.stage_timeout(stage);
        let finished = tokio::time::timeout(limit, async {
            while let Some(message) = handle.recv().await {
                match message {
                    TaskMessage::Progress { percent, message } => {
                        let event = ProgressEvent::new(request.job_id, stage.name(), percent, message);
                        self.bus
                            .publish(ProgressNotice::new(request.owner_id.clone(), event));
                    }
                    TaskMessage::Finished(outcome) => return outcome,
                }
            }
            Err(StageError::task(format!(
                "{stage} worker ended without reporting a result"
            )))
        })
        .await;
        drop(handle);

        let outcome = match finished {
            Ok(Ok(produced)) => check_artifacts(&request.owner_id, request.job_id, stage, &produced)
                .map(|()| produced),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(StageError::task(format!(
                "{stage} stage timed out after {}s",
                limit.as_secs()
            ))),
        };

        match outcome {
            Ok(produced) => {
                tracing::info!(
                    job_id = %request.job_id,
                    stage = %stage,
                    artifacts = produced.len(),
                    "Stage succeeded",
                );
                artifacts.extend(produced.into_iter().map(|a| (a.name, a.key)));
                StepOutcome::StageSucceeded
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %request.job_id,
                    stage = %stage,
                    attempt,
                    error = %e,
                    "Stage failed",
                );
                StepOutcome::StageFailed(e)
            }
        }
    }

    async fn mark_completed(&self, request: &RunRequest, artifacts: &ArtifactLocations) -> StepOutcome {
        let update = StatusUpdate::new(JobStatus::Completed)
            .expecting(&[JobStatus::Processing])
            .artifact_locations(artifacts.clone())
            .completed_at(Utc::now())
            .clear(JobField::ErrorMessage)
            .clear(JobField::Stage);

        match self
            .jobs
            .update_status(&request.owner_id, request.job_id, update)
            .await
        {
            Ok(_) => {
                tracing::info!(job_id = %request.job_id, "Job completed");
                StepOutcome::Marked
            }
            Err(StoreError::NotFound { .. }) => {
                tracing::info!(job_id = %request.job_id, "Job deleted mid-run, discarding results");
                let prefix = output_prefix(&request.owner_id, request.job_id);
                if let Err(e) = self
                    .objects
                    .delete_prefix(&self.settings.output_bucket, &prefix)
                    .await
                {
                    tracing::warn!(job_id = %request.job_id, error = %e, "Failed to remove orphaned artifacts");
                }
                StepOutcome::RecordMissing
            }
            Err(e) => StepOutcome::MarkFailed(StageError::transient(format!(
                "failed to record completion: {e}"
            ))),
        }
    }

    async fn cleanup_inputs(&self, request: &RunRequest) {
        let prefix = upload_prefix(&request.owner_id, request.job_id);
        match self
            .objects
            .delete_prefix(&self.settings.upload_bucket, &prefix)
            .await
        {
            Ok(removed) => {
                tracing::debug!(job_id = %request.job_id, removed, "Upload removed");
            }
            Err(e) => {
                tracing::warn!(job_id = %request.job_id, error = %e, "Failed to remove upload");
            }
        }
    }
}

/// A stage must report exactly its declared artifacts, each at the
/// conventional key under the job's output prefix.
pub fn check_artifacts(
    owner_id: &str,
    job_id: JobId,
    stage: StageKind,
    produced: &[ProducedArtifact],
) -> Result<(), StageError> {
    if produced.is_empty() {
        return Err(StageError::task(format!(
            "{stage} reported success without artifacts"
        )));
    }

    let expected = stage.artifacts();
    if let Some(extra) = produced
        .iter()
        .find(|a| !expected.iter().any(|spec| spec.name == a.name))
    {
        return Err(StageError::task(format!(
            "{stage} reported unexpected artifact '{}'",
            extra.name
        )));
    }

    for spec in expected {
        let wanted = artifact_key(owner_id, job_id, spec.file_name);
        match produced.iter().find(|a| a.name == spec.name) {
            None => {
                return Err(StageError::task(format!(
                    "{stage} did not report artifact '{}'",
                    spec.name
                )))
            }
            Some(artifact) if artifact.key != wanted => {
                return Err(StageError::task(format!(
                    "{stage} artifact '{}' at {} instead of {wanted}",
                    spec.name, artifact.key
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}
