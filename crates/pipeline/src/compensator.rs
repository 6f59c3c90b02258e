//! Failure branch of an orchestration run.
//!
//! Each step is independent and best-effort: a failed status write does not
//! stop artifact cleanup or the FAILED notice. The original upload is kept
//! for diagnosis and explicit retry.

use std::sync::Arc;

use unplugd_core::job_events::PushMessage;
use unplugd_core::job_status::JobStatus;
use unplugd_core::storage_keys::output_prefix;
use unplugd_core::types::JobId;
use unplugd_db::models::job::{JobField, StatusUpdate};
use unplugd_db::{JobStore, StoreError};
use unplugd_events::NotificationDispatcher;

use crate::object_store::ObjectStore;
use crate::task::StageError;

/// What the compensator managed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompensationReport {
    pub status_written: bool,
    pub artifacts_removed: usize,
    pub notified_connections: usize,
}

pub struct FailureCompensator {
    jobs: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    dispatcher: Arc<NotificationDispatcher>,
    output_bucket: String,
}

impl FailureCompensator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        dispatcher: Arc<NotificationDispatcher>,
        output_bucket: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            objects,
            dispatcher,
            output_bucket: output_bucket.into(),
        }
    }

    /// Mark the job FAILED, remove partial artifacts and push a FAILED notice.
    pub async fn compensate(
        &self,
        owner_id: &str,
        job_id: JobId,
        error: &StageError,
    ) -> CompensationReport {
        let mut report = CompensationReport::default();
        let error_message = error.to_string();

        let update = StatusUpdate::new(JobStatus::Failed)
            .expecting(&[JobStatus::Processing])
            .error_message(error_message.clone())
            .clear(JobField::Stage)
            .clear(JobField::ArtifactLocations);

        match self.jobs.update_status(owner_id, job_id, update).await {
            Ok(_) => report.status_written = true,
            Err(StoreError::NotFound { .. }) => {
                tracing::info!(owner_id, job_id = %job_id, "Job deleted mid-run, FAILED not recorded");
            }
            Err(e) => {
                tracing::error!(owner_id, job_id = %job_id, error = %e, "Failed to record FAILED status");
            }
        }

        let prefix = output_prefix(owner_id, job_id);
        match self.objects.delete_prefix(&self.output_bucket, &prefix).await {
            Ok(n) => report.artifacts_removed = n,
            Err(e) => {
                tracing::warn!(
                    owner_id,
                    job_id = %job_id,
                    prefix = %prefix,
                    error = %e,
                    "Failed to remove partial artifacts"
                );
            }
        }

        let notice = PushMessage::Failed {
            job_id,
            error: error_message,
        };
        report.notified_connections = self.dispatcher.notify(owner_id, &notice).await.delivered;

        tracing::info!(
            owner_id,
            job_id = %job_id,
            error_class = %error.class,
            status_written = report.status_written,
            artifacts_removed = report.artifacts_removed,
            "Job failed"
        );

        report
    }
}
