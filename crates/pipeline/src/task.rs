//! Worker task contract.
//!
//! A stage is invoked by sending a [`TaskRequest`] to a [`TaskRunner`]. The
//! runner answers with a [`TaskHandle`] from which the orchestrator receives
//! [`TaskMessage`]s: any number of best-effort progress messages followed by
//! exactly one `Finished`. Dropping the handle abandons the invocation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use unplugd_core::retry::ErrorClass;
use unplugd_core::stages::StageKind;
use unplugd_core::storage_keys::ObjectRef;
use unplugd_core::types::{JobId, OwnerId};

/// Buffer for messages from one invocation.
pub const TASK_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// A classified stage failure.
///
/// Displays as `"{ErrorClassName}: {message}"`, the form recorded on a
/// failed job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{class}: {message}")]
pub struct StageError {
    pub class: ErrorClass,
    pub message: String,
}

impl StageError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Validation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::TransientInfrastructure, message)
    }

    pub fn task(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::TaskExecution, message)
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    /// The job's execution ref; correlates worker output back to the run.
    pub correlation_id: String,
    pub job_id: JobId,
    pub owner_id: OwnerId,
    pub stage: StageKind,
    /// The bytes to operate on.
    pub input: ObjectRef,
    pub output_bucket: String,
    /// Conventional location for this job's artifacts.
    pub output_prefix: String,
}

/// A named artifact written by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedArtifact {
    pub name: String,
    pub key: String,
}

pub type TaskOutcome = Result<Vec<ProducedArtifact>, StageError>;

#[derive(Debug, Clone, PartialEq)]
pub enum TaskMessage {
    Progress { percent: u8, message: String },
    Finished(TaskOutcome),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Receiving end of one invocation. Dropping it aborts the worker.
pub struct TaskHandle {
    messages: mpsc::Receiver<TaskMessage>,
    abort: Option<AbortHandle>,
}

impl TaskHandle {
    /// Wrap a message receiver and the task driving the invocation.
    pub fn new(messages: mpsc::Receiver<TaskMessage>, abort: Option<AbortHandle>) -> Self {
        Self { messages, abort }
    }

    /// Next message, or `None` once the worker side is gone.
    pub async fn recv(&mut self) -> Option<TaskMessage> {
        self.messages.recv().await
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Carries stage invocations to external workers.
///
/// Implementations must not mark jobs failed: they report the outcome and
/// the orchestrator decides about retries.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Start an invocation. A submission failure is an execution-environment
    /// fault and should be classified as transient.
    async fn submit(&self, request: TaskRequest) -> Result<TaskHandle, StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_display_includes_class_name() {
        let err = StageError::task("separation worker exited with status 1");
        assert_eq!(
            err.to_string(),
            "TaskExecutionError: separation worker exited with status 1"
        );
    }

    #[tokio::test]
    async fn dropping_handle_aborts_worker_task() {
        let (_tx, rx) = mpsc::channel::<TaskMessage>(1);
        let worker = tokio::spawn(std::future::pending::<()>());
        let handle = TaskHandle::new(rx, Some(worker.abort_handle()));

        drop(handle);

        let joined = worker.await;
        assert!(joined.unwrap_err().is_cancelled());
    }
}
