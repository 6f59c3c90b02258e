//! Messages pushed to client connections and the worker progress event.
//!
//! Push payloads are status-only: clients fetch artifact detail through the
//! job read path.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::types::JobId;

/// Processing has begun for a job.
pub const MSG_TYPE_PROCESSING_STARTED: &str = "PROCESSING_STARTED";

/// Best-effort progress update from a running stage.
pub const MSG_TYPE_PROGRESS: &str = "PROGRESS";

/// Job reached COMPLETED.
pub const MSG_TYPE_COMPLETED: &str = "COMPLETED";

/// Job reached FAILED.
pub const MSG_TYPE_FAILED: &str = "FAILED";

/// A notification delivered to every live connection of the job's owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushMessage {
    #[serde(rename_all = "camelCase")]
    ProcessingStarted { job_id: JobId },
    #[serde(rename_all = "camelCase")]
    Progress {
        job_id: JobId,
        stage: String,
        progress: u8,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Completed { job_id: JobId },
    #[serde(rename_all = "camelCase")]
    Failed { job_id: JobId, error: String },
}

impl PushMessage {
    pub fn job_id(&self) -> JobId {
        match self {
            PushMessage::ProcessingStarted { job_id }
            | PushMessage::Progress { job_id, .. }
            | PushMessage::Completed { job_id }
            | PushMessage::Failed { job_id, .. } => *job_id,
        }
    }

    /// The `type` discriminator as written on the wire.
    pub fn message_type(&self) -> &'static str {
        match self {
            PushMessage::ProcessingStarted { .. } => MSG_TYPE_PROCESSING_STARTED,
            PushMessage::Progress { .. } => MSG_TYPE_PROGRESS,
            PushMessage::Completed { .. } => MSG_TYPE_COMPLETED,
            PushMessage::Failed { .. } => MSG_TYPE_FAILED,
        }
    }
}

/// Fire-and-forget progress signal emitted by a worker task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: JobId,
    #[validate(length(min = 1, max = 64))]
    pub stage: String,
    #[validate(range(max = 100))]
    pub percent: u8,
    #[serde(default)]
    #[validate(length(max = 1024))]
    pub message: String,
}

impl ProgressEvent {
    pub fn new(job_id: JobId, stage: impl Into<String>, percent: u8, message: impl Into<String>) -> Self {
        Self {
            job_id,
            stage: stage.into(),
            percent: percent.min(100),
            message: message.into(),
        }
    }
}

impl From<ProgressEvent> for PushMessage {
    fn from(event: ProgressEvent) -> Self {
        PushMessage::Progress {
            job_id: event.job_id,
            stage: event.stage,
            progress: event.percent.min(100),
            message: event.message,
        }
    }
}
