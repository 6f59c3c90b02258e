//! Job lifecycle status and its transition graph.
//!
//! Status IDs match the `job_statuses` seed data (SMALLINT, 1-based).

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Database status ID type.
pub type StatusId = i16;

/// Lifecycle status of a job.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    PendingUpload = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::PendingUpload,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Resolve a database status ID. Unknown IDs return `None`.
    pub fn from_id(id: StatusId) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Wire name, as used in API payloads and query filters.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::PendingUpload => "PENDING_UPLOAD",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Parse a wire name, e.g. the `status` query filter.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|s| s.as_str() == value)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Invalid status '{value}'. Must be one of: PENDING_UPLOAD, PROCESSING, COMPLETED, FAILED"
                ))
            })
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Statuses reachable from `from` during normal orchestration.
///
/// Transition rules:
/// - `PENDING_UPLOAD` -> `PROCESSING`
/// - `PROCESSING`     -> `PROCESSING` (stage bookkeeping), `COMPLETED`, `FAILED`
/// - `COMPLETED`, `FAILED` are terminal
///
/// `FAILED -> PROCESSING` is only reachable through [`validate_retry`].
pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
    match from {
        JobStatus::PendingUpload => &[JobStatus::Processing],
        JobStatus::Processing => &[
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ],
        JobStatus::Completed | JobStatus::Failed => &[],
    }
}

pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    valid_transitions(from).contains(&to)
}

/// Validate an explicit external retry request.
pub fn validate_retry(current: JobStatus) -> Result<(), CoreError> {
    if current == JobStatus::Failed {
        Ok(())
    } else {
        Err(CoreError::Conflict(format!(
            "Only FAILED jobs can be retried (current status: {current})"
        )))
    }
}
