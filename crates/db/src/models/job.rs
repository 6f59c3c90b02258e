//! Job entity model, row mapping and the status-update DTO.

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::FromRow;
use unplugd_core::job_status::{JobStatus, StatusId};
use unplugd_core::types::{JobId, OwnerId, Timestamp};

use crate::store::StoreError;

/// Artifact name -> object key in the output bucket.
pub type ArtifactLocations = BTreeMap<String, String>;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub owner_id: String,
    pub job_id: JobId,
    pub status_id: StatusId,
    pub stage: Option<String>,
    pub title: String,
    pub source_key: String,
    pub content_type: Option<String>,
    pub content_metadata: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub artifact_locations: Option<sqlx::types::Json<ArtifactLocations>>,
    pub execution_ref: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// A job record with its status resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub owner_id: OwnerId,
    pub job_id: JobId,
    pub status: JobStatus,
    pub stage: Option<String>,
    pub title: String,
    pub source_key: String,
    pub content_type: Option<String>,
    pub content_metadata: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub artifact_locations: Option<ArtifactLocations>,
    pub execution_ref: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_id(row.status_id).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "job {} has unknown status_id {}",
                row.job_id, row.status_id
            ))
        })?;
        Ok(Self {
            owner_id: row.owner_id,
            job_id: row.job_id,
            status,
            stage: row.stage,
            title: row.title,
            source_key: row.source_key,
            content_type: row.content_type,
            content_metadata: row.content_metadata,
            error_message: row.error_message,
            artifact_locations: row.artifact_locations.map(|j| j.0),
            execution_ref: row.execution_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

/// DTO for creating a job in `PENDING_UPLOAD`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: OwnerId,
    pub job_id: JobId,
    pub title: String,
    pub source_key: String,
    pub content_type: Option<String>,
}

/// Optional job fields that a status update can clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobField {
    Stage,
    ErrorMessage,
    ArtifactLocations,
    ExecutionRef,
    CompletedAt,
}

impl JobField {
    pub fn column(self) -> &'static str {
        match self {
            JobField::Stage => "stage",
            JobField::ErrorMessage => "error_message",
            JobField::ArtifactLocations => "artifact_locations",
            JobField::ExecutionRef => "execution_ref",
            JobField::CompletedAt => "completed_at",
        }
    }
}

/// A status write plus the fields set and cleared atomically with it.
///
/// A field that is both set and listed in `clear` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    /// When non-empty, the write only applies if the current status is one of these.
    pub expected: Vec<JobStatus>,
    /// Explicit external retry: permits `FAILED -> PROCESSING`.
    pub retry: bool,
    pub stage: Option<String>,
    pub error_message: Option<String>,
    pub artifact_locations: Option<ArtifactLocations>,
    pub execution_ref: Option<String>,
    pub content_metadata: Option<serde_json::Value>,
    pub completed_at: Option<Timestamp>,
    pub clear: Vec<JobField>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            expected: Vec::new(),
            retry: false,
            stage: None,
            error_message: None,
            artifact_locations: None,
            execution_ref: None,
            content_metadata: None,
            completed_at: None,
            clear: Vec::new(),
        }
    }

    pub fn expecting(mut self, statuses: &[JobStatus]) -> Self {
        self.expected = statuses.to_vec();
        self
    }

    pub fn as_retry(mut self) -> Self {
        self.retry = true;
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn artifact_locations(mut self, locations: ArtifactLocations) -> Self {
        self.artifact_locations = Some(locations);
        self
    }

    pub fn execution_ref(mut self, execution_ref: impl Into<String>) -> Self {
        self.execution_ref = Some(execution_ref.into());
        self
    }

    pub fn content_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.content_metadata = Some(metadata);
        self
    }

    pub fn completed_at(mut self, at: Timestamp) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn clear(mut self, field: JobField) -> Self {
        if !self.clear.contains(&field) {
            self.clear.push(field);
        }
        self
    }

    /// Whether this update sets `field` to a value.
    pub fn sets(&self, field: JobField) -> bool {
        match field {
            JobField::Stage => self.stage.is_some(),
            JobField::ErrorMessage => self.error_message.is_some(),
            JobField::ArtifactLocations => self.artifact_locations.is_some(),
            JobField::ExecutionRef => self.execution_ref.is_some(),
            JobField::CompletedAt => self.completed_at.is_some(),
        }
    }

    /// Fields to null out, excluding any that are also being set.
    pub fn effective_clears(&self) -> impl Iterator<Item = JobField> + '_ {
        self.clear.iter().copied().filter(|f| !self.sets(*f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_wins_over_clear() {
        let update = StatusUpdate::new(JobStatus::Failed)
            .error_message("ValidationError: bad input")
            .clear(JobField::ErrorMessage)
            .clear(JobField::Stage);
        let clears: Vec<_> = update.effective_clears().collect();
        assert_eq!(clears, vec![JobField::Stage]);
    }

    #[test]
    fn clear_is_deduplicated() {
        let update = StatusUpdate::new(JobStatus::Completed)
            .clear(JobField::ErrorMessage)
            .clear(JobField::ErrorMessage);
        assert_eq!(update.clear.len(), 1);
    }

    #[test]
    fn unknown_status_id_is_corrupt() {
        let now = chrono::Utc::now();
        let row = JobRow {
            owner_id: "u1".into(),
            job_id: uuid::Uuid::now_v7(),
            status_id: 42,
            stage: None,
            title: "song.mp3".into(),
            source_key: "uploads/u1/x/song.mp3".into(),
            content_type: None,
            content_metadata: None,
            error_message: None,
            artifact_locations: None,
            execution_ref: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        assert!(matches!(Job::try_from(row), Err(StoreError::Corrupt(_))));
    }
}
