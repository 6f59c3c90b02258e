/// Jobs are identified by a UUIDv7 generated at intake.
pub type JobId = uuid::Uuid;

/// Opaque identity of the submitting user (issued by the upstream identity provider).
pub type OwnerId = String;

/// Opaque identifier assigned to a client connection at connect time.
pub type ConnectionId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a new, time-ordered job id.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}
