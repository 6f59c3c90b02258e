pub mod error;
pub mod job_events;
pub mod job_status;
pub mod retry;
pub mod stages;
pub mod storage_keys;
pub mod transcript;
pub mod types;
