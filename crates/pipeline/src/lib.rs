//! Orchestration core: worker task contract, runners, object storage, the
//! pipeline state machine and its executor, failure compensation and the
//! admission-gated intake service.

pub mod compensator;
pub mod config;
pub mod object_store;
pub mod orchestrator;
pub mod runners;
pub mod service;
pub mod state;
pub mod task;

pub use compensator::{CompensationReport, FailureCompensator};
pub use config::PipelineConfig;
pub use object_store::{MemoryObjectStore, ObjectStore, S3ObjectStore, StorageError};
pub use orchestrator::{Orchestrator, OrchestratorSettings, RunRequest};
pub use service::{JobService, ServiceError, StartError, StartRequest};
pub use state::{PipelineState, RunOutcome};
pub use task::{StageError, TaskRunner};
