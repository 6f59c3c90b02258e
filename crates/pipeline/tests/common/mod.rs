use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use unplugd_core::storage_keys::ObjectRef;
use unplugd_db::models::connection::Connection;
use unplugd_db::models::job::Job;
use unplugd_db::{ConnectionRegistry, JobStore, MemoryConnectionRegistry, MemoryJobStore};
use unplugd_events::{ConnectionGateway, DeliveryError, EventBus, NotificationDispatcher};
use unplugd_pipeline::runners::ScriptedTaskRunner;
use unplugd_pipeline::{
    JobService, MemoryObjectStore, ObjectStore, Orchestrator, OrchestratorSettings, StartRequest,
    StorageError,
};

pub const UPLOAD_BUCKET: &str = "test-uploads";
pub const OUTPUT_BUCKET: &str = "test-output";

/// Records every payload pushed to a connection.
#[derive(Default)]
pub struct RecordingGateway {
    delivered: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingGateway {
    /// Message types delivered to `connection_id`, in order.
    pub fn types_for(&self, connection_id: &str) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == connection_id)
            .map(|(_, msg)| msg["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn messages_for(&self, connection_id: &str) -> Vec<serde_json::Value> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == connection_id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }
}

#[async_trait]
impl ConnectionGateway for RecordingGateway {
    async fn post_to_connection(&self, connection_id: &str, payload: &str) -> Result<(), DeliveryError> {
        let message: serde_json::Value = serde_json::from_str(payload).unwrap();
        self.delivered
            .lock()
            .unwrap()
            .push((connection_id.to_string(), message));
        Ok(())
    }
}

/// Memory store whose first `failures` existence checks fail.
pub struct FlakyObjectStore {
    inner: Arc<MemoryObjectStore>,
    failures: AtomicUsize,
}

impl FlakyObjectStore {
    pub fn new(inner: Arc<MemoryObjectStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Backend("503 SlowDown".into()));
        }
        self.inner.exists(bucket, key).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get(bucket, key).await
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        self.inner.put(bucket, key, body).await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(bucket, prefix).await
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> Result<usize, StorageError> {
        self.inner.delete_prefix(bucket, prefix).await
    }
}

pub struct Harness {
    pub jobs: Arc<MemoryJobStore>,
    pub connections: Arc<MemoryConnectionRegistry>,
    pub objects: Arc<MemoryObjectStore>,
    pub runner: Arc<ScriptedTaskRunner>,
    pub gateway: Arc<RecordingGateway>,
    pub bus: Arc<EventBus>,
    pub service: JobService,
}

impl Harness {
    /// Default settings, every stage succeeds.
    pub fn new() -> Self {
        Self::build(|runner| runner, default_settings(), 4)
    }

    pub fn with_runner(script: impl FnOnce(ScriptedTaskRunner) -> ScriptedTaskRunner) -> Self {
        Self::build(script, default_settings(), 4)
    }

    pub fn build(
        script: impl FnOnce(ScriptedTaskRunner) -> ScriptedTaskRunner,
        settings: OrchestratorSettings,
        max_concurrent_runs: usize,
    ) -> Self {
        Self::build_over(script, settings, max_concurrent_runs, |objects| objects)
    }

    /// Like [`Harness::build`], with the orchestrator and service seeing the
    /// memory store through `wrap`.
    pub fn build_over(
        script: impl FnOnce(ScriptedTaskRunner) -> ScriptedTaskRunner,
        settings: OrchestratorSettings,
        max_concurrent_runs: usize,
        wrap: impl FnOnce(Arc<MemoryObjectStore>) -> Arc<dyn ObjectStore>,
    ) -> Self {
        let jobs = Arc::new(MemoryJobStore::new());
        let connections = Arc::new(MemoryConnectionRegistry::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let store = wrap(objects.clone());
        let runner = Arc::new(script(ScriptedTaskRunner::new(objects.clone())));
        let gateway = Arc::new(RecordingGateway::default());
        let bus = Arc::new(EventBus::default());

        let dispatcher = Arc::new(NotificationDispatcher::new(
            connections.clone(),
            gateway.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            jobs.clone(),
            store.clone(),
            runner.clone(),
            dispatcher.clone(),
            bus.clone(),
            settings,
        ));
        let service = JobService::new(
            jobs.clone(),
            store,
            orchestrator,
            dispatcher,
            max_concurrent_runs,
        );

        Self {
            jobs,
            connections,
            objects,
            runner,
            gateway,
            bus,
            service,
        }
    }

    pub async fn connect(&self, owner_id: &str, connection_id: &str) {
        self.connections
            .put(Connection::open(connection_id, owner_id, chrono::Duration::hours(2)))
            .await
            .unwrap();
    }

    /// Create a job and put its upload in place.
    pub async fn uploaded_job(&self, owner_id: &str) -> Job {
        let job = self
            .service
            .create_job(owner_id, "song.mp3", Some("audio/mpeg".into()))
            .await
            .unwrap();
        self.objects
            .put(UPLOAD_BUCKET, &job.source_key, b"ID3 audio".to_vec())
            .await
            .unwrap();
        job
    }

    pub fn start_request(job: &Job) -> StartRequest {
        StartRequest {
            owner_id: job.owner_id.clone(),
            job_id: job.job_id,
            source: ObjectRef::new(UPLOAD_BUCKET, job.source_key.clone()),
            content_metadata: Some(serde_json::json!({ "sizeBytes": 9 })),
        }
    }

    /// Start the job and wait for its run to finish.
    pub async fn run_to_end(&self, job: &Job) -> Job {
        self.service.start(Self::start_request(job)).await.unwrap();
        self.service.wait_idle().await;
        self.jobs.get(&job.owner_id, job.job_id).await.unwrap()
    }
}

pub fn default_settings() -> OrchestratorSettings {
    OrchestratorSettings::new(UPLOAD_BUCKET, OUTPUT_BUCKET)
}
