//! In-process runner that plays back scripted behaviour per stage.
//!
//! Successful invocations write real artifacts to the object store so later
//! stages find their input by convention: separation writes the four stems
//! (vocals carry [`ScriptedTaskRunner::with_vocals`] bytes), transcription
//! reads the vocals back and writes a transcript, producing the instrumental
//! transcript when they hold too little text.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use unplugd_core::stages::StageKind;
use unplugd_core::transcript::{Segment, Transcript};

use crate::object_store::ObjectStore;
use crate::task::{
    ProducedArtifact, StageError, TaskHandle, TaskMessage, TaskOutcome, TaskRequest, TaskRunner,
    TASK_CHANNEL_CAPACITY,
};

/// Progress milestones reported by a successful scripted invocation.
const PROGRESS_MILESTONES: [(u8, &str); 3] = [
    (5, "Starting"),
    (15, "Loading model"),
    (85, "Uploading results"),
];

/// What one invocation does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Report progress, write the stage's artifacts and succeed.
    Succeed,
    /// Fail with the given error.
    Fail(StageError),
    /// Refuse the submission itself.
    RejectSubmit(StageError),
    /// Report progress and never finish.
    Hang,
    /// Succeed without reporting any artifacts.
    SucceedEmpty,
    /// Succeed reporting exactly these artifacts, writing nothing.
    Report(Vec<ProducedArtifact>),
    /// Write the stage's first artifact, then fail with the given error.
    FailAfterPartialWrite(StageError),
}

pub struct ScriptedTaskRunner {
    objects: Arc<dyn ObjectStore>,
    scripts: Mutex<HashMap<StageKind, VecDeque<Script>>>,
    submissions: Mutex<Vec<TaskRequest>>,
    vocals: Vec<u8>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ScriptedTaskRunner {
    /// A runner where every stage succeeds unless scripted otherwise.
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            objects,
            scripts: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            vocals: b"hello darkness my old friend".to_vec(),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bytes written as `vocals.wav` (read back as lyrics by transcription).
    pub fn with_vocals(mut self, vocals: impl Into<Vec<u8>>) -> Self {
        self.vocals = vocals.into();
        self
    }

    /// Queue behaviours for successive invocations of `stage`.
    pub fn script(self, stage: StageKind, scripts: impl IntoIterator<Item = Script>) -> Self {
        self.push(stage, scripts);
        self
    }

    /// Queue more scripts for `stage` on a runner that is already shared.
    pub fn push(&self, stage: StageKind, scripts: impl IntoIterator<Item = Script>) {
        self.lock_scripts()
            .entry(stage)
            .or_default()
            .extend(scripts);
    }

    /// Number of submissions seen for `stage`.
    pub fn invocations(&self, stage: StageKind) -> usize {
        self.lock_submissions()
            .iter()
            .filter(|r| r.stage == stage)
            .count()
    }

    pub fn submissions(&self) -> Vec<TaskRequest> {
        self.lock_submissions().clone()
    }

    /// Highest number of invocations that were running at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn lock_scripts(&self) -> std::sync::MutexGuard<'_, HashMap<StageKind, VecDeque<Script>>> {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_submissions(&self) -> std::sync::MutexGuard<'_, Vec<TaskRequest>> {
        self.submissions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_script(&self, stage: StageKind) -> Script {
        self.lock_scripts()
            .get_mut(&stage)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Script::Succeed)
    }
}

/// Decrements the active counter when the invocation ends or is aborted.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskRunner for ScriptedTaskRunner {
    async fn submit(&self, request: TaskRequest) -> Result<TaskHandle, StageError> {
        self.lock_submissions().push(request.clone());
        let script = self.next_script(request.stage);
        if let Script::RejectSubmit(err) = &script {
            return Err(err.clone());
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(&self.active));

        let (tx, rx) = mpsc::channel(TASK_CHANNEL_CAPACITY);
        let objects = Arc::clone(&self.objects);
        let vocals = self.vocals.clone();

        let worker = tokio::spawn(async move {
            let _guard = guard;
            for (percent, message) in PROGRESS_MILESTONES {
                let _ = tx
                    .send(TaskMessage::Progress {
                        percent,
                        message: message.to_string(),
                    })
                    .await;
                tokio::task::yield_now().await;
            }

            let outcome: TaskOutcome = match script {
                Script::Succeed => write_artifacts(objects.as_ref(), &request, &vocals).await,
                Script::SucceedEmpty => Ok(Vec::new()),
                Script::Fail(err) | Script::RejectSubmit(err) => Err(err),
                Script::Hang => std::future::pending::<TaskOutcome>().await,
                Script::Report(produced) => Ok(produced),
                Script::FailAfterPartialWrite(err) => {
                    write_first_artifact(objects.as_ref(), &request).await.and(Err(err))
                }
            };

            let _ = tx.send(TaskMessage::Finished(outcome)).await;
        });

        Ok(TaskHandle::new(rx, Some(worker.abort_handle())))
    }
}

async fn write_artifacts(
    objects: &dyn ObjectStore,
    request: &TaskRequest,
    vocals: &[u8],
) -> TaskOutcome {
    let mut produced = Vec::new();
    for spec in request.stage.artifacts() {
        let key = format!("{}{}", request.output_prefix, spec.file_name);
        let body = match request.stage {
            StageKind::Separation if spec.name == "vocals" => vocals.to_vec(),
            StageKind::Separation => b"stem".to_vec(),
            StageKind::Transcription => transcribe(objects, request).await?,
        };
        objects
            .put(&request.output_bucket, &key, body)
            .await
            .map_err(|e| StageError::transient(e.to_string()))?;
        produced.push(ProducedArtifact {
            name: spec.name.to_string(),
            key,
        });
    }
    Ok(produced)
}

async fn write_first_artifact(objects: &dyn ObjectStore, request: &TaskRequest) -> Result<(), StageError> {
    if let Some(spec) = request.stage.artifacts().first() {
        let key = format!("{}{}", request.output_prefix, spec.file_name);
        objects
            .put(&request.output_bucket, &key, b"partial".to_vec())
            .await
            .map_err(|e| StageError::transient(e.to_string()))?;
    }
    Ok(())
}

/// Treat the vocals bytes as recognized text.
async fn transcribe(objects: &dyn ObjectStore, request: &TaskRequest) -> Result<Vec<u8>, StageError> {
    let vocals = objects
        .get(&request.input.bucket, &request.input.key)
        .await
        .map_err(|e| StageError::validation(format!("vocals track unavailable: {e}")))?;
    let text = String::from_utf8_lossy(&vocals).to_string();
    let segments = vec![Segment {
        start: 0.0,
        end: 1.0,
        text,
        words: Vec::new(),
    }];
    Transcript::from_segments(Some("en".into()), segments)
        .to_json_bytes()
        .map_err(|e| StageError::task(e.to_string()))
}
