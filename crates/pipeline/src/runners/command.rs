//! Runs each stage as an external worker process.
//!
//! The correlation data is passed in environment variables:
//!
//! | Env Var          | Value                                    |
//! |------------------|------------------------------------------|
//! | `JOB_ID`         | job id                                   |
//! | `OWNER_ID`       | owner id                                 |
//! | `STAGE`          | `separation` / `transcription`           |
//! | `CORRELATION_ID` | execution ref of the run                 |
//! | `INPUT_BUCKET`   | bucket of the input object               |
//! | `INPUT_KEY`      | key of the input object                  |
//! | `OUTPUT_BUCKET`  | bucket for artifacts                     |
//! | `OUTPUT_PREFIX`  | `output/{owner}/{job}/`                  |
//!
//! The worker reports on stdout, one JSON object per line:
//!
//! ```text
//! {"type":"progress","percent":15,"message":"Loading model"}
//! {"type":"artifact","name":"vocals","key":"output/u/j/vocals.wav"}
//! ```
//!
//! Exit status 0 is success, 75 (`EX_TEMPFAIL`) a transient fault, 65
//! (`EX_DATAERR`) a validation error, anything else a task failure.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use unplugd_core::retry::ErrorClass;
use unplugd_core::stages::StageKind;

use crate::task::{
    ProducedArtifact, StageError, TaskHandle, TaskMessage, TaskOutcome, TaskRequest, TaskRunner,
    TASK_CHANNEL_CAPACITY,
};

/// `EX_TEMPFAIL` from sysexits.h.
pub const EXIT_TEMPFAIL: i32 = 75;

/// `EX_DATAERR` from sysexits.h.
pub const EXIT_DATAERR: i32 = 65;

/// Longest stderr tail carried into an error message.
const STDERR_TAIL_CHARS: usize = 300;

/// A worker line on stdout.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WorkerLine {
    Progress {
        percent: u8,
        #[serde(default)]
        message: String,
    },
    Artifact {
        name: String,
        key: String,
    },
}

/// Program and arguments for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl StageCommand {
    /// Split a command line on whitespace. Returns `None` for a blank line.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

pub struct CommandTaskRunner {
    commands: HashMap<StageKind, StageCommand>,
}

impl CommandTaskRunner {
    pub fn new(commands: HashMap<StageKind, StageCommand>) -> Self {
        Self { commands }
    }
}

/// Map a process exit code to an error class. `None` means success.
pub fn classify_exit(code: Option<i32>) -> Option<ErrorClass> {
    match code {
        Some(0) => None,
        Some(EXIT_TEMPFAIL) => Some(ErrorClass::TransientInfrastructure),
        Some(EXIT_DATAERR) => Some(ErrorClass::Validation),
        // Killed by a signal, or any other failure.
        _ => Some(ErrorClass::TaskExecution),
    }
}

#[async_trait]
impl TaskRunner for CommandTaskRunner {
    async fn submit(&self, request: TaskRequest) -> Result<TaskHandle, StageError> {
        let command = self.commands.get(&request.stage).ok_or_else(|| {
            StageError::transient(format!("no worker command configured for {}", request.stage))
        })?;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .env("JOB_ID", request.job_id.to_string())
            .env("OWNER_ID", &request.owner_id)
            .env("STAGE", request.stage.name())
            .env("CORRELATION_ID", &request.correlation_id)
            .env("INPUT_BUCKET", &request.input.bucket)
            .env("INPUT_KEY", &request.input.key)
            .env("OUTPUT_BUCKET", &request.output_bucket)
            .env("OUTPUT_PREFIX", &request.output_prefix)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                StageError::transient(format!(
                    "failed to start {} worker '{}': {e}",
                    request.stage, command.program
                ))
            })?;

        tracing::info!(
            job_id = %request.job_id,
            stage = %request.stage,
            correlation_id = %request.correlation_id,
            pid = child.id(),
            "Worker process started",
        );

        let (tx, rx) = mpsc::channel(TASK_CHANNEL_CAPACITY);
        let stage = request.stage;

        let worker = tokio::spawn(async move {
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();

            let stderr_tail = tokio::spawn(async move {
                let mut last = String::new();
                if let Some(stderr) = stderr {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if !line.trim().is_empty() {
                            last = line;
                        }
                    }
                }
                last
            });

            let mut artifacts = Vec::new();
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match serde_json::from_str::<WorkerLine>(&line) {
                        Ok(WorkerLine::Progress { percent, message }) => {
                            // Best-effort: a full channel drops the update.
                            let _ = tx.try_send(TaskMessage::Progress {
                                percent: percent.min(100),
                                message,
                            });
                        }
                        Ok(WorkerLine::Artifact { name, key }) => {
                            artifacts.push(ProducedArtifact { name, key });
                        }
                        Err(_) => tracing::debug!(stage = %stage, line = %line, "Worker output"),
                    }
                }
            }

            let status = child.wait().await;
            let tail = stderr_tail.await.unwrap_or_default();
            let outcome: TaskOutcome = match status {
                Ok(status) => match classify_exit(status.code()) {
                    None => Ok(artifacts),
                    Some(class) => {
                        let mut message = format!("{stage} worker exited with {status}");
                        if !tail.is_empty() {
                            let tail: String = tail.chars().take(STDERR_TAIL_CHARS).collect();
                            message.push_str(&format!(": {tail}"));
                        }
                        Err(StageError::new(class, message))
                    }
                },
                Err(e) => Err(StageError::transient(format!(
                    "failed to wait for {stage} worker: {e}"
                ))),
            };

            let _ = tx.send(TaskMessage::Finished(outcome)).await;
        });

        Ok(TaskHandle::new(rx, Some(worker.abort_handle())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_map_to_classes() {
        assert_eq!(classify_exit(Some(0)), None);
        assert_eq!(classify_exit(Some(75)), Some(ErrorClass::TransientInfrastructure));
        assert_eq!(classify_exit(Some(65)), Some(ErrorClass::Validation));
        assert_eq!(classify_exit(Some(1)), Some(ErrorClass::TaskExecution));
        assert_eq!(classify_exit(None), Some(ErrorClass::TaskExecution));
    }

    #[test]
    fn parse_command_line() {
        let cmd = StageCommand::parse("python -m workers.separate --device cuda").unwrap();
        assert_eq!(cmd.program, "python");
        assert_eq!(cmd.args, vec!["-m", "workers.separate", "--device", "cuda"]);
        assert!(StageCommand::parse("   ").is_none());
    }

    #[test]
    fn worker_lines_parse() {
        let progress: WorkerLine =
            serde_json::from_str(r#"{"type":"progress","percent":15,"message":"Loading"}"#).unwrap();
        assert_eq!(
            progress,
            WorkerLine::Progress {
                percent: 15,
                message: "Loading".into()
            }
        );
        let artifact: WorkerLine =
            serde_json::from_str(r#"{"type":"artifact","name":"vocals","key":"output/u/j/vocals.wav"}"#)
                .unwrap();
        assert_eq!(
            artifact,
            WorkerLine::Artifact {
                name: "vocals".into(),
                key: "output/u/j/vocals.wav".into()
            }
        );
    }

    #[tokio::test]
    async fn missing_command_is_transient() {
        let runner = CommandTaskRunner::new(HashMap::new());
        let request = TaskRequest {
            correlation_id: "run-1".into(),
            job_id: uuid::Uuid::now_v7(),
            owner_id: "u1".into(),
            stage: StageKind::Separation,
            input: unplugd_core::storage_keys::ObjectRef::new("up", "uploads/u1/j/a.mp3"),
            output_bucket: "out".into(),
            output_prefix: "output/u1/j/".into(),
        };

        let err = runner.submit(request).await.err().unwrap();
        assert_eq!(err.class, ErrorClass::TransientInfrastructure);
    }
}
