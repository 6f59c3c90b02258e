use std::collections::HashMap;
use std::time::Duration;

use unplugd_core::retry::{RetryPolicy, RetryRule};
use unplugd_core::stages::StageKind;

use crate::orchestrator::OrchestratorSettings;
use crate::runners::StageCommand;

/// Pipeline configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Bucket holding original uploads.
    pub upload_bucket: String,
    /// Bucket receiving stage artifacts.
    pub output_bucket: String,
    /// Orchestration runs allowed to execute at once.
    pub max_concurrent_runs: usize,
    pub separation_timeout_secs: u64,
    pub transcription_timeout_secs: u64,
    /// Worker command per stage. Either every stage has one or none does.
    pub stage_commands: HashMap<StageKind, StageCommand>,
    /// Run the scripted in-process runner even against durable stores.
    pub allow_scripted_runner: bool,
    pub retry_transient: RetryRule,
    pub retry_task: RetryRule,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                              | Default            |
    /// |--------------------------------------|--------------------|
    /// | `UPLOAD_BUCKET`                      | `unplugd-uploads`  |
    /// | `OUTPUT_BUCKET`                      | `unplugd-output`   |
    /// | `MAX_CONCURRENT_RUNS`                | `4`                |
    /// | `SEPARATION_TIMEOUT_SECS`            | `1800`             |
    /// | `TRANSCRIPTION_TIMEOUT_SECS`         | `900`              |
    /// | `SEPARATION_COMMAND`                 | (unset)            |
    /// | `TRANSCRIPTION_COMMAND`              | (unset)            |
    /// | `ALLOW_SCRIPTED_RUNNER`              | `false`            |
    /// | `RETRY_TRANSIENT_MAX_ATTEMPTS`       | `5`                |
    /// | `RETRY_TRANSIENT_INITIAL_DELAY_SECS` | `60`               |
    /// | `RETRY_TRANSIENT_BACKOFF_RATE`       | `2.0`              |
    /// | `RETRY_TASK_MAX_ATTEMPTS`            | `2`                |
    /// | `RETRY_TASK_INITIAL_DELAY_SECS`      | `30`               |
    /// | `RETRY_TASK_BACKOFF_RATE`            | `2.0`              |
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.into());

        let upload_bucket = var("UPLOAD_BUCKET", "unplugd-uploads");
        let output_bucket = var("OUTPUT_BUCKET", "unplugd-output");

        let max_concurrent_runs: usize = var("MAX_CONCURRENT_RUNS", "4")
            .parse()
            .expect("MAX_CONCURRENT_RUNS must be a valid usize");
        assert!(max_concurrent_runs > 0, "MAX_CONCURRENT_RUNS must be at least 1");

        let separation_timeout_secs: u64 = var("SEPARATION_TIMEOUT_SECS", "1800")
            .parse()
            .expect("SEPARATION_TIMEOUT_SECS must be a valid u64");

        let transcription_timeout_secs: u64 = var("TRANSCRIPTION_TIMEOUT_SECS", "900")
            .parse()
            .expect("TRANSCRIPTION_TIMEOUT_SECS must be a valid u64");

        let mut stage_commands = HashMap::new();
        for (stage, name) in [
            (StageKind::Separation, "SEPARATION_COMMAND"),
            (StageKind::Transcription, "TRANSCRIPTION_COMMAND"),
        ] {
            if let Some(command) = lookup(name).as_deref().and_then(StageCommand::parse) {
                stage_commands.insert(stage, command);
            }
        }
        assert!(
            stage_commands.is_empty() || stage_commands.len() == StageKind::PIPELINE.len(),
            "SEPARATION_COMMAND and TRANSCRIPTION_COMMAND must be set together"
        );

        let allow_scripted_runner = var("ALLOW_SCRIPTED_RUNNER", "false")
            .parse()
            .expect("ALLOW_SCRIPTED_RUNNER must be true or false");

        let retry_transient = RetryRule {
            max_attempts: var("RETRY_TRANSIENT_MAX_ATTEMPTS", "5")
                .parse()
                .expect("RETRY_TRANSIENT_MAX_ATTEMPTS must be a valid u32"),
            initial_delay: Duration::from_secs(
                var("RETRY_TRANSIENT_INITIAL_DELAY_SECS", "60")
                    .parse()
                    .expect("RETRY_TRANSIENT_INITIAL_DELAY_SECS must be a valid u64"),
            ),
            backoff_rate: var("RETRY_TRANSIENT_BACKOFF_RATE", "2.0")
                .parse()
                .expect("RETRY_TRANSIENT_BACKOFF_RATE must be a valid f64"),
            max_delay: None,
        };

        let retry_task = RetryRule {
            max_attempts: var("RETRY_TASK_MAX_ATTEMPTS", "2")
                .parse()
                .expect("RETRY_TASK_MAX_ATTEMPTS must be a valid u32"),
            initial_delay: Duration::from_secs(
                var("RETRY_TASK_INITIAL_DELAY_SECS", "30")
                    .parse()
                    .expect("RETRY_TASK_INITIAL_DELAY_SECS must be a valid u64"),
            ),
            backoff_rate: var("RETRY_TASK_BACKOFF_RATE", "2.0")
                .parse()
                .expect("RETRY_TASK_BACKOFF_RATE must be a valid f64"),
            max_delay: None,
        };

        Self {
            upload_bucket,
            output_bucket,
            max_concurrent_runs,
            separation_timeout_secs,
            transcription_timeout_secs,
            stage_commands,
            allow_scripted_runner,
            retry_transient,
            retry_task,
        }
    }

    /// Whether the scripted runner may stand in for missing stage commands.
    /// It fakes every stage, so it is only acceptable over in-memory stores
    /// unless explicitly allowed.
    pub fn scripted_runner_allowed(&self, durable_stores: bool) -> bool {
        !durable_stores || self.allow_scripted_runner
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            transient: self.retry_transient,
            task_execution: self.retry_task,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            policy: self.retry_policy(),
            separation_timeout: Duration::from_secs(self.separation_timeout_secs),
            transcription_timeout: Duration::from_secs(self.transcription_timeout_secs),
            upload_bucket: self.upload_bucket.clone(),
            output_bucket: self.output_bucket.clone(),
        }
    }
}
