//! Orchestration state machine.
//!
//! ```text
//! ValidateInput -> RunStage(separation) -> RunStage(transcription)
//!   -> MarkCompleted -> SendCompletionNotice -> CleanupIntermediateInputs -> Done
//!
//! ValidateInput / RunStage --(transient or task error)--> same state after backoff
//! ValidateInput / RunStage / MarkCompleted --(unrecoverable)--> Failed -> Done
//! MarkCompleted --(record deleted)--> Done(Abandoned)
//! ```
//!
//! [`transition`] is pure: the executor performs the side effect for the
//! current state, reports a [`StepOutcome`], and follows the returned
//! [`Transition`] (sleeping for `delay` first when set).

use std::time::Duration;

use unplugd_core::retry::{ErrorClass, RetryDecision, RetryPolicy};
use unplugd_core::stages::StageKind;

use crate::task::StageError;

/// Failures seen so far for the current step, per error class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptCounters {
    pub transient: u32,
    pub task_execution: u32,
    pub validation: u32,
}

impl AttemptCounters {
    /// Record a failure and return the new count for its class.
    pub fn record(&mut self, class: ErrorClass) -> u32 {
        let counter = match class {
            ErrorClass::TransientInfrastructure => &mut self.transient,
            ErrorClass::TaskExecution => &mut self.task_execution,
            ErrorClass::Validation => &mut self.validation,
        };
        *counter += 1;
        *counter
    }

    /// Invocations made so far, across classes, before the next one.
    pub fn total(&self) -> u32 {
        self.transient + self.task_execution + self.validation
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    /// The job record disappeared mid-run; nothing was written back.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    ValidateInput {
        attempts: AttemptCounters,
    },
    RunStage {
        stage: StageKind,
        attempts: AttemptCounters,
    },
    MarkCompleted,
    SendCompletionNotice,
    CleanupIntermediateInputs,
    Failed {
        error: StageError,
    },
    Done(RunOutcome),
}

impl PipelineState {
    /// Entry state of every run.
    pub fn start() -> Self {
        PipelineState::ValidateInput {
            attempts: AttemptCounters::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::ValidateInput { .. } => "ValidateInput",
            PipelineState::RunStage { .. } => "RunStage",
            PipelineState::MarkCompleted => "MarkCompleted",
            PipelineState::SendCompletionNotice => "SendCompletionNotice",
            PipelineState::CleanupIntermediateInputs => "CleanupIntermediateInputs",
            PipelineState::Failed { .. } => "Failed",
            PipelineState::Done(_) => "Done",
        }
    }
}

/// Result of performing the current state's side effect.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Validated,
    Invalid(StageError),
    StageSucceeded,
    StageFailed(StageError),
    Marked,
    /// The completion write failed for a reason other than a missing record.
    MarkFailed(StageError),
    RecordMissing,
    Notified,
    CleanedUp,
    Compensated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: PipelineState,
    /// Backoff to wait before entering `next`.
    pub delay: Option<Duration>,
}

impl Transition {
    fn to(next: PipelineState) -> Self {
        Self { next, delay: None }
    }

    fn after(next: PipelineState, delay: Duration) -> Self {
        Self {
            next,
            delay: Some(delay),
        }
    }
}

fn first_stage() -> PipelineState {
    PipelineState::RunStage {
        stage: StageKind::first(),
        attempts: AttemptCounters::default(),
    }
}

/// Retry `state` after the policy's backoff, or give up with `error`.
fn retry_or_fail(
    attempts: AttemptCounters,
    error: StageError,
    policy: &RetryPolicy,
    state: impl FnOnce(AttemptCounters) -> PipelineState,
) -> Transition {
    let mut attempts = attempts;
    let failures = attempts.record(error.class);
    match policy.decide(error.class, failures) {
        RetryDecision::Retry { delay } => Transition::after(state(attempts), delay),
        RetryDecision::GiveUp => Transition::to(PipelineState::Failed { error }),
    }
}

/// Compute the next state.
pub fn transition(state: &PipelineState, outcome: StepOutcome, policy: &RetryPolicy) -> Transition {
    use PipelineState as S;
    use StepOutcome as O;

    match (state, outcome) {
        (S::Done(done), _) => Transition::to(S::Done(*done)),

        (S::ValidateInput { .. }, O::Validated) => Transition::to(first_stage()),
        (S::ValidateInput { attempts }, O::Invalid(error)) => {
            retry_or_fail(*attempts, error, policy, |attempts| S::ValidateInput { attempts })
        }

        (S::RunStage { stage, .. }, O::StageSucceeded) => match stage.next() {
            Some(next) => Transition::to(S::RunStage {
                stage: next,
                attempts: AttemptCounters::default(),
            }),
            None => Transition::to(S::MarkCompleted),
        },
        (S::RunStage { stage, attempts }, O::StageFailed(error)) => {
            let stage = *stage;
            retry_or_fail(*attempts, error, policy, |attempts| S::RunStage { stage, attempts })
        }

        (S::MarkCompleted, O::Marked) => Transition::to(S::SendCompletionNotice),
        (S::MarkCompleted, O::MarkFailed(error)) => Transition::to(S::Failed { error }),
        (S::MarkCompleted, O::RecordMissing) => Transition::to(S::Done(RunOutcome::Abandoned)),

        (S::SendCompletionNotice, O::Notified) => Transition::to(S::CleanupIntermediateInputs),
        (S::CleanupIntermediateInputs, O::CleanedUp) => {
            Transition::to(S::Done(RunOutcome::Completed))
        }

        (S::Failed { .. }, O::Compensated) => Transition::to(S::Done(RunOutcome::Failed)),

        (state, outcome) => Transition::to(S::Failed {
            error: StageError::task(format!(
                "unexpected outcome {outcome:?} in state {}",
                state.name()
            )),
        }),
    }
}
