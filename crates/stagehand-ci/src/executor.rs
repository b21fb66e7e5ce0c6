//! Plan executor: an explicit state machine over the locked plan.
//!
//! ```text
//! Idle -> Preparing -> Running(0) -> Running(1) -> ... -> Completed
//!             |             |
//!             v             +-> Failed(i)      (non-zero exit, stop)
//!        PrepFailed         +-> Cancelled(i)   (run cancelled mid-stage)
//! ```
//!
//! Stages run strictly in order and the first failure stops the run.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagehand_core::obs::{emit_run_finished, emit_stage_finished, emit_stage_started};
use stagehand_core::LockedPlan;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::environment::{EnvironmentPreparer, ExecutionEnvironment, NoopPreparer};
use crate::error::RunError;
use crate::runner::{run_stage, StageOutcome, StageResult};

/// Executor states. `Running`, `Failed` and `Cancelled` carry the stage index;
/// a run cancelled while preparing reports `Cancelled(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum ExecutorState {
    Idle,
    Preparing,
    Running(usize),
    Failed(usize),
    Completed,
    Cancelled(usize),
    PrepFailed,
}

impl ExecutorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutorState::Failed(_)
                | ExecutorState::Completed
                | ExecutorState::Cancelled(_)
                | ExecutorState::PrepFailed
        )
    }

    /// Legal transitions of the machine.
    pub fn can_transition_to(&self, next: ExecutorState) -> bool {
        use ExecutorState::*;
        match (*self, next) {
            (Idle, Preparing) => true,
            (Preparing, Running(0) | Completed | PrepFailed | Cancelled(0)) => true,
            (Running(i), Running(j)) => j == i + 1,
            (Running(i), Failed(j) | Cancelled(j)) => i == j,
            (Running(_), Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorState::Idle => write!(f, "idle"),
            ExecutorState::Preparing => write!(f, "preparing"),
            ExecutorState::Running(i) => write!(f, "running({i})"),
            ExecutorState::Failed(i) => write!(f, "failed({i})"),
            ExecutorState::Completed => write!(f, "completed"),
            ExecutorState::Cancelled(i) => write!(f, "cancelled({i})"),
            ExecutorState::PrepFailed => write!(f, "prep_failed"),
        }
    }
}

/// Everything one execution produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Digest of the locked plan that was executed.
    pub plan_digest: String,

    pub final_state: ExecutorState,

    /// Every state entered, `Idle` first.
    pub transitions: Vec<ExecutorState>,

    /// One result per stage that ran to an exit status.
    pub results: Vec<StageResult>,

    /// Set when preparation failed.
    pub prep_error: Option<String>,

    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionReport {
    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    /// Number of stages that failed.
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.passed()).count()
    }

    pub fn is_success(&self) -> bool {
        self.final_state == ExecutorState::Completed
    }

    /// Map the final state to the run outcome.
    pub fn into_result(self) -> Result<ExecutionReport, RunError> {
        let state = self.final_state;
        match state {
            ExecutorState::Completed => Ok(self),
            ExecutorState::Failed(index) => {
                let (name, exit_status) = self
                    .results
                    .iter()
                    .find(|r| r.index == index)
                    .map(|r| (r.name.clone(), r.exit_status))
                    .unwrap_or_default();
                Err(RunError::StageFailed {
                    index,
                    name,
                    exit_status,
                })
            }
            ExecutorState::Cancelled(index) => Err(RunError::Cancelled { index }),
            ExecutorState::PrepFailed => Err(RunError::EnvironmentPrepFailed(
                self.prep_error.unwrap_or_default(),
            )),
            state => Err(RunError::Incomplete {
                state: state.to_string(),
            }),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

struct Machine {
    state: ExecutorState,
    transitions: Vec<ExecutorState>,
}

impl Machine {
    fn new() -> Self {
        Self {
            state: ExecutorState::Idle,
            transitions: vec![ExecutorState::Idle],
        }
    }

    fn advance(&mut self, next: ExecutorState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
        self.transitions.push(next);
    }
}

/// Runs a locked plan in a prepared environment.
pub struct PlanExecutor {
    preparer: Arc<dyn EnvironmentPreparer>,
    cancel: CancellationToken,
}

impl Default for PlanExecutor {
    fn default() -> Self {
        Self::new(Arc::new(NoopPreparer))
    }
}

impl PlanExecutor {
    pub fn new(preparer: Arc<dyn EnvironmentPreparer>) -> Self {
        Self {
            preparer,
            cancel: CancellationToken::new(),
        }
    }

    /// Observe `token` for cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute every stage of `locked` in order, stopping at the first failure.
    ///
    /// Takes the locked plan by value: a plan is executed once per run.
    pub async fn execute(&self, locked: LockedPlan, env: &ExecutionEnvironment) -> ExecutionReport {
        let start = Instant::now();
        let started_at = Utc::now();
        let digest = locked.digest().to_string();
        let plan = locked.into_plan();

        let mut machine = Machine::new();
        let mut results = Vec::with_capacity(plan.len());
        let mut prep_error = None;

        machine.advance(ExecutorState::Preparing);
        info!(preparer = %self.preparer.describe(), stages = plan.len(), "preparing environment");

        let prepared = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            prepared = self.prepare(env) => Some(prepared),
        };

        match prepared {
            None => {
                warn!("run cancelled during preparation");
                machine.advance(ExecutorState::Cancelled(0));
            }
            Some(Err(err)) => {
                warn!(error = %err, "environment preparation failed");
                prep_error = Some(err.to_string());
                machine.advance(ExecutorState::PrepFailed);
            }
            Some(Ok(())) => {
                for (index, stage) in plan.stages.iter().enumerate() {
                    machine.advance(ExecutorState::Running(index));
                    emit_stage_started(index, &stage.name);

                    match run_stage(index, stage, env, &self.cancel).await {
                        StageOutcome::Cancelled => {
                            warn!(index = index, stage = %stage.name, "stage cancelled");
                            machine.advance(ExecutorState::Cancelled(index));
                            break;
                        }
                        StageOutcome::Finished(result) => {
                            emit_stage_finished(
                                index,
                                &result.name,
                                result.exit_status,
                                result.duration_ms,
                            );
                            let passed = result.passed();
                            results.push(result);
                            if !passed {
                                machine.advance(ExecutorState::Failed(index));
                                break;
                            }
                        }
                    }
                }
                if !machine.state.is_terminal() {
                    machine.advance(ExecutorState::Completed);
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        emit_run_finished(&machine.state, results.len(), duration_ms);

        ExecutionReport {
            plan_digest: digest,
            final_state: machine.state,
            transitions: machine.transitions,
            results,
            prep_error,
            started_at,
            duration_ms,
        }
    }

    async fn prepare(&self, env: &ExecutionEnvironment) -> Result<(), crate::error::ExecutorError> {
        env.ensure_dirs()?;
        self.preparer.prepare(env).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecutorState::*;

    #[test]
    fn test_legal_transitions() {
        assert!(Idle.can_transition_to(Preparing));
        assert!(Preparing.can_transition_to(Running(0)));
        assert!(Preparing.can_transition_to(Completed));
        assert!(Running(0).can_transition_to(Running(1)));
        assert!(Running(1).can_transition_to(Failed(1)));
        assert!(Running(2).can_transition_to(Completed));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Idle.can_transition_to(Running(0)));
        assert!(!Running(0).can_transition_to(Running(2)));
        assert!(!Running(1).can_transition_to(Failed(0)));
        assert!(!Failed(1).can_transition_to(Running(2)));
        assert!(!Completed.can_transition_to(Running(0)));
        assert!(!Preparing.can_transition_to(Running(1)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Running(3).to_string(), "running(3)");
        assert_eq!(Completed.to_string(), "completed");
        assert_eq!(PrepFailed.to_string(), "prep_failed");
    }

    #[test]
    fn test_state_serializes_with_index() {
        let json = serde_json::to_value(Failed(2)).unwrap();
        assert_eq!(json, serde_json::json!({"state": "failed", "stage": 2}));
        let json = serde_json::to_value(Completed).unwrap();
        assert_eq!(json, serde_json::json!({"state": "completed"}));
    }

    #[test]
    fn test_report_into_result_failed() {
        let report = ExecutionReport {
            plan_digest: "abc".to_string(),
            final_state: Failed(1),
            transitions: vec![Idle, Preparing, Running(0), Running(1), Failed(1)],
            results: vec![
                StageResult {
                    index: 0,
                    name: "Build".to_string(),
                    exit_status: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration_ms: 1,
                },
                StageResult {
                    index: 1,
                    name: "Test".to_string(),
                    exit_status: 2,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration_ms: 1,
                },
            ],
            prep_error: None,
            started_at: Utc::now(),
            duration_ms: 2,
        };
        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.failed_count(), 1);

        match report.into_result() {
            Err(RunError::StageFailed {
                index,
                name,
                exit_status,
            }) => {
                assert_eq!(index, 1);
                assert_eq!(name, "Test");
                assert_eq!(exit_status, 2);
            }
            other => panic!("expected StageFailed, got {other:?}"),
        }
    }
}
