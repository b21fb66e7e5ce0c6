//! Execution and run-level error taxonomy.

use planner_client::GatewayError;
use stagehand_core::{CoreError, PlanError};
use thiserror::Error;

/// Failures of the execution layer outside the stage commands themselves.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// One-time environment setup failed; no stage ran.
    #[error("environment preparation failed: {0}")]
    EnvironmentPrepFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a run did not complete.
///
/// Planning-side variants (`HealthCheckFailed` through `PolicyViolation`) are
/// absorbed by the fallback plan when it is enabled; every other variant is
/// fatal.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("planner health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("planner unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("no valid plan found in planner response")]
    NoValidPlan,

    #[error("plan has invalid shape: {0}")]
    InvalidShape(String),

    #[error("stage {index} rejected by policy: {reason}")]
    PolicyViolation { index: usize, reason: String },

    #[error("stage {index} ({name}) failed with exit status {exit_status}")]
    StageFailed {
        index: usize,
        name: String,
        exit_status: i32,
    },

    #[error("environment preparation failed: {0}")]
    EnvironmentPrepFailed(String),

    #[error("run cancelled at stage {index}")]
    Cancelled { index: usize },

    /// The executor stopped in a non-terminal state.
    #[error("run ended in non-terminal state {state}")]
    Incomplete { state: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Lock, storage or context-capture failure.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl RunError {
    /// Whether the fallback plan may stand in for this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RunError::HealthCheckFailed(_)
                | RunError::GatewayUnavailable(_)
                | RunError::NoValidPlan
                | RunError::InvalidShape(_)
                | RunError::PolicyViolation { .. }
        )
    }
}

impl From<GatewayError> for RunError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::HealthCheckFailed { reason, .. } => RunError::HealthCheckFailed(reason),
            err @ (GatewayError::Unavailable { .. } | GatewayError::BudgetExceeded { .. }) => {
                RunError::GatewayUnavailable(err.to_string())
            }
            GatewayError::InvalidConfig(msg) | GatewayError::Client(msg) => {
                RunError::Configuration(msg)
            }
        }
    }
}

impl From<PlanError> for RunError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::NoValidPlan => RunError::NoValidPlan,
            PlanError::InvalidShape(reason) => RunError::InvalidShape(reason),
            PlanError::PolicyViolation { index, reason } => {
                RunError::PolicyViolation { index, reason }
            }
        }
    }
}

impl From<ExecutorError> for RunError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::EnvironmentPrepFailed(reason) => RunError::EnvironmentPrepFailed(reason),
            ExecutorError::Io(e) => RunError::Core(CoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planning_errors_are_recoverable() {
        assert!(RunError::NoValidPlan.is_recoverable());
        assert!(RunError::from(PlanError::InvalidShape("x".into())).is_recoverable());
        assert!(RunError::from(GatewayError::HealthCheckFailed {
            status: Some(503),
            reason: "unexpected status 503".into(),
        })
        .is_recoverable());
        assert!(RunError::from(GatewayError::BudgetExceeded {
            budget_ms: 10,
            attempt_log: Vec::new(),
        })
        .is_recoverable());
    }

    #[test]
    fn test_execution_errors_are_fatal() {
        let failed = RunError::StageFailed {
            index: 2,
            name: "Test".into(),
            exit_status: 1,
        };
        assert!(!failed.is_recoverable());
        assert_eq!(failed.to_string(), "stage 2 (Test) failed with exit status 1");
        assert!(!RunError::EnvironmentPrepFailed("npm ci".into()).is_recoverable());
        assert!(!RunError::Configuration("bad".into()).is_recoverable());
        assert!(!RunError::Core(CoreError::AlreadyLocked("x".into())).is_recoverable());
    }
}
