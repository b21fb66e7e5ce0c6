//! Error types for the planner gateway

use thiserror::Error;

use crate::attempt::AttemptRecord;

/// Errors that can occur while acquiring a plan from the planner
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The liveness probe did not return the success status
    #[error("planner health check failed: {reason}")]
    HealthCheckFailed { status: Option<u16>, reason: String },

    /// Every attempt in the retry schedule failed
    #[error(
        "planner unavailable after {attempts} attempt(s), last status {}",
        describe_status(.last_status)
    )]
    Unavailable {
        attempts: u32,
        last_status: Option<u16>,
        last_body_sample: String,
        attempt_log: Vec<AttemptRecord>,
    },

    /// The overall acquisition budget ran out
    #[error("planner acquisition exceeded its budget of {budget_ms}ms")]
    BudgetExceeded {
        budget_ms: u64,
        attempt_log: Vec<AttemptRecord>,
    },

    /// Configuration rejected before any I/O
    #[error("invalid gateway configuration: {0}")]
    InvalidConfig(String),

    /// HTTP client could not be built or the request could not be encoded
    #[error("http client error: {0}")]
    Client(String),
}

impl GatewayError {
    /// Attempts made before the error, in order.
    pub fn attempt_log(&self) -> &[AttemptRecord] {
        match self {
            GatewayError::Unavailable { attempt_log, .. }
            | GatewayError::BudgetExceeded { attempt_log, .. } => attempt_log,
            _ => &[],
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Client(err.to_string())
    }
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "none (no response)".to_string(),
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
