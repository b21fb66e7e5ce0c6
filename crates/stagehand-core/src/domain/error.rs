//! Domain-level error taxonomy for Stagehand.

/// Reasons a planner response could not be turned into an executable plan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Neither the whole body nor any balanced object inside it parsed.
    #[error("no valid plan found in planner response")]
    NoValidPlan,

    /// The document parsed but does not have the plan shape.
    #[error("plan has invalid shape: {0}")]
    InvalidShape(String),

    /// The plan is well-shaped but a stage is not admitted by the stage policy.
    #[error("stage {index} rejected by policy: {reason}")]
    PolicyViolation { index: usize, reason: String },
}

/// Stagehand core errors (storage, integrity, context capture).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("plan already locked at {0}")]
    AlreadyLocked(String),

    #[error("no locked plan at {0}")]
    LockNotFound(String),

    #[error("unsupported lock version {found} (expected {expected})")]
    UnsupportedLockVersion { found: u32, expected: u32 },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("refusing to lock an invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Stagehand core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
