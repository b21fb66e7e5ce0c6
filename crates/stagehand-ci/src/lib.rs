//! Stagehand CI
//!
//! Acquires a build plan from the remote planner (or the deterministic
//! fallback), freezes it with the plan lock, and executes its stages in
//! order with stop-on-first-failure semantics.

pub mod acquire;
pub mod environment;
pub mod error;
pub mod executor;
pub mod pipeline;
mod process;
pub mod runner;

pub use acquire::{acquire_plan, AcquireOptions, AcquiredPlan};
pub use environment::{
    CommandPreparer, EnvironmentPreparer, ExecutionEnvironment, NoopPreparer, DEFAULT_SHELL,
    ENV_CACHE_DIR,
};
pub use error::{ExecutorError, RunError};
pub use executor::{ExecutionReport, ExecutorState, PlanExecutor};
pub use pipeline::{execute_locked, plan_and_lock, run, RunOutcome};
pub use runner::{run_stage, StageOutcome, StageResult};

pub use tokio_util::sync::CancellationToken;
