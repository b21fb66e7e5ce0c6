//! Stagehand Core Library
//!
//! Domain model and pure logic for planner-driven builds: the build context,
//! plans and stages, the two-tier plan parser, the optional stage policy, the
//! deterministic fallback plan, and the on-disk plan lock.

pub mod artifacts;
pub mod domain;
pub mod fallback;
pub mod git;
pub mod lock;
pub mod obs;
pub mod parser;
pub mod policy;
pub mod telemetry;

pub use artifacts::{
    attempt_artifact_name, emit_best_effort, ArtifactSink, DirArtifactSink, MemoryArtifactSink,
    CONTEXT_ARTIFACT, EXECUTION_REPORT_ARTIFACT, LOCKED_PLAN_ARTIFACT, RAW_RESPONSE_ARTIFACT,
};
pub use domain::{BuildContext, CoreError, Plan, PlanError, Result, Stage};
pub use fallback::fallback_plan;
pub use git::{capture_branch, capture_last_commit_message};
pub use lock::{plan_digest, unlock, LockHandle, LockedPlan, PlanLock, PlanOrigin};
pub use obs::RunSpan;
pub use parser::{find_last_balanced_object, is_well_formed, parse_plan, Extraction};
pub use policy::{AllowlistSet, StageGuard, StagePolicy};
pub use telemetry::init_tracing;

/// Stagehand version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
