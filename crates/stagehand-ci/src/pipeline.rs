//! Run orchestration: acquire and lock, then unlock and execute.
//!
//! The two halves only meet through the lock file, so they may run in
//! different processes; `run` does both in one process through the same file.

use std::path::Path;

use planner_client::PlanSource;
use stagehand_core::{
    emit_best_effort, unlock, ArtifactSink, BuildContext, CoreError, LockHandle, PlanLock,
    PlanOrigin, EXECUTION_REPORT_ARTIFACT, LOCKED_PLAN_ARTIFACT,
};
use tracing::{error, info};

use crate::acquire::{acquire_plan, AcquireOptions};
use crate::environment::ExecutionEnvironment;
use crate::error::RunError;
use crate::executor::{ExecutionReport, PlanExecutor};

/// Outcome of a full plan-then-execute run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub origin: PlanOrigin,
    pub report: ExecutionReport,
}

/// Acquire a plan and freeze it into `run_dir`.
///
/// Refuses to start if `run_dir` already holds a lock, so an existing plan is
/// never re-requested.
pub async fn plan_and_lock(
    source: &dyn PlanSource,
    ctx: &BuildContext,
    options: &AcquireOptions,
    run_dir: &Path,
    sink: &dyn ArtifactSink,
) -> Result<(LockHandle, PlanOrigin), RunError> {
    let lock = PlanLock::new(run_dir);
    if lock.is_locked() {
        return Err(CoreError::AlreadyLocked(lock.path().display().to_string()).into());
    }

    let acquired = acquire_plan(source, ctx, options, sink).await?;
    let origin = acquired.origin.clone();
    let handle = lock.lock(acquired.plan, acquired.origin)?;

    let locked = unlock(&handle)?;
    emit_best_effort(sink, LOCKED_PLAN_ARTIFACT, &locked.to_json()?);

    Ok((handle, origin))
}

/// Read the locked plan behind `handle` and execute it.
///
/// Stage failures are reported in the returned report, not as `Err`; see
/// [`ExecutionReport::into_result`].
pub async fn execute_locked(
    handle: &LockHandle,
    env: &ExecutionEnvironment,
    executor: &PlanExecutor,
    sink: &dyn ArtifactSink,
) -> Result<ExecutionReport, RunError> {
    let locked = unlock(handle)?;
    info!(
        lock_id = %locked.lock_id(),
        digest = %locked.digest(),
        stages = locked.plan().len(),
        fallback = locked.origin().is_fallback(),
        "executing locked plan"
    );

    let report = executor.execute(locked, env).await;

    match report.to_json() {
        Ok(bytes) => emit_best_effort(sink, EXECUTION_REPORT_ARTIFACT, &bytes),
        Err(e) => error!(error = %e, "failed to encode execution report"),
    }
    Ok(report)
}

/// Plan, lock, unlock and execute in one process.
pub async fn run(
    source: &dyn PlanSource,
    ctx: &BuildContext,
    options: &AcquireOptions,
    run_dir: &Path,
    env: &ExecutionEnvironment,
    executor: &PlanExecutor,
    sink: &dyn ArtifactSink,
) -> Result<RunOutcome, RunError> {
    let (handle, origin) = plan_and_lock(source, ctx, options, run_dir, sink).await?;
    let report = execute_locked(&handle, env, executor, sink).await?;
    Ok(RunOutcome { origin, report })
}
