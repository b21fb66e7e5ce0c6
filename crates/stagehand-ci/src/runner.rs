//! Single-stage execution.

use std::process::Output;
use std::time::Instant;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use stagehand_core::Stage;
use tokio_util::sync::CancellationToken;

use crate::environment::ExecutionEnvironment;
use crate::process::wait_group_output;

/// Result of a stage execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageResult {
    /// Position in the plan.
    pub index: usize,

    /// Stage name.
    pub name: String,

    /// Exit status (0 = success, -1 = spawn failure, timeout or signal).
    pub exit_status: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl StageResult {
    /// Whether this stage passed (exit status 0).
    pub fn passed(&self) -> bool {
        self.exit_status == 0
    }
}

/// How a stage invocation ended.
#[derive(Debug)]
pub enum StageOutcome {
    Finished(StageResult),
    /// The run was cancelled mid-stage; the process was killed and its
    /// output discarded.
    Cancelled,
}

/// Execute `stage` as one shell-interpretable unit under `env`.
///
/// Spawn failures and timeouts become a failed result with exit status -1.
pub async fn run_stage(
    index: usize,
    stage: &Stage,
    env: &ExecutionEnvironment,
    cancel: &CancellationToken,
) -> StageOutcome {
    let start = Instant::now();

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return StageOutcome::Cancelled,
        output = spawn_and_wait(stage, env) => output,
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let result = match output {
        Ok(output) => StageResult {
            index,
            name: stage.name.clone(),
            exit_status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
        },
        Err(e) => StageResult {
            index,
            name: stage.name.clone(),
            exit_status: -1,
            stdout: String::new(),
            stderr: format!("{e:#}"),
            duration_ms,
        },
    };
    StageOutcome::Finished(result)
}

// Dropping this future kills the stage's whole process group.
async fn spawn_and_wait(stage: &Stage, env: &ExecutionEnvironment) -> anyhow::Result<Output> {
    let child = env
        .shell_command(&stage.command)
        .spawn()
        .with_context(|| format!("failed to spawn {} for stage {}", env.shell, stage.name))?;

    let output = match env.stage_timeout() {
        Some(timeout) => tokio::time::timeout(timeout, wait_group_output(child))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "stage {} timed out after {} seconds",
                    stage.name,
                    timeout.as_secs()
                )
            })??,
        None => wait_group_output(child).await?,
    };
    Ok(output)
}
