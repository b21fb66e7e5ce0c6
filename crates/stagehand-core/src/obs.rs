//! Structured lifecycle events for planning and execution.
//!
//! Every event carries an `event` field so log pipelines can filter on it
//! regardless of message wording.

use tracing::{info, warn};

use crate::domain::BuildContext;

/// RAII guard that tags every log line of a run with its context.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(ctx: &BuildContext) -> Self {
        let span = tracing::info_span!(
            "stagehand.run",
            repository = %ctx.repository_name,
            branch = %ctx.branch,
            build_number = ctx.build_number,
        );
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_plan_requested(url: &str, attempts: usize) {
    info!(event = "plan.requested", url = %url, attempts = attempts);
}

pub fn emit_plan_accepted(stages: usize, attempt: u32) {
    info!(event = "plan.accepted", stages = stages, attempt = attempt);
}

pub fn emit_plan_fallback(reason: &dyn std::fmt::Display) {
    warn!(event = "plan.fallback", reason = %reason);
}

pub fn emit_stage_started(index: usize, name: &str) {
    info!(event = "stage.started", index = index, stage = %name);
}

pub fn emit_stage_finished(index: usize, name: &str, exit_status: i32, duration_ms: u64) {
    info!(
        event = "stage.finished",
        index = index,
        stage = %name,
        exit_status = exit_status,
        duration_ms = duration_ms,
    );
}

pub fn emit_run_finished(state: &dyn std::fmt::Display, stages_run: usize, duration_ms: u64) {
    info!(
        event = "run.finished",
        state = %state,
        stages_run = stages_run,
        duration_ms = duration_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter(&BuildContext::new("demo", "main", 7, ""));
        emit_stage_started(0, "Build");
    }
}
