//! Plan acquisition: gateway, parser, stage policy and, when enabled, the
//! deterministic fallback.

use planner_client::{AttemptRecord, PlanSource};
use serde::{Deserialize, Serialize};
use stagehand_core::obs::{emit_plan_accepted, emit_plan_fallback};
use stagehand_core::{
    attempt_artifact_name, emit_best_effort, fallback_plan, ArtifactSink, BuildContext, Plan,
    PlanOrigin, StageGuard, StagePolicy, CONTEXT_ARTIFACT, RAW_RESPONSE_ARTIFACT,
};
use tracing::{error, info};

use crate::error::RunError;

/// Options controlling how a plan is obtained.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Substitute the fallback plan when the planner cannot produce a usable
    /// one. Off means planner failure aborts the run.
    pub fallback_enabled: bool,

    /// Applied to remote plans only.
    pub policy: StagePolicy,
}

impl AcquireOptions {
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn with_policy(mut self, policy: StagePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// A plan ready to be locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredPlan {
    pub plan: Plan,
    pub origin: PlanOrigin,
}

/// Obtain a plan for `ctx`.
///
/// Gateway, parse and policy failures are absorbed by the fallback plan when
/// `options.fallback_enabled` is set; otherwise they are returned before any
/// stage could run. Diagnostics go to `sink` regardless of outcome.
pub async fn acquire_plan(
    source: &dyn PlanSource,
    ctx: &BuildContext,
    options: &AcquireOptions,
    sink: &dyn ArtifactSink,
) -> Result<AcquiredPlan, RunError> {
    let guard = StageGuard::new(&options.policy)
        .map_err(|e| RunError::Configuration(e.to_string()))?;

    match serde_json::to_vec_pretty(ctx) {
        Ok(bytes) => emit_best_effort(sink, CONTEXT_ARTIFACT, &bytes),
        Err(e) => error!(error = %e, "failed to encode build context artifact"),
    }

    info!(source = %source.describe(), fallback_enabled = options.fallback_enabled, "acquiring plan");

    match request_remote(source, ctx, &guard, sink).await {
        Ok(plan) => Ok(AcquiredPlan {
            plan,
            origin: PlanOrigin::Remote,
        }),
        Err(err) if options.fallback_enabled && err.is_recoverable() => {
            emit_plan_fallback(&err);
            Ok(AcquiredPlan {
                plan: fallback_plan(ctx),
                origin: PlanOrigin::Fallback {
                    reason: err.to_string(),
                },
            })
        }
        Err(err) => {
            error!(error = %err, "planner failed and fallback is disabled");
            Err(err)
        }
    }
}

async fn request_remote(
    source: &dyn PlanSource,
    ctx: &BuildContext,
    guard: &StageGuard,
    sink: &dyn ArtifactSink,
) -> Result<Plan, RunError> {
    let raw = match source.request_plan(ctx).await {
        Ok(raw) => raw,
        Err(err) => {
            archive_attempts(sink, err.attempt_log());
            if let Some(last) = err.attempt_log().iter().rev().find(|r| r.status.is_some()) {
                emit_best_effort(sink, RAW_RESPONSE_ARTIFACT, last.body_sample.as_bytes());
            }
            return Err(err.into());
        }
    };

    archive_attempts(sink, &raw.attempts);
    emit_best_effort(sink, RAW_RESPONSE_ARTIFACT, &raw.body);

    let plan = raw.parse()?;
    guard.check(&plan)?;

    let attempt = raw.attempts.last().map(|r| r.attempt).unwrap_or(1);
    emit_plan_accepted(plan.len(), attempt);
    Ok(plan)
}

fn archive_attempts(sink: &dyn ArtifactSink, attempts: &[AttemptRecord]) {
    for record in attempts {
        emit_best_effort(sink, &attempt_artifact_name(record.attempt), &record.to_marker());
    }
}
