//! Planner gateway: health probe plus a bounded, fixed-delay retry schedule.
//!
//! An attempt succeeds only on status 200 with a body that passes the
//! parser's cheap well-formedness check. An error page served with 200 or a
//! truncated stream is retried like any other failure.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use stagehand_core::obs::emit_plan_requested;
use stagehand_core::{is_well_formed, BuildContext};
use tracing::{debug, info, warn};

use crate::attempt::{body_sample, AttemptOutcome, AttemptRecord, RawResponse};
use crate::config::{GatewayConfig, HEALTH_PATH, PLAN_PATH};
use crate::error::{GatewayError, Result};

/// Anything that can answer a plan request for a build context.
#[async_trait]
pub trait PlanSource: Send + Sync {
    /// Request a plan; returns the raw accepted response.
    async fn request_plan(&self, ctx: &BuildContext) -> Result<RawResponse>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// HTTP client for the remote planner.
pub struct PlannerGateway {
    config: GatewayConfig,
    client: Client,
}

impl PlannerGateway {
    /// Create a gateway. Validates the configuration before building the client.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .user_agent(concat!("stagehand/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Probe `/healthz`. Anything but 200 within the health timeout fails.
    pub async fn check_health(&self) -> Result<()> {
        let url = self.config.url(HEALTH_PATH);
        debug!(url = %url, "probing planner health");

        let response = self
            .client
            .get(&url)
            .timeout(self.config.health_timeout())
            .send()
            .await
            .map_err(|e| {
                let failure = AttemptOutcome::from_transport(&e);
                warn!(url = %url, failure = failure.as_str(), error = %e, "planner health probe failed");
                GatewayError::HealthCheckFailed {
                    status: None,
                    reason: format!("{}: {e}", failure.as_str()),
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(url = %url, status = status.as_u16(), "planner reported unhealthy");
            return Err(GatewayError::HealthCheckFailed {
                status: Some(status.as_u16()),
                reason: format!("unexpected status {status}"),
            });
        }

        debug!(url = %url, "planner healthy");
        Ok(())
    }

    async fn acquire(
        &self,
        body: &[u8],
        started: Instant,
        log: &mut Vec<AttemptRecord>,
    ) -> Result<RawResponse> {
        if self.config.health_check {
            self.check_health().await?;
        }

        let url = self.config.url(PLAN_PATH);
        emit_plan_requested(&url, self.config.attempts());

        for (index, delay) in self.config.retry_delays().into_iter().enumerate() {
            let attempt = index as u32 + 1;
            if !delay.is_zero() {
                debug!(attempt = attempt, delay_ms = delay.as_millis() as u64, "waiting before retry");
                tokio::time::sleep(delay).await;
            }

            let (record, accepted) = self.attempt(&url, attempt, body).await;
            log.push(record);

            if let Some((status, bytes)) = accepted {
                return Ok(RawResponse {
                    status,
                    body: bytes,
                    elapsed: started.elapsed(),
                    attempts: log.clone(),
                });
            }
        }

        let last = log.last();
        Err(GatewayError::Unavailable {
            attempts: log.len() as u32,
            last_status: last.and_then(|r| r.status),
            last_body_sample: last.map(|r| r.body_sample.clone()).unwrap_or_default(),
            attempt_log: log.clone(),
        })
    }

    /// One POST. Returns the record and, when accepted, the status and body.
    async fn attempt(
        &self,
        url: &str,
        attempt: u32,
        body: &[u8],
    ) -> (AttemptRecord, Option<(u16, Vec<u8>)>) {
        let started = Instant::now();
        let sample_len = self.config.body_sample_bytes;

        let result = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                return (
                    transport_failure(attempt, None, &err, started.elapsed()),
                    None,
                )
            }
        };

        let status = response.status().as_u16();
        let (bytes, truncated) = match read_capped(response, self.config.max_body_bytes).await {
            Ok(read) => read,
            Err(err) => {
                return (
                    transport_failure(attempt, Some(status), &err, started.elapsed()),
                    None,
                )
            }
        };

        let outcome = if status != StatusCode::OK.as_u16() {
            AttemptOutcome::BadStatus
        } else if truncated {
            warn!(
                attempt = attempt,
                max_body_bytes = self.config.max_body_bytes,
                "planner response exceeds body cap"
            );
            AttemptOutcome::Malformed
        } else if !is_well_formed(&bytes) {
            AttemptOutcome::Malformed
        } else {
            AttemptOutcome::Accepted
        };

        let record = AttemptRecord {
            attempt,
            status: Some(status),
            outcome,
            elapsed_ms: started.elapsed().as_millis() as u64,
            body_sample: body_sample(&bytes, sample_len),
        };

        if outcome == AttemptOutcome::Accepted {
            info!(
                event = "plan.attempt",
                attempt = attempt,
                status = status,
                outcome = outcome.as_str(),
                elapsed_ms = record.elapsed_ms,
            );
            (record, Some((status, bytes)))
        } else {
            warn!(
                event = "plan.attempt",
                attempt = attempt,
                status = status,
                outcome = outcome.as_str(),
                elapsed_ms = record.elapsed_ms,
                "planner attempt rejected"
            );
            (record, None)
        }
    }
}

/// Read at most `max` bytes of the body. The flag is set when the planner
/// sent (or announced) more than that; the rest of the stream is dropped.
async fn read_capped(
    mut response: reqwest::Response,
    max: usize,
) -> std::result::Result<(Vec<u8>, bool), reqwest::Error> {
    if response
        .content_length()
        .is_some_and(|len| len > max as u64)
    {
        return Ok((Vec::new(), true));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = max - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

fn transport_failure(
    attempt: u32,
    status: Option<u16>,
    err: &reqwest::Error,
    elapsed: Duration,
) -> AttemptRecord {
    let outcome = AttemptOutcome::from_transport(err);
    match outcome {
        AttemptOutcome::Connect => {
            warn!(event = "plan.attempt", attempt = attempt, failure = "connect", error = %err, "planner refused or unreachable")
        }
        AttemptOutcome::Timeout => {
            warn!(event = "plan.attempt", attempt = attempt, failure = "timeout", error = %err, "planner did not answer in time")
        }
        _ => {
            warn!(event = "plan.attempt", attempt = attempt, failure = "transport", error = %err, "planner request failed")
        }
    }
    AttemptRecord {
        attempt,
        status,
        outcome,
        elapsed_ms: elapsed.as_millis() as u64,
        body_sample: err.to_string(),
    }
}

#[async_trait]
impl PlanSource for PlannerGateway {
    async fn request_plan(&self, ctx: &BuildContext) -> Result<RawResponse> {
        let body = ctx
            .to_request_body()
            .map_err(|e| GatewayError::Client(format!("failed to encode build context: {e}")))?;

        let started = Instant::now();
        let mut log = Vec::new();

        match self.config.budget() {
            Some(budget) => {
                let bounded =
                    tokio::time::timeout(budget, self.acquire(&body, started, &mut log)).await;
                match bounded {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(budget_ms = budget.as_millis() as u64, "planner acquisition budget exhausted");
                        Err(GatewayError::BudgetExceeded {
                            budget_ms: budget.as_millis() as u64,
                            attempt_log: log,
                        })
                    }
                }
            }
            None => self.acquire(&body, started, &mut log).await,
        }
    }

    fn describe(&self) -> String {
        format!("planner at {}", self.config.base_url)
    }
}
