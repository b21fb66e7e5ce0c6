//! Planner gateway configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Default planner base URL when `AI_PLANNER_URL` is not set.
pub const DEFAULT_PLANNER_URL: &str = "http://localhost:8000";

/// Liveness endpoint.
pub const HEALTH_PATH: &str = "/healthz";

/// Plan request endpoint.
pub const PLAN_PATH: &str = "/plan";

/// Configuration for talking to the remote planner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Planner base URL, e.g. `http://planner:8000`.
    pub base_url: String,

    /// Probe `/healthz` before requesting a plan.
    pub health_check: bool,

    /// Delay before each attempt (milliseconds). One entry per attempt;
    /// must be non-empty and non-decreasing.
    pub retry_delays_ms: Vec<u64>,

    /// TCP connect timeout per request (milliseconds).
    pub connect_timeout_ms: u64,

    /// Total time per plan request, generation included (milliseconds).
    pub request_timeout_ms: u64,

    /// Total time for the health probe (milliseconds).
    pub health_timeout_ms: u64,

    /// Optional budget for the whole acquisition, probe and retries included.
    pub budget_ms: Option<u64>,

    /// Bytes of each response body kept for diagnostics.
    pub body_sample_bytes: usize,

    /// Largest response body read per attempt. Longer bodies are rejected
    /// as malformed without being parsed.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Default per-attempt response body cap (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PLANNER_URL.to_string(),
            health_check: true,
            retry_delays_ms: vec![0, 2_000, 4_000],
            connect_timeout_ms: 5_000,
            request_timeout_ms: 120_000,
            health_timeout_ms: 5_000,
            budget_ms: None,
            body_sample_bytes: 2_048,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl GatewayConfig {
    /// Config for a specific planner URL with default timings.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    /// Disable the pre-flight health probe.
    pub fn without_health_check(mut self) -> Self {
        self.health_check = false;
        self
    }

    /// Replace the retry schedule.
    pub fn with_retry_delays(mut self, delays: &[Duration]) -> Self {
        self.retry_delays_ms = delays.iter().copied().map(millis).collect();
        self
    }

    /// Set connect and request timeouts.
    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout_ms = millis(connect);
        self.request_timeout_ms = millis(request);
        self
    }

    /// Set the health probe timeout.
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout_ms = millis(timeout);
        self
    }

    /// Set the per-attempt response body cap.
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Set the overall acquisition budget.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget_ms = Some(millis(budget));
        self
    }

    /// Number of plan request attempts.
    pub fn attempts(&self) -> usize {
        self.retry_delays_ms.len()
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget_ms.map(Duration::from_millis)
    }

    /// Absolute URL for an endpoint path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Reject configurations that cannot behave as intended.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(GatewayError::InvalidConfig(
                "planner base URL is empty".to_string(),
            ));
        }
        if self.retry_delays_ms.is_empty() {
            return Err(GatewayError::InvalidConfig(
                "retry schedule must contain at least one attempt".to_string(),
            ));
        }
        if self.retry_delays_ms.windows(2).any(|w| w[1] < w[0]) {
            return Err(GatewayError::InvalidConfig(format!(
                "retry delays must be non-decreasing, got {:?}",
                self.retry_delays_ms
            )));
        }
        if self.connect_timeout_ms == 0 || self.connect_timeout_ms >= self.request_timeout_ms {
            return Err(GatewayError::InvalidConfig(format!(
                "connect timeout ({}ms) must be non-zero and smaller than request timeout ({}ms)",
                self.connect_timeout_ms, self.request_timeout_ms
            )));
        }
        if self.health_timeout_ms == 0 {
            return Err(GatewayError::InvalidConfig(
                "health timeout must be non-zero".to_string(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(GatewayError::InvalidConfig(
                "response body cap must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
