//! Planner Client
//!
//! HTTP gateway to the remote build planner. Probes `/healthz`, posts the
//! build context to `/plan` on a fixed retry schedule, and returns the first
//! well-formed 200 response together with a log of every attempt.

pub mod attempt;
pub mod config;
pub mod error;
pub mod gateway;

pub use attempt::{body_sample, AttemptOutcome, AttemptRecord, RawResponse};
pub use config::{
    GatewayConfig, DEFAULT_MAX_BODY_BYTES, DEFAULT_PLANNER_URL, HEALTH_PATH, PLAN_PATH,
};
pub use error::{GatewayError, Result};
pub use gateway::{PlanSource, PlannerGateway};
