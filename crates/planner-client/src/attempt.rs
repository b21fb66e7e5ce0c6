//! Per-attempt diagnostics and the raw planner response.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stagehand_core::{parse_plan, Plan, PlanError};

/// How a single plan request attempt ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// 200 with a well-formed body.
    Accepted,
    /// Any status other than 200.
    BadStatus,
    /// 200 whose body holds no JSON document.
    Malformed,
    /// Connection refused or unreachable (planner absent).
    Connect,
    /// Request or body read exceeded the request timeout (planner slow).
    Timeout,
    /// Any other transport failure.
    Transport,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Accepted => "accepted",
            AttemptOutcome::BadStatus => "bad_status",
            AttemptOutcome::Malformed => "malformed",
            AttemptOutcome::Connect => "connect",
            AttemptOutcome::Timeout => "timeout",
            AttemptOutcome::Transport => "transport",
        }
    }

    /// Classify a transport-level error.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_connect() {
            AttemptOutcome::Connect
        } else if err.is_timeout() {
            AttemptOutcome::Timeout
        } else {
            AttemptOutcome::Transport
        }
    }
}

/// What one attempt observed. Kept for archival, never for control flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// HTTP status, if a response arrived.
    pub status: Option<u16>,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
    /// Bounded prefix of the body, or the transport error text.
    pub body_sample: String,
}

impl AttemptRecord {
    /// Status marker blob for the artifact archiver.
    pub fn to_marker(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(self).unwrap_or_else(|_| {
            format!("attempt={} outcome={}", self.attempt, self.outcome.as_str()).into_bytes()
        })
    }
}

/// Lossy UTF-8 prefix of at most `max` bytes of `body`.
pub fn body_sample(body: &[u8], max: usize) -> String {
    let end = body.len().min(max);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// An accepted planner response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status of the accepted attempt.
    pub status: u16,
    /// Full response body.
    pub body: Vec<u8>,
    /// Time from the start of acquisition until the body was read.
    pub elapsed: Duration,
    /// Every attempt made, the accepted one last.
    pub attempts: Vec<AttemptRecord>,
}

impl RawResponse {
    /// Run the plan parser over the body.
    pub fn parse(&self) -> Result<Plan, PlanError> {
        parse_plan(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_sample_truncates() {
        assert_eq!(body_sample(b"abcdef", 3), "abc");
        assert_eq!(body_sample(b"abc", 10), "abc");
        assert_eq!(body_sample(b"", 10), "");
    }

    #[test]
    fn test_body_sample_survives_split_utf8() {
        let text = "héllo".as_bytes();
        // Cut in the middle of the two-byte 'é'.
        let sample = body_sample(text, 2);
        assert!(sample.starts_with('h'));
    }

    #[test]
    fn test_marker_is_json() {
        let record = AttemptRecord {
            attempt: 2,
            status: Some(503),
            outcome: AttemptOutcome::BadStatus,
            elapsed_ms: 12,
            body_sample: "busy".to_string(),
        };
        let value: serde_json::Value = serde_json::from_slice(&record.to_marker()).unwrap();
        assert_eq!(value["attempt"], 2);
        assert_eq!(value["status"], 503);
        assert_eq!(value["outcome"], "bad_status");
    }

    #[test]
    fn test_raw_response_parse() {
        let raw = RawResponse {
            status: 200,
            body: br#"{"stages":[{"name":"Build","command":"make"}]}"#.to_vec(),
            elapsed: Duration::from_millis(5),
            attempts: Vec::new(),
        };
        assert_eq!(raw.parse().unwrap().stage_names(), vec!["Build"]);
    }
}
