//! Plan parser: turns a raw planner response body into a validated [`Plan`].
//!
//! The planner is a best-effort generative service, so its body is handled in
//! two tiers:
//!
//! 1. **Fast path** — the whole body is parsed as one JSON document.
//! 2. **Recovery path** — only when the body is not valid JSON: the last
//!    balanced `{ ... }` span is located with [`find_last_balanced_object`]
//!    and parsed on its own. This recovers plans wrapped in prose, markdown
//!    fences or trailing commentary.
//!
//! Whichever tier produced the document, it must still have the plan shape:
//! an object with a `stages` array whose elements all carry non-empty string
//! `name` and `command` fields. One bad stage rejects the whole plan.

use std::ops::Range;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::domain::{Plan, PlanError, Stage};

/// Field holding the ordered stage list.
pub const STAGES_FIELD: &str = "stages";

/// Result of scanning free-form bytes for a trailing JSON object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Byte range of the balanced object, braces included.
    Found(Range<usize>),
    NotFound,
}

impl Extraction {
    /// Borrow the extracted span out of the scanned bytes.
    pub fn slice<'a>(&self, bytes: &'a [u8]) -> Option<&'a [u8]> {
        match self {
            Extraction::Found(range) => bytes.get(range.clone()),
            Extraction::NotFound => None,
        }
    }
}

/// Locate the last balanced object literal in `bytes`.
///
/// The result is the span closed by the last `}` that has a matching `{`,
/// which is the first candidate a backward walk from the end of the text
/// would balance. Earlier objects (preamble, examples in prose) are never
/// preferred over a later one, and stray closing braces after the object are
/// skipped.
///
/// Pairs are found in one forward pass with a stack of open positions, so
/// the scan is linear in the body size. Braces are counted as raw bytes;
/// string literals are not special-cased.
pub fn find_last_balanced_object(bytes: &[u8]) -> Extraction {
    let mut open_positions = Vec::new();
    let mut last_pair = None;

    for (pos, byte) in bytes.iter().enumerate() {
        match byte {
            b'{' => open_positions.push(pos),
            b'}' => {
                if let Some(open) = open_positions.pop() {
                    last_pair = Some(open..pos + 1);
                }
            }
            _ => {}
        }
    }

    match last_pair {
        Some(range) => Extraction::Found(range),
        None => Extraction::NotFound,
    }
}

/// Parse a planner response body into a validated plan.
pub fn parse_plan(body: &[u8]) -> Result<Plan, PlanError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(doc) => {
            debug!(bytes = body.len(), "planner response parsed on fast path");
            return plan_from_document(&doc);
        }
        Err(err) => {
            debug!(error = %err, "fast path failed, scanning for trailing object");
        }
    }

    let extraction = find_last_balanced_object(body);
    let Some(span) = extraction.slice(body) else {
        return Err(PlanError::NoValidPlan);
    };

    let doc: Value = serde_json::from_slice(span).map_err(|err| {
        debug!(error = %err, "extracted span is not valid JSON");
        PlanError::NoValidPlan
    })?;
    debug!(bytes = span.len(), "planner response recovered from surrounding text");

    plan_from_document(&doc)
}

/// Cheap well-formedness check used by the gateway to accept an attempt.
///
/// True when either parser tier yields a JSON document. The plan shape is
/// not checked here.
pub fn is_well_formed(body: &[u8]) -> bool {
    if serde_json::from_slice::<serde::de::IgnoredAny>(body).is_ok() {
        return true;
    }
    find_last_balanced_object(body)
        .slice(body)
        .map(|span| serde_json::from_slice::<serde::de::IgnoredAny>(span).is_ok())
        .unwrap_or(false)
}

/// Check the plan shape of an already-parsed document.
pub fn plan_from_document(doc: &Value) -> Result<Plan, PlanError> {
    let obj = doc.as_object().ok_or_else(|| {
        PlanError::InvalidShape(format!("expected a JSON object, found {}", kind_of(doc)))
    })?;

    let stages = obj
        .get(STAGES_FIELD)
        .ok_or_else(|| PlanError::InvalidShape(format!("missing `{STAGES_FIELD}` field")))?;

    let items = stages.as_array().ok_or_else(|| {
        PlanError::InvalidShape(format!(
            "`{STAGES_FIELD}` must be an array, found {}",
            kind_of(stages)
        ))
    })?;

    let mut parsed = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let stage = item.as_object().ok_or_else(|| {
            PlanError::InvalidShape(format!(
                "stage {index} must be an object, found {}",
                kind_of(item)
            ))
        })?;
        parsed.push(Stage {
            name: string_field(stage, index, "name")?,
            command: string_field(stage, index, "command")?,
        });
    }

    if let Some(reason) = planner_fallback_reason(obj) {
        warn!(reason = %reason, "planner answered with its own fallback plan");
    }
    if parsed.is_empty() {
        warn!("planner returned a plan with no stages");
    }

    let plan = Plan::new(parsed);
    plan.validate()?;
    Ok(plan)
}

fn string_field(stage: &Map<String, Value>, index: usize, field: &str) -> Result<String, PlanError> {
    match stage.get(field) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(PlanError::InvalidShape(format!(
            "stage {index} `{field}` must be a string, found {}",
            kind_of(other)
        ))),
        None => Err(PlanError::InvalidShape(format!(
            "stage {index} is missing `{field}`"
        ))),
    }
}

/// `meta.fallback == true` marks a planner that degraded on its side.
fn planner_fallback_reason(obj: &Map<String, Value>) -> Option<String> {
    let meta = obj.get("meta")?.as_object()?;
    if meta.get("fallback").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    Some(
        meta.get("reason")
            .and_then(Value::as_str)
            .unwrap_or("unspecified")
            .to_string(),
    )
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
