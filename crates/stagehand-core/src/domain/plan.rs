//! Plan and stage records.

use serde::{Deserialize, Serialize};

use super::error::PlanError;

/// One named unit of work: a single shell-interpretable command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Stage {
    /// Human-readable stage name (non-empty).
    pub name: String,

    /// Command forwarded verbatim to the shell (non-empty).
    pub command: String,
}

impl Stage {
    /// Create a new stage.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }
}

/// The ordered list of stages accepted for one run.
///
/// Order defines execution order and carries no other meaning.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    pub stages: Vec<Stage>,
}

impl Plan {
    /// Create a plan from stages, keeping their order.
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the plan has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Ordered stage names.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Validate the structural invariant on an already-typed plan.
    ///
    /// Every stage must carry a non-empty name and command. A single bad
    /// stage rejects the whole plan.
    pub fn validate(&self) -> Result<(), PlanError> {
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(PlanError::InvalidShape(format!(
                    "stage {index} has an empty `name`"
                )));
            }
            if stage.command.trim().is_empty() {
                return Err(PlanError::InvalidShape(format!(
                    "stage {index} ({}) has an empty `command`",
                    stage.name
                )));
            }
        }
        Ok(())
    }

    /// Canonical serialized form, used for locking and digests.
    pub fn canonical_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
