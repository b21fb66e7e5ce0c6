//! Optional stage policy applied to shape-valid plans before they are locked.
//!
//! The policy only decides whether a command's text is admitted; it never
//! interprets what the command does. It is off by default. When an allowlist
//! is configured, commands are matched against named regex sets and anything
//! unmatched rejects the whole plan.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{CoreError, Plan, PlanError};

/// Command length cap applied when an allowlist is active and no explicit cap is set.
pub const DEFAULT_MAX_COMMAND_LEN: usize = 500;

const ALWAYS_ALLOWED: &str = r"^echo\b.*$";

/// Named groups of admitted command patterns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AllowlistSet {
    Base,
    Git,
    Linux,
    Build,
    Test,
    Python,
    Node,
    Java,
    K8s,
}

impl AllowlistSet {
    /// Every known set, in declaration order.
    pub const ALL: [AllowlistSet; 9] = [
        AllowlistSet::Base,
        AllowlistSet::Git,
        AllowlistSet::Linux,
        AllowlistSet::Build,
        AllowlistSet::Test,
        AllowlistSet::Python,
        AllowlistSet::Node,
        AllowlistSet::Java,
        AllowlistSet::K8s,
    ];

    /// Set name as used in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            AllowlistSet::Base => "base",
            AllowlistSet::Git => "git",
            AllowlistSet::Linux => "linux",
            AllowlistSet::Build => "build",
            AllowlistSet::Test => "test",
            AllowlistSet::Python => "python",
            AllowlistSet::Node => "node",
            AllowlistSet::Java => "java",
            AllowlistSet::K8s => "k8s",
        }
    }

    /// Anchored patterns admitted by this set.
    pub fn patterns(&self) -> &'static [&'static str] {
        match self {
            AllowlistSet::Base => &[
                r"^echo\b.*$",
                r"^true$",
                r"^false$",
                r"^pwd$",
                r"^printenv$",
                r"^env$",
                r"^ls(\s+-[a-zA-Z]+)*(\s+[\w./*-]+)*$",
                r"^cat\s+[\w./*-]+$",
                r"^tee\s+[\w./*-]+$",
            ],
            AllowlistSet::Git => &[r"^git\s+(status|fetch|pull|submodule|rev-parse|log)\b.*$"],
            AllowlistSet::Linux => &[
                r"^chmod\s+[-+rwxs0-7]+\s+[\w./*-]+$",
                r"^chown\s+[\w:-]+\s+[\w./*-]+$",
                r"^mv\s+[\w./*-]+\s+[\w./*-]+$",
                r"^cp\s+(-r\s+)?[\w./*-]+\s+[\w./*-]+$",
                r"^rm\s+(-rf|-f|-r)\s+[\w./*-]+$",
                r"^mkdir\s+(-p\s+)?[\w./*-]+$",
                r"^du\s+.*$",
                r"^df\s+.*$",
            ],
            AllowlistSet::Build => &[
                r"^make(\s+[\w=-]+)*$",
                r"^cmake\s+.*$",
                r"^mvn\s+.*$",
                r"^gradle\s+.*$",
                r"^gradlew\s+.*$",
            ],
            AllowlistSet::Test => &[
                r"^pytest(\s+.*)?$",
                r"^nose(\s+.*)?$",
                r"^pytest-xdist(\s+.*)?$",
                r"^go\s+test(\s+.*)?$",
                r"^npm\s+test(\s+.*)?$",
                r"^yarn\s+test(\s+.*)?$",
            ],
            AllowlistSet::Python => &[
                r"^python(\d+(\.\d+)?)?\s+[-\w./]+(\s+.*)?$",
                r"^pip(\d+)?\s+install\s+.*$",
                r"^ruff\s+.*$",
                r"^flake8\s+.*$",
                r"^black\s+.*$",
                r"^pytest(\s+.*)?$",
            ],
            AllowlistSet::Node => &[
                r"^npm\s+(ci|i|install)\b.*$",
                r"^npm\s+run\s+[\w:-]+(\s+.*)?$",
                r"^yarn(\s+.*)?$",
                r"^pnpm(\s+.*)?$",
            ],
            AllowlistSet::Java => &[
                r"^mvn\s+.*$",
                r"^gradle\s+.*$",
                r"^gradlew\s+.*$",
                r"^java\s+.*$",
                r"^javac\s+.*$",
            ],
            AllowlistSet::K8s => &[
                r"^kubectl\s+apply\s+-f\s+[\w./*-]+$",
                r"^kubectl\s+rollout\s+status\s+.*$",
                r"^kubectl\s+get\s+.*$",
            ],
        }
    }
}

impl fmt::Display for AllowlistSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AllowlistSet {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        AllowlistSet::ALL
            .into_iter()
            .find(|set| set.name() == wanted)
            .ok_or_else(|| CoreError::InvalidConfig(format!("unknown allowlist set: {s}")))
    }
}

/// Declarative stage policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagePolicy {
    /// Reject plans with more stages than this.
    pub max_stages: Option<usize>,

    /// Reject plans containing a longer command.
    pub max_command_len: Option<usize>,

    /// Allowlist sets; empty means every command text is admitted.
    pub allowlist: Vec<AllowlistSet>,
}

impl StagePolicy {
    /// A policy that admits everything.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Whether any rule is configured.
    pub fn is_active(&self) -> bool {
        self.max_stages.is_some() || self.max_command_len.is_some() || !self.allowlist.is_empty()
    }

    /// Parse a comma-separated list of set names (`"base,node"`).
    pub fn parse_allowlist(list: &str) -> crate::domain::Result<Vec<AllowlistSet>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(AllowlistSet::from_str)
            .collect()
    }
}

/// A compiled [`StagePolicy`], ready to check plans.
#[derive(Debug, Clone)]
pub struct StageGuard {
    max_stages: Option<usize>,
    max_command_len: Option<usize>,
    patterns: Vec<Regex>,
}

impl StageGuard {
    /// Compile the policy's allowlist patterns.
    pub fn new(policy: &StagePolicy) -> crate::domain::Result<Self> {
        let mut sources: Vec<&str> = Vec::new();
        for set in &policy.allowlist {
            sources.extend(set.patterns().iter().copied());
        }
        if !sources.is_empty() && !sources.contains(&ALWAYS_ALLOWED) {
            sources.push(ALWAYS_ALLOWED);
        }

        let patterns = sources
            .into_iter()
            .map(|src| {
                Regex::new(src)
                    .map_err(|e| CoreError::InvalidConfig(format!("bad pattern {src}: {e}")))
            })
            .collect::<crate::domain::Result<Vec<_>>>()?;

        let max_command_len = match policy.max_command_len {
            Some(len) => Some(len),
            None if !patterns.is_empty() => Some(DEFAULT_MAX_COMMAND_LEN),
            None => None,
        };

        Ok(Self {
            max_stages: policy.max_stages,
            max_command_len,
            patterns,
        })
    }

    /// Check a single command's text.
    pub fn is_allowed(&self, command: &str) -> bool {
        let cmd = command.trim();
        if let Some(max) = self.max_command_len {
            if cmd.len() > max {
                return false;
            }
        }
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.is_match(cmd))
    }

    /// Check a whole plan. The first offending stage rejects it.
    pub fn check(&self, plan: &Plan) -> Result<(), PlanError> {
        if let Some(max) = self.max_stages {
            if plan.len() > max {
                return Err(PlanError::PolicyViolation {
                    index: max,
                    reason: format!("plan has {} stages, limit is {max}", plan.len()),
                });
            }
        }

        for (index, stage) in plan.stages.iter().enumerate() {
            if !self.is_allowed(&stage.command) {
                return Err(PlanError::PolicyViolation {
                    index,
                    reason: format!("command for stage '{}' is not admitted", stage.name),
                });
            }
        }
        Ok(())
    }
}
