//! Build context: the per-run facts handed to the planner.

use serde::{Deserialize, Serialize};

/// Environment variable names under which the context is exported to stages.
pub const ENV_BRANCH: &str = "STAGEHAND_BRANCH";
pub const ENV_COMMIT_MESSAGE: &str = "STAGEHAND_COMMIT_MESSAGE";
pub const ENV_BUILD_NUMBER: &str = "STAGEHAND_BUILD_NUMBER";
pub const ENV_REPOSITORY: &str = "STAGEHAND_REPOSITORY";

/// Immutable description of the build being planned.
///
/// Serialized as-is to form the body of `POST /plan`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildContext {
    /// Branch being built.
    pub branch: String,

    /// Message of the last commit on the branch.
    pub last_commit_message: String,

    /// Monotonic build number assigned by the scheduler.
    pub build_number: u64,

    /// Repository (job) name.
    pub repository_name: String,
}

impl BuildContext {
    /// Create a new build context.
    pub fn new(
        repository_name: impl Into<String>,
        branch: impl Into<String>,
        build_number: u64,
        last_commit_message: impl Into<String>,
    ) -> Self {
        Self {
            branch: branch.into(),
            last_commit_message: last_commit_message.into(),
            build_number,
            repository_name: repository_name.into(),
        }
    }

    /// The request body sent to the planner.
    pub fn to_request_body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Context fields as environment variables for stage commands.
    pub fn exported_vars(&self) -> Vec<(String, String)> {
        vec![
            (ENV_BRANCH.to_string(), self.branch.clone()),
            (
                ENV_COMMIT_MESSAGE.to_string(),
                self.last_commit_message.clone(),
            ),
            (ENV_BUILD_NUMBER.to_string(), self.build_number.to_string()),
            (ENV_REPOSITORY.to_string(), self.repository_name.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_field_names() {
        let ctx = BuildContext::new("demo", "main", 7, "fix: flaky test");
        let body: serde_json::Value =
            serde_json::from_slice(&ctx.to_request_body().unwrap()).unwrap();

        assert_eq!(body["branch"], "main");
        assert_eq!(body["last_commit_message"], "fix: flaky test");
        assert_eq!(body["build_number"], 7);
        assert_eq!(body["repository_name"], "demo");
    }

    #[test]
    fn test_exported_vars() {
        let ctx = BuildContext::new("demo", "main", 7, "msg");
        let vars = ctx.exported_vars();
        assert_eq!(vars.len(), 4);
        assert!(vars.contains(&(ENV_BUILD_NUMBER.to_string(), "7".to_string())));
        assert!(vars.contains(&(ENV_REPOSITORY.to_string(), "demo".to_string())));
    }
}
