//! Git helpers for filling in build context fields the scheduler did not supply.

use std::path::Path;
use std::process::Command;

use crate::domain::error::{CoreError, Result};

fn git_output(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| CoreError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CoreError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Current branch name (`git rev-parse --abbrev-ref HEAD`).
///
/// A detached HEAD reports `HEAD`.
pub fn capture_branch(repo_dir: &Path) -> Result<String> {
    let branch = git_output(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    if branch.is_empty() {
        return Err(CoreError::Git(
            "git rev-parse --abbrev-ref HEAD returned empty output".to_string(),
        ));
    }
    Ok(branch)
}

/// Full message of the last commit (`git log -1 --pretty=%B`).
pub fn capture_last_commit_message(repo_dir: &Path) -> Result<String> {
    git_output(repo_dir, &["log", "-1", "--pretty=%B"])
}
