//! The execution environment shared by every stage of a run, and its
//! one-time preparation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagehand_core::BuildContext;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ExecutorError;
use crate::process::wait_group_output;

/// Exported to every stage when a cache directory is configured.
pub const ENV_CACHE_DIR: &str = "STAGEHAND_CACHE_DIR";

/// Shell used when none is configured.
pub const DEFAULT_SHELL: &str = "sh";

/// Where and how stage commands run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionEnvironment {
    /// Working directory with the source checked out.
    pub work_dir: PathBuf,

    /// Dependency cache directory, created during preparation.
    pub cache_dir: Option<PathBuf>,

    /// Shell that interprets each command via `<shell> -c <command>`.
    pub shell: String,

    /// Extra environment variables for every stage.
    pub vars: BTreeMap<String, String>,

    /// Per-stage timeout in seconds. `None` leaves timing to the scheduler.
    pub stage_timeout_secs: Option<u64>,
}

impl ExecutionEnvironment {
    pub fn new(work_dir: impl AsRef<Path>) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            cache_dir: None,
            shell: DEFAULT_SHELL.to_string(),
            vars: BTreeMap::new(),
            stage_timeout_secs: None,
        }
    }

    pub fn with_cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cache_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Expose the build context to stage commands.
    pub fn with_context(mut self, ctx: &BuildContext) -> Self {
        self.vars.extend(ctx.exported_vars());
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }

    /// Variables injected into each stage process.
    pub fn stage_vars(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(cache) = &self.cache_dir {
            vars.push((ENV_CACHE_DIR.to_string(), cache.display().to_string()));
        }
        vars
    }

    /// A `<shell> -c <script>` command bound to this environment.
    ///
    /// On unix the shell leads a new process group, so everything it starts
    /// can be killed with it.
    pub fn shell_command(&self, script: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(script)
            .current_dir(&self.work_dir)
            .envs(self.stage_vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Check the working directory and create the cache directory.
    pub fn ensure_dirs(&self) -> Result<(), ExecutorError> {
        if !self.work_dir.is_dir() {
            return Err(ExecutorError::EnvironmentPrepFailed(format!(
                "working directory {} does not exist",
                self.work_dir.display()
            )));
        }
        if let Some(cache) = &self.cache_dir {
            std::fs::create_dir_all(cache)?;
            debug!(cache_dir = %cache.display(), "cache directory ready");
        }
        Ok(())
    }
}

/// One-time setup performed in the Preparing state, shared by all stages.
#[async_trait]
pub trait EnvironmentPreparer: Send + Sync {
    async fn prepare(&self, env: &ExecutionEnvironment) -> Result<(), ExecutorError>;

    fn describe(&self) -> String;
}

/// Does nothing beyond directory checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPreparer;

#[async_trait]
impl EnvironmentPreparer for NoopPreparer {
    async fn prepare(&self, _env: &ExecutionEnvironment) -> Result<(), ExecutorError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "noop".to_string()
    }
}

/// Runs one shell command (e.g. `npm ci`) in the working directory.
#[derive(Debug, Clone)]
pub struct CommandPreparer {
    command: String,
}

impl CommandPreparer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl EnvironmentPreparer for CommandPreparer {
    async fn prepare(&self, env: &ExecutionEnvironment) -> Result<(), ExecutorError> {
        info!(command = %self.command, "preparing environment");

        let child = env.shell_command(&self.command).spawn().map_err(|e| {
            ExecutorError::EnvironmentPrepFailed(format!(
                "failed to spawn `{}`: {e}",
                self.command
            ))
        })?;
        let output = wait_group_output(child).await.map_err(|e| {
            ExecutorError::EnvironmentPrepFailed(format!(
                "failed to wait for `{}`: {e}",
                self.command
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutorError::EnvironmentPrepFailed(format!(
                "`{}` exited with status {}: {}",
                self.command,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("command `{}`", self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_vars_include_context_and_cache() {
        let ctx = BuildContext::new("demo", "main", 7, "msg");
        let env = ExecutionEnvironment::new("/tmp")
            .with_context(&ctx)
            .with_cache_dir("/cache")
            .with_var("EXTRA", "1");
        let vars = env.stage_vars();

        assert!(vars.contains(&("STAGEHAND_BUILD_NUMBER".to_string(), "7".to_string())));
        assert!(vars.contains(&("EXTRA".to_string(), "1".to_string())));
        assert!(vars.contains(&(ENV_CACHE_DIR.to_string(), "/cache".to_string())));
    }

    #[test]
    fn test_ensure_dirs_creates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache/npm");
        let env = ExecutionEnvironment::new(dir.path()).with_cache_dir(&cache);

        env.ensure_dirs().unwrap();
        assert!(cache.is_dir());
    }

    #[test]
    fn test_ensure_dirs_rejects_missing_workdir() {
        let env = ExecutionEnvironment::new("/definitely/not/here");
        assert!(matches!(
            env.ensure_dirs(),
            Err(ExecutorError::EnvironmentPrepFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_command_preparer_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let env = ExecutionEnvironment::new(dir.path());

        CommandPreparer::new("touch prepared.marker")
            .prepare(&env)
            .await
            .unwrap();
        assert!(dir.path().join("prepared.marker").exists());
    }

    #[tokio::test]
    async fn test_command_preparer_failure() {
        let dir = tempfile::tempdir().unwrap();
        let env = ExecutionEnvironment::new(dir.path());

        let err = CommandPreparer::new("echo nope >&2; exit 3")
            .prepare(&env)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("status 3"), "{msg}");
        assert!(msg.contains("nope"), "{msg}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_preparer_kills_its_subprocesses() {
        let dir = tempfile::tempdir().unwrap();
        let env = ExecutionEnvironment::new(dir.path());
        let preparer = CommandPreparer::new("sh -c 'sleep 1; touch leaked.marker'; true");

        let prepared = tokio::time::timeout(Duration::from_millis(200), preparer.prepare(&env)).await;
        assert!(prepared.is_err());

        tokio::time::sleep(Duration::from_millis(1_800)).await;
        assert!(!dir.path().join("leaked.marker").exists());
    }
}
