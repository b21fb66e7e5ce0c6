//! Process-group supervision for stage and preparation commands.
//!
//! Every shell command is spawned as the leader of its own process group
//! (see [`ExecutionEnvironment::shell_command`]). Abandoning a wait, through
//! cancellation or a timeout, kills the whole group so that background jobs
//! and grandchildren the script started do not outlive it.
//!
//! [`ExecutionEnvironment::shell_command`]: crate::environment::ExecutionEnvironment::shell_command

use std::io;
use std::process::Output;

use tokio::process::Child;
use tracing::debug;

/// Kills a process group when dropped, unless disarmed first.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            debug!(pgid = pgid, "killing abandoned process group");
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg takes plain integers and has no memory-safety
    // preconditions. ESRCH (group already gone) is ignored.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Wait for `child` and collect its output.
///
/// If the returned future is dropped before completion, the child's whole
/// process group is killed.
pub(crate) async fn wait_group_output(child: Child) -> io::Result<Output> {
    let guard = GroupGuard::new(&child);
    let output = child.wait_with_output().await;
    guard.disarm();
    output
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::environment::ExecutionEnvironment;

    #[tokio::test]
    async fn test_completed_wait_returns_output() {
        let dir = tempfile::tempdir().unwrap();
        let env = ExecutionEnvironment::new(dir.path());
        let child = env.shell_command("echo grouped").spawn().unwrap();

        let output = wait_group_output(child).await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "grouped");
    }

    #[tokio::test]
    async fn test_abandoned_wait_kills_background_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let env = ExecutionEnvironment::new(dir.path());
        let child = env
            .shell_command("(sleep 1; touch leaked.marker) & wait")
            .spawn()
            .unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(200), wait_group_output(child)).await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_millis(1_800)).await;
        assert!(!dir.path().join("leaked.marker").exists());
    }
}
