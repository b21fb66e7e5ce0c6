//! Diagnostic artifact emission.
//!
//! The core hands named byte blobs (context, raw planner responses, attempt
//! markers, the locked plan, the execution report) to an [`ArtifactSink`].
//! Retention is the archiver's business; emission failures are logged and
//! never change a run's outcome.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::domain::{CoreError, Result};

pub const CONTEXT_ARTIFACT: &str = "context.json";
pub const RAW_RESPONSE_ARTIFACT: &str = "planner-response.raw";
pub const LOCKED_PLAN_ARTIFACT: &str = "plan.locked.json";
pub const EXECUTION_REPORT_ARTIFACT: &str = "execution-report.json";

/// Name of the per-attempt status marker for 1-based `attempt`.
pub fn attempt_artifact_name(attempt: u32) -> String {
    format!("planner-attempt-{attempt}.status")
}

/// Destination for named diagnostic blobs.
pub trait ArtifactSink: Send + Sync {
    /// Store `data` under `name`, replacing any previous blob of that name.
    fn emit(&self, name: &str, data: &[u8]) -> Result<()>;
}

/// Emit and log on failure instead of propagating.
pub fn emit_best_effort(sink: &dyn ArtifactSink, name: &str, data: &[u8]) {
    if let Err(err) = sink.emit(name, data) {
        warn!(artifact = %name, error = %err, "failed to emit artifact");
    }
}

/// Writes each artifact to `<dir>/<name>`.
#[derive(Debug, Clone)]
pub struct DirArtifactSink {
    dir: PathBuf,
}

impl DirArtifactSink {
    /// Create a sink rooted at `dir`. Creates the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactSink for DirArtifactSink {
    fn emit(&self, name: &str, data: &[u8]) -> Result<()> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(CoreError::InvalidConfig(format!(
                "invalid artifact name: {name:?}"
            )));
        }
        fs::write(self.dir.join(name), data)?;
        Ok(())
    }
}

/// In-memory sink (tests and dry runs).
#[derive(Debug, Default)]
pub struct MemoryArtifactSink {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the blob stored under `name`.
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .ok()
            .and_then(|blobs| blobs.get(name).cloned())
    }

    /// Sorted artifact names.
    pub fn names(&self) -> Vec<String> {
        self.blobs
            .lock()
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl ArtifactSink for MemoryArtifactSink {
    fn emit(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| CoreError::InvalidConfig("artifact store poisoned".to_string()))?;
        blobs.insert(name.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_sink_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirArtifactSink::new(dir.path().join("artifacts")).unwrap();

        sink.emit(CONTEXT_ARTIFACT, b"{}").unwrap();
        sink.emit(&attempt_artifact_name(2), b"status=200").unwrap();

        let written = std::fs::read(sink.dir().join("planner-attempt-2.status")).unwrap();
        assert_eq!(written, b"status=200");
        assert!(sink.dir().join(CONTEXT_ARTIFACT).exists());
    }

    #[test]
    fn dir_sink_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirArtifactSink::new(dir.path()).unwrap();
        assert!(sink.emit("../escape", b"x").is_err());
        assert!(sink.emit("", b"x").is_err());
    }

    #[test]
    fn memory_sink_overwrites_by_name() {
        let sink = MemoryArtifactSink::new();
        sink.emit("a", b"1").unwrap();
        sink.emit("a", b"2").unwrap();
        sink.emit("b", b"3").unwrap();

        assert_eq!(sink.get("a"), Some(b"2".to_vec()));
        assert_eq!(sink.names(), vec!["a".to_string(), "b".to_string()]);
    }
}
