//! Plan lock: freezes the accepted plan to disk so execution never re-derives it.
//!
//! A locked plan is written once to `<run_dir>/plan.lock.json` together with a
//! SHA-256 digest of the canonical plan JSON. Reading it back recomputes the
//! digest and fails on any mismatch, so a tampered or truncated lock is never
//! executed. Locking refuses to overwrite an existing lock.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::info;
use uuid::Uuid;

use crate::domain::{CoreError, Plan, Result};

/// File name of the lock inside a run directory.
pub const LOCK_FILE_NAME: &str = "plan.lock.json";

/// Current lock file format version.
pub const LOCK_VERSION: u32 = 1;

/// Where the locked plan came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanOrigin {
    /// Accepted from the remote planner.
    Remote,
    /// Substituted by the fallback policy.
    Fallback { reason: String },
}

impl PlanOrigin {
    pub fn is_fallback(&self) -> bool {
        matches!(self, PlanOrigin::Fallback { .. })
    }
}

/// A frozen plan. Fields are read-only once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedPlan {
    version: u32,
    lock_id: Uuid,
    origin: PlanOrigin,
    locked_at: DateTime<Utc>,
    digest: String,
    plan: Plan,
}

impl LockedPlan {
    fn new(plan: Plan, origin: PlanOrigin) -> Result<Self> {
        plan.validate()?;
        let digest = plan_digest(&plan)?;
        Ok(Self {
            version: LOCK_VERSION,
            lock_id: Uuid::new_v4(),
            origin,
            locked_at: Utc::now(),
            digest,
            plan,
        })
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn origin(&self) -> &PlanOrigin {
        &self.origin
    }

    /// SHA-256 hex of the canonical plan JSON.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn lock_id(&self) -> Uuid {
        self.lock_id
    }

    pub fn locked_at(&self) -> DateTime<Utc> {
        self.locked_at
    }

    /// Canonical serialized lock document.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn into_plan(self) -> Plan {
        self.plan
    }
}

/// Reference to a lock on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    path: PathBuf,
    expected_digest: Option<String>,
}

impl LockHandle {
    /// Handle for the lock in `run_dir`, without a known digest.
    ///
    /// Used by a process that did not create the lock; integrity is still
    /// checked against the digest stored in the file.
    pub fn in_dir(run_dir: impl AsRef<Path>) -> Self {
        Self {
            path: run_dir.as_ref().join(LOCK_FILE_NAME),
            expected_digest: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn expected_digest(&self) -> Option<&str> {
        self.expected_digest.as_deref()
    }
}

/// Writes locks into one run directory.
#[derive(Debug, Clone)]
pub struct PlanLock {
    run_dir: PathBuf,
}

impl PlanLock {
    /// Create a plan lock rooted at `run_dir`. The directory is created on lock.
    pub fn new(run_dir: impl AsRef<Path>) -> Self {
        Self {
            run_dir: run_dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.run_dir.join(LOCK_FILE_NAME)
    }

    pub fn is_locked(&self) -> bool {
        self.path().exists()
    }

    /// Freeze `plan` to disk and return a handle to it.
    pub fn lock(&self, plan: Plan, origin: PlanOrigin) -> Result<LockHandle> {
        let path = self.path();
        if path.exists() {
            return Err(CoreError::AlreadyLocked(path.display().to_string()));
        }

        let locked = LockedPlan::new(plan, origin)?;
        let bytes = locked.to_json()?;

        fs::create_dir_all(&self.run_dir)?;

        // Atomic write: temp file in the same directory, then a no-clobber rename.
        let mut tmp = NamedTempFile::new_in(&self.run_dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                CoreError::AlreadyLocked(path.display().to_string())
            } else {
                CoreError::Io(e.error)
            }
        })?;

        info!(
            event = "plan.locked",
            path = %path.display(),
            digest = %locked.digest,
            stages = locked.plan.len(),
            fallback = locked.origin.is_fallback(),
        );

        Ok(LockHandle {
            path,
            expected_digest: Some(locked.digest),
        })
    }

    /// Handle to this directory's lock for reading.
    pub fn handle(&self) -> LockHandle {
        LockHandle::in_dir(&self.run_dir)
    }
}

/// Read a locked plan back and verify its integrity.
pub fn unlock(handle: &LockHandle) -> Result<LockedPlan> {
    let bytes = fs::read(&handle.path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CoreError::LockNotFound(handle.path.display().to_string())
        } else {
            CoreError::Io(e)
        }
    })?;
    let locked: LockedPlan = serde_json::from_slice(&bytes)?;

    if locked.version != LOCK_VERSION {
        return Err(CoreError::UnsupportedLockVersion {
            found: locked.version,
            expected: LOCK_VERSION,
        });
    }

    let actual = plan_digest(&locked.plan)?;
    if actual != locked.digest {
        return Err(CoreError::DigestMismatch {
            expected: locked.digest.clone(),
            actual,
        });
    }
    if let Some(expected) = handle.expected_digest() {
        if expected != locked.digest {
            return Err(CoreError::DigestMismatch {
                expected: expected.to_string(),
                actual: locked.digest.clone(),
            });
        }
    }

    Ok(locked)
}

/// SHA-256 hex digest of a plan's canonical JSON.
pub fn plan_digest(plan: &Plan) -> Result<String> {
    let bytes = plan.canonical_bytes()?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Stage;

    fn sample_plan() -> Plan {
        Plan::new(vec![
            Stage::new("Build", "make build"),
            Stage::new("Test", "pytest -q"),
            Stage::new("Package", "ls -la"),
        ])
    }

    #[test]
    fn lock_then_unlock_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PlanLock::new(dir.path());

        let handle = lock.lock(sample_plan(), PlanOrigin::Remote).unwrap();
        let locked = unlock(&handle).unwrap();

        assert_eq!(locked.plan(), &sample_plan());
        assert_eq!(locked.origin(), &PlanOrigin::Remote);
        assert_eq!(handle.expected_digest(), Some(locked.digest()));
    }

    #[test]
    fn second_lock_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PlanLock::new(dir.path());
        lock.lock(sample_plan(), PlanOrigin::Remote).unwrap();

        let other = Plan::new(vec![Stage::new("Other", "true")]);
        match lock.lock(other, PlanOrigin::Remote) {
            Err(CoreError::AlreadyLocked(_)) => {}
            other => panic!("expected AlreadyLocked, got {other:?}"),
        }

        // The original plan is untouched.
        let locked = unlock(&lock.handle()).unwrap();
        assert_eq!(locked.plan(), &sample_plan());
    }

    #[test]
    fn tampered_lock_fails_digest_check() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PlanLock::new(dir.path());
        lock.lock(sample_plan(), PlanOrigin::Remote).unwrap();

        let text = std::fs::read_to_string(lock.path()).unwrap();
        std::fs::write(lock.path(), text.replace("make build", "make deploy")).unwrap();

        match unlock(&lock.handle()) {
            Err(CoreError::DigestMismatch { .. }) => {}
            other => panic!("expected DigestMismatch, got {other:?}"),
        }
    }

    #[test]
    fn unlock_missing_lock() {
        let dir = tempfile::tempdir().unwrap();
        match unlock(&LockHandle::in_dir(dir.path())) {
            Err(CoreError::LockNotFound(_)) => {}
            other => panic!("expected LockNotFound, got {other:?}"),
        }
    }

    #[test]
    fn unlock_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PlanLock::new(dir.path());
        lock.lock(sample_plan(), PlanOrigin::Remote).unwrap();

        let mut doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(lock.path()).unwrap()).unwrap();
        doc["version"] = serde_json::json!(99);
        std::fs::write(lock.path(), serde_json::to_vec(&doc).unwrap()).unwrap();

        match unlock(&lock.handle()) {
            Err(CoreError::UnsupportedLockVersion { found: 99, .. }) => {}
            other => panic!("expected UnsupportedLockVersion, got {other:?}"),
        }
    }

    #[test]
    fn invalid_plan_is_not_locked() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PlanLock::new(dir.path());
        let plan = Plan::new(vec![Stage::new("Build", "")]);

        assert!(matches!(
            lock.lock(plan, PlanOrigin::Remote),
            Err(CoreError::InvalidPlan(_))
        ));
        assert!(!lock.is_locked());
    }

    #[test]
    fn fallback_origin_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let lock = PlanLock::new(dir.path().join("nested/run-7"));
        let origin = PlanOrigin::Fallback {
            reason: "health check failed".to_string(),
        };

        lock.lock(sample_plan(), origin.clone()).unwrap();
        let locked = unlock(&lock.handle()).unwrap();
        assert_eq!(locked.origin(), &origin);
        assert!(locked.origin().is_fallback());
    }
}
