//! Project and workspace locking (spec §4.7).
//!
//! Two scopes: a project-level lock (shared by ordinary operations,
//! exclusive by GC) and a per-workspace exclusive lock. Acquisition order
//! is always project-shared → workspace-exclusive; release is the reverse.
//! Both wrap `fs4::FileExt` over a plain `File` opened at a fixed path, so
//! `flock` semantics are per-open-file-description — callers must acquire a
//! fresh handle for each lock, not share one across threads.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::FileExt;

use crate::error::FastestError;

/// A held project-level lock. Dropping it releases the lock.
pub struct ProjectLockGuard {
    file: File,
    exclusive: bool,
}

impl Drop for ProjectLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// The project-level lock file (`<metadata-dir>/lock`).
pub struct ProjectLock {
    path: PathBuf,
}

impl ProjectLock {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Acquire in shared mode, blocking until available. Ordinary workspace
    /// operations hold this for their entire duration.
    ///
    /// # Errors
    /// Returns `Locked` if the lock file cannot be opened or locked.
    pub fn lock_shared(&self) -> Result<ProjectLockGuard, FastestError> {
        let file = self.open()?;
        FileExt::lock_shared(&file).map_err(|e| FastestError::Locked {
            detail: format!("{}: {e}", self.path.display()),
        })?;
        Ok(ProjectLockGuard {
            file,
            exclusive: false,
        })
    }

    /// Acquire exclusively, blocking until available. GC holds this for
    /// its entire sweep so no operation can race with it.
    ///
    /// # Errors
    /// Returns `Locked` if the lock file cannot be opened or locked.
    pub fn lock_exclusive(&self) -> Result<ProjectLockGuard, FastestError> {
        let file = self.open()?;
        FileExt::lock_exclusive(&file).map_err(|e| FastestError::Locked {
            detail: format!("{}: {e}", self.path.display()),
        })?;
        Ok(ProjectLockGuard {
            file,
            exclusive: true,
        })
    }

    /// Non-blocking probe: `true` if an exclusive lock (i.e. GC) could be
    /// acquired right now.
    ///
    /// # Errors
    /// Returns `Locked` if the lock file cannot be opened.
    pub fn try_lock_exclusive(&self) -> Result<bool, FastestError> {
        let file = self.open()?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    fn open(&self) -> Result<File, FastestError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(&self.path)?)
    }
}

impl ProjectLockGuard {
    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

/// A held workspace-level exclusive lock. Dropping it releases the lock.
pub struct WorkspaceLockGuard {
    file: File,
}

impl Drop for WorkspaceLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// A workspace's exclusive lock file (`<workspace>/.lock`).
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Acquire exclusively, blocking until available. Concurrent operations
    /// on the same workspace serialize on this lock.
    ///
    /// # Errors
    /// Returns `Locked` if the lock file cannot be opened or locked.
    pub fn lock(&self) -> Result<WorkspaceLockGuard, FastestError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(&self.path)?;
        FileExt::lock_exclusive(&file).map_err(|e| FastestError::Locked {
            detail: format!("{}: {e}", self.path.display()),
        })?;
        Ok(WorkspaceLockGuard { file })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_lock_allows_concurrent_shared_holders() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProjectLock::new(dir.path().join("lock"));
        let a = lock.lock_shared().unwrap();
        let b = lock.lock_shared().unwrap();
        drop(a);
        drop(b);
    }

    #[test]
    fn exclusive_probe_false_while_shared_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProjectLock::new(dir.path().join("lock"));
        let _guard = lock.lock_shared().unwrap();
        assert!(!lock.try_lock_exclusive().unwrap());
    }

    #[test]
    fn exclusive_probe_true_when_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProjectLock::new(dir.path().join("lock"));
        assert!(lock.try_lock_exclusive().unwrap());
    }

    #[test]
    fn workspace_lock_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let lock = WorkspaceLock::new(dir.path().join("ws").join(".lock"));
        let _guard = lock.lock().unwrap();
        assert!(lock.path().exists());
    }

    #[test]
    fn project_lock_guard_reports_mode() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProjectLock::new(dir.path().join("lock"));
        let shared = lock.lock_shared().unwrap();
        assert!(!shared.is_exclusive());
    }
}
