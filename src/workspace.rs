//! Workspace open/close lifecycle, commit, restore, rollback, and drift
//! (spec §4.7–§4.9, §4.11).
//!
//! A `Workspace` exclusively owns its working tree and per-workspace
//! config/lock (spec §3 Ownership). Opening one acquires the project's
//! shared lock, then the workspace's own exclusive lock — always in that
//! order (spec §4.7); closing releases them in reverse.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::FastestError;
use crate::hash::Sha256Hex;
use crate::ids::{SnapshotId, WorkspaceId};
use crate::ignore_match::IgnoreMatcher;
use crate::lock::{ProjectLockGuard, WorkspaceLockGuard};
use crate::manifest::{EntryKind, Manifest};
use crate::project::Project;
use crate::registry::WorkspaceEntry;
use crate::snapshot::Snapshot;

/// Persisted workspace state (`<workspace>/config.json` for a linked
/// workspace, or `<metadata-dir>/config.json` for `main`). This is *state*,
/// not user settings — see [`crate::config`] for the distinction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceState {
    pub fork_snapshot_id: Option<SnapshotId>,
    pub current_snapshot_id: Option<SnapshotId>,
    /// Set during a merge, carried into the next snapshot's `parent_ids`.
    #[serde(default)]
    pub merge_parents: Vec<SnapshotId>,
}

/// Which snapshot a drift comparison is taken against (spec §4.11).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriftBase {
    /// "What has this workspace accomplished since branching."
    Fork,
    /// "What uncommitted work is in the tree."
    Current,
}

/// A summary of working-tree drift against a chosen base manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Drift {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub total_bytes_changed: u64,
}

impl Drift {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// An open working copy, holding both locks required to operate safely.
pub struct Workspace<'p> {
    project: &'p Project,
    id: WorkspaceId,
    path: PathBuf,
    state: WorkspaceState,
    _project_lock: ProjectLockGuard,
    _workspace_lock: WorkspaceLockGuard,
}

impl<'p> Workspace<'p> {
    /// Create a new workspace record: registers it and writes its initial
    /// state. Does not materialize a working tree (the caller decides how:
    /// fresh directory, or copy of an existing one).
    ///
    /// # Errors
    /// Returns `WorkspaceExists` if the name is already registered, or any
    /// I/O error creating the workspace's metadata directory.
    pub fn create(
        project: &Project,
        id: WorkspaceId,
        path: PathBuf,
        fork_snapshot_id: Option<SnapshotId>,
    ) -> Result<(), FastestError> {
        if project.registry().get_workspace(&id).is_ok() {
            return Err(FastestError::WorkspaceExists { name: id });
        }
        let ws_dir = project.workspace_dir(&id);
        fs::create_dir_all(&ws_dir)?;
        let state = WorkspaceState {
            fork_snapshot_id: fork_snapshot_id.clone(),
            current_snapshot_id: fork_snapshot_id.clone(),
            merge_parents: Vec::new(),
        };
        crate::atomic::write_atomic(
            &ws_dir.join("config.json"),
            &serde_json::to_vec(&state).expect("WorkspaceState serialization cannot fail"),
        )?;
        project.registry().upsert_workspace(WorkspaceEntry {
            id,
            project_id: project.id(),
            fork_snapshot_id,
            current_snapshot_id: state.current_snapshot_id,
            path,
            created_at: crate::snapshot::rfc3339_now(),
        })?;
        Ok(())
    }

    /// Open an existing workspace, acquiring the project-shared lock then
    /// the workspace-exclusive lock, in that fixed order.
    ///
    /// # Errors
    /// Returns `WorkspaceNotFound` if not registered, `WorkspaceCorrupted`
    /// if its state file fails to parse, or `Locked`/`LockTimeout` if
    /// either lock cannot be acquired.
    pub fn open(project: &'p Project, id: WorkspaceId) -> Result<Self, FastestError> {
        let entry = project.registry().get_workspace(&id)?;
        let project_lock = project.lock().lock_shared()?;
        let ws_dir = project.workspace_dir(&id);
        let workspace_lock =
            crate::lock::WorkspaceLock::new(ws_dir.join(".lock")).lock()?;

        let state_bytes = fs::read(ws_dir.join("config.json"))?;
        let state: WorkspaceState =
            serde_json::from_slice(&state_bytes).map_err(|e| FastestError::WorkspaceCorrupted {
                name: id.clone(),
                detail: e.to_string(),
            })?;

        debug!(workspace = %id, "opened workspace");
        Ok(Self {
            project,
            id,
            path: entry.path,
            state,
            _project_lock: project_lock,
            _workspace_lock: workspace_lock,
        })
    }

    #[must_use]
    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn state(&self) -> &WorkspaceState {
        &self.state
    }

    /// Escape hatch for other core modules (merge, rewrite) that need the
    /// owning project to load snapshots/manifests/blobs outside the methods
    /// defined here.
    #[must_use]
    pub(crate) fn project_for_merge(&self) -> &'p Project {
        self.project
    }

    /// Atomically repoint this workspace at a rewritten chain's head
    /// (spec §4.12 step 3). The old chain is left on disk untouched.
    ///
    /// # Errors
    /// Returns an error on any I/O failure persisting the new state.
    pub(crate) fn repoint_after_rewrite(&mut self, new_head: Option<SnapshotId>) -> Result<(), FastestError> {
        self.state.current_snapshot_id = new_head;
        self.write_state()?;
        if let Err(e) = self.project.registry().upsert_workspace(WorkspaceEntry {
            id: self.id.clone(),
            project_id: self.project.id(),
            fork_snapshot_id: self.state.fork_snapshot_id.clone(),
            current_snapshot_id: self.state.current_snapshot_id.clone(),
            path: self.path.clone(),
            created_at: String::new(),
        }) {
            warn!(workspace = %self.id, error = %e, "failed to update registry after rewrite");
        }
        Ok(())
    }

    fn config_path(&self) -> PathBuf {
        self.project.workspace_dir(&self.id).join("config.json")
    }

    fn merge_parents_path(&self) -> PathBuf {
        self.project.workspace_dir(&self.id).join("merge_parents.json")
    }

    fn write_state(&self) -> Result<(), FastestError> {
        crate::atomic::write_atomic(
            &self.config_path(),
            &serde_json::to_vec(&self.state).expect("WorkspaceState serialization cannot fail"),
        )
    }

    fn ignore_matcher(&self) -> Result<IgnoreMatcher, FastestError> {
        IgnoreMatcher::build(&self.path, &self.project.config().tree.ignore_file)
    }

    /// Capture a snapshot of the current working tree and advance
    /// `current_snapshot_id` (spec §4.8). Crash-safe write order: any
    /// crash before step 4 (the commit point) leaves only orphan
    /// snapshot/manifest/blob data, collectable by GC.
    ///
    /// # Errors
    /// Returns an error if the tree walk, blob insertion, or any metadata
    /// write fails.
    pub fn commit(&mut self, message: String, author: Option<String>) -> Result<Snapshot, FastestError> {
        let ignore = self.ignore_matcher()?;
        let manifest = Manifest::build_from_tree(
            &self.path,
            &ignore,
            self.project.blobs(),
            self.project.config().tree.max_files,
        )?;
        let manifest_hash = self.project.store_manifest(&manifest)?;

        let mut parent_ids: Vec<SnapshotId> = self.state.current_snapshot_id.iter().cloned().collect();
        parent_ids.extend(self.state.merge_parents.iter().cloned());

        let snapshot = self
            .project
            .snapshots()
            .create(manifest_hash, parent_ids, message, author)?;

        // Commit point: any crash before this line is harmless.
        self.state.current_snapshot_id = Some(snapshot.id.clone());
        self.write_state()?;
        info!(workspace = %self.id, snapshot = %snapshot.id, "committed");

        // Best-effort post-commit cleanup.
        self.state.merge_parents.clear();
        if let Err(e) = self.write_state() {
            warn!(workspace = %self.id, error = %e, "failed to clear merge_parents after commit");
        }
        let _ = fs::remove_file(self.merge_parents_path());
        if let Err(e) = self.project.registry().upsert_workspace(WorkspaceEntry {
            id: self.id.clone(),
            project_id: self.project.id(),
            fork_snapshot_id: self.state.fork_snapshot_id.clone(),
            current_snapshot_id: self.state.current_snapshot_id.clone(),
            path: self.path.clone(),
            created_at: String::new(),
        }) {
            warn!(workspace = %self.id, error = %e, "failed to update registry after commit");
        }

        Ok(snapshot)
    }

    /// Materialize a snapshot's tree under `target_dir`. Existing files are
    /// overwritten; files absent from the manifest are left alone (use
    /// [`Self::rollback`] for the destructive, tracked-delete variant).
    ///
    /// # Errors
    /// Returns an error if the snapshot or any referenced blob is missing,
    /// or on any I/O failure writing files.
    pub fn restore(&self, snapshot_id: &SnapshotId, target_dir: &Path) -> Result<(), FastestError> {
        let snapshot = self.project.snapshots().get(snapshot_id)?;
        let manifest = self.project.load_manifest(&snapshot.manifest_hash)?;
        materialize(&manifest, target_dir, self.project.blobs())
    }

    /// Destructive restore into the current workspace's working tree
    /// (spec §4.9). Takes a pre-rollback safety snapshot first; if that
    /// fails, the rollback is aborted entirely (fail-closed).
    ///
    /// # Errors
    /// Returns `PreOperationSnapshotFailed` if the safety snapshot cannot
    /// be taken, or any error from materializing the target tree.
    pub fn rollback(&mut self, snapshot_id: &SnapshotId) -> Result<Snapshot, FastestError> {
        let safety = self
            .commit("pre-rollback safety snapshot".to_owned(), None)
            .map_err(|e| FastestError::PreOperationSnapshotFailed {
                detail: e.to_string(),
            })?;
        info!(workspace = %self.id, safety_snapshot = %safety.id, "captured pre-rollback safety snapshot");

        let snapshot = self.project.snapshots().get(snapshot_id)?;
        let manifest = self.project.load_manifest(&snapshot.manifest_hash)?;

        let existing = build_dry_manifest(&self.path, &self.ignore_matcher()?)?;
        let target_paths: std::collections::HashSet<&str> =
            manifest.entries.iter().map(|e| e.path.as_str()).collect();
        for entry in &existing.entries {
            if !target_paths.contains(entry.path.as_str()) {
                remove_tracked(&self.path, entry)?;
            }
        }
        materialize(&manifest, &self.path, self.project.blobs())?;

        self.state.current_snapshot_id = Some(snapshot.id.clone());
        self.write_state()?;
        info!(workspace = %self.id, snapshot = %snapshot.id, "rolled back");
        Ok(snapshot)
    }

    /// Compare the current working tree against `base`'s manifest
    /// (spec §4.11). Blobs may be inserted opportunistically for caching.
    ///
    /// # Errors
    /// Returns an error if `base` resolves to a snapshot and it (or its
    /// manifest) cannot be loaded, or on any I/O failure walking the tree.
    pub fn drift(&self, base: DriftBase) -> Result<Drift, FastestError> {
        let base_id = match base {
            DriftBase::Fork => self.state.fork_snapshot_id.clone(),
            DriftBase::Current => self.state.current_snapshot_id.clone(),
        };
        let base_manifest = match base_id {
            Some(id) => {
                let snapshot = self.project.snapshots().get(&id)?;
                self.project.load_manifest(&snapshot.manifest_hash)?
            }
            None => Manifest::default(),
        };

        let ignore = self.ignore_matcher()?;
        let current = Manifest::build_from_tree(
            &self.path,
            &ignore,
            self.project.blobs(),
            self.project.config().tree.max_files,
        )?;

        let diff = Manifest::diff(&base_manifest, &current);
        let total_bytes_changed = diff
            .added
            .iter()
            .chain(diff.modified.iter())
            .filter_map(|e| match &e.kind {
                EntryKind::File { size, .. } => Some(*size),
                _ => None,
            })
            .sum();
        Ok(Drift {
            added: diff.added.into_iter().map(|e| e.path).collect(),
            modified: diff.modified.into_iter().map(|e| e.path).collect(),
            deleted: diff.deleted.into_iter().map(|e| e.path).collect(),
            total_bytes_changed,
        })
    }

    /// Record merge intent before any working-tree mutation (spec §4.10
    /// step 3): write `merge_parents` so a crash before the next commit
    /// still records the merge relationship correctly.
    ///
    /// # Errors
    /// Returns an error on any I/O failure.
    pub fn set_merge_parents(&mut self, parents: Vec<SnapshotId>) -> Result<(), FastestError> {
        self.state.merge_parents = parents.clone();
        self.write_state()?;
        crate::atomic::write_atomic(
            &self.merge_parents_path(),
            &serde_json::to_vec(&parents).expect("Vec<SnapshotId> serialization cannot fail"),
        )
    }
}

/// A dry walk that does not insert blobs (used for comparing against an
/// existing tree without mutating the store).
fn build_dry_manifest(root: &Path, ignore: &IgnoreMatcher) -> Result<Manifest, FastestError> {
    let scratch = tempfile::tempdir()?;
    let blobs = crate::blob::BlobStore::open(scratch.path().to_path_buf())?;
    Manifest::build_from_tree(root, ignore, &blobs, None)
}

fn remove_tracked(root: &Path, entry: &crate::manifest::ManifestEntry) -> Result<(), FastestError> {
    let path = root.join(&entry.path);
    match &entry.kind {
        EntryKind::Dir => {
            let _ = fs::remove_dir(&path);
        }
        EntryKind::File { .. } | EntryKind::Symlink { .. } => {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}

fn materialize(manifest: &Manifest, target_dir: &Path, blobs: &crate::blob::BlobStore) -> Result<(), FastestError> {
    for entry in &manifest.entries {
        let path = target_dir.join(&entry.path);
        match &entry.kind {
            EntryKind::Dir => {
                fs::create_dir_all(&path)?;
            }
            EntryKind::File { hash, .. } => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let bytes = blobs.read(hash)?;
                fs::write(&path, &bytes)?;
                fs::set_permissions(&path, fs::Permissions::from_mode(entry.mode))?;
            }
            EntryKind::Symlink { target } => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let _ = fs::remove_file(&path);
                std::os::unix::fs::symlink(target, &path)?;
            }
        }
    }
    Ok(())
}
