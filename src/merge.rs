//! Three-way merge engine (spec §4.10).
//!
//! Merge-base lookup, dirty-tree safety, pre-apply merge-intent recording,
//! three-way classification, and conflict resolution via an injected
//! [`ConflictResolver`] — the one external capability this crate's core
//! does not implement itself (spec §6, §9).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::error::FastestError;
use crate::ids::SnapshotId;
use crate::manifest::{EntryKind, Manifest, ThreeWayClass};
use crate::workspace::{DriftBase, Workspace};

/// The caller's chosen strategy for resolving a conflicting path
/// (spec §4.10 step 5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Keep the current workspace's version.
    Ours,
    /// Take the source's version.
    Theirs,
    /// Write conflict-marker text and record the path as unresolved.
    Manual,
    /// Delegate to the injected [`ConflictResolver`].
    Agent,
}

/// An external capability that attempts to resolve a textual conflict.
/// The core has no idea what implementation — if any — is behind this;
/// it only calls `resolve` and accepts `Ok(None)` as "could not resolve".
pub trait ConflictResolver {
    /// Attempt to resolve a conflict at `path` given the three versions.
    ///
    /// # Errors
    /// Returns an error if the resolver itself fails (e.g. a subprocess
    /// could not be spawned). Returning `Ok(None)` means "no resolution",
    /// which is not an error — the caller falls back to its strategy.
    fn resolve(
        &self,
        path: &Path,
        base: &[u8],
        ours: &[u8],
        theirs: &[u8],
    ) -> Result<Option<Vec<u8>>, ResolverError>;
}

/// A resolver that never resolves anything, forcing `Ours`/`Theirs`/
/// `Manual` fallback for every conflict.
#[derive(Debug, Default)]
pub struct NullResolver;

impl ConflictResolver for NullResolver {
    fn resolve(&self, _: &Path, _: &[u8], _: &[u8], _: &[u8]) -> Result<Option<Vec<u8>>, ResolverError> {
        Ok(None)
    }
}

/// A resolver that invokes a user-configured external tool, feeding it the
/// three versions as temp files and reading the merged result from stdout.
/// The core does not know what the tool is (could be a human editor, could
/// be an AI agent) — see spec §6's `ConflictResolver` capability note.
pub struct ExternalProcessResolver {
    command: String,
    args: Vec<String>,
}

impl ExternalProcessResolver {
    #[must_use]
    pub fn new(command: String, args: Vec<String>) -> Self {
        Self { command, args }
    }
}

impl ConflictResolver for ExternalProcessResolver {
    fn resolve(
        &self,
        path: &Path,
        base: &[u8],
        ours: &[u8],
        theirs: &[u8],
    ) -> Result<Option<Vec<u8>>, ResolverError> {
        let dir = tempfile::tempdir().map_err(ResolverError::Io)?;
        let base_path = dir.path().join("base");
        let ours_path = dir.path().join("ours");
        let theirs_path = dir.path().join("theirs");
        fs::write(&base_path, base).map_err(ResolverError::Io)?;
        fs::write(&ours_path, ours).map_err(ResolverError::Io)?;
        fs::write(&theirs_path, theirs).map_err(ResolverError::Io)?;

        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(path)
            .arg(&base_path)
            .arg(&ours_path)
            .arg(&theirs_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .map_err(ResolverError::Io)?;

        if output.status.success() {
            Ok(Some(output.stdout))
        } else {
            Ok(None)
        }
    }
}

/// An error from a [`ConflictResolver`] implementation.
#[derive(Debug)]
pub enum ResolverError {
    Io(std::io::Error),
}

impl fmt::Display for ResolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "conflict resolver I/O error: {e}"),
        }
    }
}

impl std::error::Error for ResolverError {}

impl From<ResolverError> for FastestError {
    fn from(err: ResolverError) -> Self {
        Self::Io(match err {
            ResolverError::Io(e) => e,
        })
    }
}

/// The result of a merge: which paths were applied, and which remain
/// unresolved. Zero unresolved paths is success; non-zero is a successful
/// outcome too (spec §7: "not an error, a successful outcome"), left for
/// the caller to map to an exit code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub applied: Vec<PathBuf>,
    pub unresolved: Vec<PathBuf>,
    pub merge_base: Option<SnapshotId>,
}

impl MergeOutcome {
    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.unresolved.is_empty()
    }
}

const CONFLICT_MARKER_START: &str = "<<<<<<< ours";
const CONFLICT_MARKER_MID: &str = "=======";
const CONFLICT_MARKER_END: &str = ">>>>>>> theirs";

/// Merge `source_snapshot_id` into `workspace`'s current tree (spec §4.10).
///
/// Does not commit: the working tree is left such that the caller's next
/// `commit` produces a merge snapshot with parents `[previous current,
/// source]`.
///
/// # Errors
/// Returns an error if the merge-base lookup, dirty-tree check, or any
/// file I/O fails. Conflicts are not an error — see [`MergeOutcome`].
pub fn merge(
    workspace: &mut Workspace<'_>,
    source_snapshot_id: &SnapshotId,
    strategy: MergeStrategy,
    resolver: &dyn ConflictResolver,
    skip_pre_snapshot: bool,
) -> Result<MergeOutcome, FastestError> {
    let current_id = workspace
        .state()
        .current_snapshot_id
        .clone()
        .ok_or_else(|| FastestError::WorkspaceCorrupted {
            name: workspace.id().clone(),
            detail: "cannot merge into a workspace with no commits".to_owned(),
        })?;

    let project = workspace.project_for_merge();
    let base_snapshot = project
        .snapshots()
        .merge_base(&current_id, source_snapshot_id)?;

    // Dirty-tree safety: fails closed on any drift-check error.
    let drift = workspace.drift(DriftBase::Current)?;
    if !drift.is_empty() && !skip_pre_snapshot {
        workspace
            .commit("pre-merge safety snapshot".to_owned(), None)
            .map_err(|e| FastestError::PreOperationSnapshotFailed {
                detail: e.to_string(),
            })?;
    }

    // Record merge intent before any file mutation (spec §4.10 step 3).
    workspace.set_merge_parents(vec![source_snapshot_id.clone()])?;

    let current_id = workspace
        .state()
        .current_snapshot_id
        .clone()
        .expect("current_snapshot_id was just checked to be Some");
    let ours_manifest = load_snapshot_manifest(workspace, &current_id)?;
    let theirs_manifest = load_snapshot_manifest(workspace, source_snapshot_id)?;
    let base_manifest = match &base_snapshot {
        Some(s) => project.load_manifest(&s.manifest_hash)?,
        None => Manifest::default(),
    };

    let plan = Manifest::three_way_diff(&base_manifest, &ours_manifest, &theirs_manifest);

    let mut applied = Vec::new();
    let mut unresolved = Vec::new();

    for (path, class) in plan.classifications {
        let rel_path = PathBuf::from(&path);
        match class {
            ThreeWayClass::BothSame | ThreeWayClass::OursChanged => {}
            ThreeWayClass::TheirsChanged | ThreeWayClass::BothSameChange => {
                apply_entry(workspace.path(), &theirs_manifest, &path, project)?;
                applied.push(rel_path);
            }
            ThreeWayClass::Conflict => {
                let resolved = resolve_conflict(
                    workspace.path(),
                    &path,
                    &base_manifest,
                    &ours_manifest,
                    &theirs_manifest,
                    strategy,
                    resolver,
                    project,
                )?;
                if resolved {
                    applied.push(rel_path);
                } else {
                    unresolved.push(rel_path);
                }
            }
        }
    }

    if unresolved.is_empty() {
        info!(workspace = %workspace.id(), source = %source_snapshot_id, "merge applied cleanly");
    } else {
        warn!(workspace = %workspace.id(), count = unresolved.len(), "merge left unresolved conflicts");
    }

    Ok(MergeOutcome {
        applied,
        unresolved,
        merge_base: base_snapshot.map(|s| s.id),
    })
}

fn load_snapshot_manifest(
    workspace: &Workspace<'_>,
    id: &SnapshotId,
) -> Result<Manifest, FastestError> {
    let project = workspace.project_for_merge();
    let snapshot = project.snapshots().get(id)?;
    project.load_manifest(&snapshot.manifest_hash)
}

fn entry_bytes(manifest: &Manifest, path: &str, project: &crate::project::Project) -> Result<Vec<u8>, FastestError> {
    let Some(entry) = manifest.entries.iter().find(|e| e.path == path) else {
        return Ok(Vec::new());
    };
    match &entry.kind {
        EntryKind::File { hash, .. } => project.blobs().read(hash),
        EntryKind::Symlink { target } => Ok(target.clone().into_bytes()),
        EntryKind::Dir => Ok(Vec::new()),
    }
}

fn apply_entry(
    workspace_root: &Path,
    manifest: &Manifest,
    path: &str,
    project: &crate::project::Project,
) -> Result<(), FastestError> {
    let target = workspace_root.join(path);
    let Some(entry) = manifest.entries.iter().find(|e| e.path == path) else {
        // Deleted on the source side: remove if present.
        let _ = fs::remove_file(&target);
        return Ok(());
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    match &entry.kind {
        EntryKind::File { hash, .. } => {
            let bytes = project.blobs().read(hash)?;
            fs::write(&target, bytes)?;
        }
        EntryKind::Symlink { target: link } => {
            let _ = fs::remove_file(&target);
            std::os::unix::fs::symlink(link, &target)?;
        }
        EntryKind::Dir => {
            fs::create_dir_all(&target)?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn resolve_conflict(
    workspace_root: &Path,
    path: &str,
    base: &Manifest,
    ours: &Manifest,
    theirs: &Manifest,
    strategy: MergeStrategy,
    resolver: &dyn ConflictResolver,
    project: &crate::project::Project,
) -> Result<bool, FastestError> {
    match strategy {
        MergeStrategy::Ours => Ok(true),
        MergeStrategy::Theirs => {
            apply_entry(workspace_root, theirs, path, project)?;
            Ok(true)
        }
        MergeStrategy::Manual => {
            let ours_bytes = entry_bytes(ours, path, project)?;
            let theirs_bytes = entry_bytes(theirs, path, project)?;
            let mut marked = Vec::new();
            marked.extend_from_slice(CONFLICT_MARKER_START.as_bytes());
            marked.push(b'\n');
            marked.extend_from_slice(&ours_bytes);
            marked.extend_from_slice(CONFLICT_MARKER_MID.as_bytes());
            marked.push(b'\n');
            marked.extend_from_slice(&theirs_bytes);
            marked.extend_from_slice(CONFLICT_MARKER_END.as_bytes());
            marked.push(b'\n');
            let target = workspace_root.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, marked)?;
            Ok(false)
        }
        MergeStrategy::Agent => {
            let base_bytes = entry_bytes(base, path, project)?;
            let ours_bytes = entry_bytes(ours, path, project)?;
            let theirs_bytes = entry_bytes(theirs, path, project)?;
            let target = workspace_root.join(path);
            match resolver.resolve(Path::new(path), &base_bytes, &ours_bytes, &theirs_bytes)? {
                Some(merged) => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(target, merged)?;
                    Ok(true)
                }
                None => resolve_conflict(
                    workspace_root,
                    path,
                    base,
                    ours,
                    theirs,
                    MergeStrategy::Manual,
                    resolver,
                    project,
                ),
            }
        }
    }
}
