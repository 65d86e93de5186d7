//! Garbage collection (spec §4.13).
//!
//! Computes reachability from every workspace's `fork_snapshot_id` and
//! `current_snapshot_id`, every in-flight `merge_parents` entry, and the
//! registry's pinned snapshots, then sweeps anything not reachable.
//! Runs under the project-level exclusive lock, so no workspace operation
//! (which holds the shared lock for its entire duration) can race with it.

use std::collections::HashSet;

use tracing::info;

use crate::error::FastestError;
use crate::hash::Sha256Hex;
use crate::ids::SnapshotId;
use crate::manifest::EntryKind;
use crate::project::Project;

/// A summary of what a GC pass removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcReport {
    pub snapshots_removed: Vec<SnapshotId>,
    pub manifests_removed: Vec<Sha256Hex>,
    pub blobs_removed: Vec<Sha256Hex>,
}

/// Run one GC pass over `project`: acquire the exclusive project lock,
/// compute reachability, sweep unreachable snapshots/manifests/blobs.
///
/// # Errors
/// Returns an error if the exclusive lock cannot be acquired, if the
/// registry or any root snapshot's ancestor chain fails to load, or on
/// any I/O failure during the sweep.
pub fn collect(project: &Project) -> Result<GcReport, FastestError> {
    let _guard = project.lock().lock_exclusive()?;

    let mut roots: HashSet<SnapshotId> = HashSet::new();
    for entry in project.registry().list_workspaces()? {
        roots.extend(entry.fork_snapshot_id);
        roots.extend(entry.current_snapshot_id);
    }
    roots.extend(project.registry().pinned_snapshots()?);
    // Pull in merge_parents from every workspace's persisted state. Workspaces
    // that are currently open elsewhere still have their state reflected on
    // disk (written before any working-tree mutation, spec §4.10 step 3), so
    // this reads straight from the registry's tracked entries rather than
    // requiring every workspace to be opened here.
    for entry in project.registry().list_workspaces()? {
        let config_path = project.workspace_dir(&entry.id).join("config.json");
        if let Ok(bytes) = std::fs::read(&config_path) {
            if let Ok(state) = serde_json::from_slice::<crate::workspace::WorkspaceState>(&bytes) {
                roots.extend(state.merge_parents);
            }
        }
    }

    let mut reachable_snapshots: HashSet<SnapshotId> = HashSet::new();
    let mut reachable_manifests: HashSet<Sha256Hex> = HashSet::new();
    for root in &roots {
        if !project.snapshots().exists(root) {
            continue;
        }
        for snapshot in project.snapshots().ancestors(root)? {
            reachable_manifests.insert(snapshot.manifest_hash.clone());
            reachable_snapshots.insert(snapshot.id);
        }
    }

    let mut reachable_blobs: HashSet<Sha256Hex> = HashSet::new();
    for manifest_hash in &reachable_manifests {
        let manifest = project.load_manifest(manifest_hash)?;
        for entry in &manifest.entries {
            if let EntryKind::File { hash, .. } = &entry.kind {
                reachable_blobs.insert(hash.clone());
            }
        }
    }

    let mut report = GcReport::default();

    for id in project.snapshots().iter_all()? {
        if !reachable_snapshots.contains(&id) {
            project.snapshots().remove(&id)?;
            report.snapshots_removed.push(id);
        }
    }

    for hash in project.list_manifest_hashes()? {
        if !reachable_manifests.contains(&hash) {
            project.remove_manifest(&hash)?;
            report.manifests_removed.push(hash);
        }
    }

    for hash in project.blobs().iter_all()? {
        if !reachable_blobs.contains(&hash) {
            project.blobs().remove(&hash)?;
            report.blobs_removed.push(hash);
        }
    }

    info!(
        snapshots = report.snapshots_removed.len(),
        manifests = report.manifests_removed.len(),
        blobs = report.blobs_removed.len(),
        "gc pass complete"
    );
    Ok(report)
}
