//! Project-wide workspace registry (spec §4.6).
//!
//! A single JSON file listing every workspace and every known snapshot.
//! It is the root-of-trust for GC reachability. All mutations go through
//! an upsert-overwrite API: fields passed are written verbatim, including
//! empty strings (to permit field clearing) — the only value preserved
//! from an existing entry is `created_at`. This avoids the class of bugs
//! where merge semantics can't clear a field.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::FastestError;
use crate::ids::{ProjectId, SnapshotId, WorkspaceId};

/// One workspace's entry in the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub id: WorkspaceId,
    pub project_id: ProjectId,
    pub fork_snapshot_id: Option<SnapshotId>,
    pub current_snapshot_id: Option<SnapshotId>,
    pub path: PathBuf,
    pub created_at: String,
}

/// The registry's on-disk contents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct RegistryData {
    #[serde(default)]
    workspaces: Vec<WorkspaceEntry>,
    /// Snapshot IDs pinned project-wide (e.g. explicitly kept across GC),
    /// independent of any single workspace's chain.
    #[serde(default)]
    pinned_snapshots: Vec<SnapshotId>,
}

/// The project-level workspace + snapshot registry.
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the registry, or an empty one if the file does not yet exist.
    ///
    /// # Errors
    /// Returns `CorruptRegistry` if the file exists but fails to parse.
    fn load(&self) -> Result<RegistryData, FastestError> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| FastestError::CorruptRegistry {
                detail: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryData::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, data: &RegistryData) -> Result<(), FastestError> {
        let bytes = serde_json::to_vec(data).expect("RegistryData serialization cannot fail");
        crate::atomic::write_atomic(&self.path, &bytes)
    }

    /// Insert or fully overwrite a workspace entry. `created_at` is
    /// preserved from any existing entry with the same `id`; every other
    /// field is written verbatim, including empty/`None` values.
    ///
    /// # Errors
    /// Returns an error on any I/O or parse failure.
    pub fn upsert_workspace(&self, mut entry: WorkspaceEntry) -> Result<(), FastestError> {
        let mut data = self.load()?;
        if let Some(existing) = data.workspaces.iter().find(|w| w.id == entry.id) {
            entry.created_at = existing.created_at.clone();
        }
        data.workspaces.retain(|w| w.id != entry.id);
        data.workspaces.push(entry);
        self.save(&data)
    }

    /// Remove a workspace entry entirely.
    ///
    /// # Errors
    /// Returns an error on any I/O or parse failure.
    pub fn remove_workspace(&self, id: &WorkspaceId) -> Result<(), FastestError> {
        let mut data = self.load()?;
        data.workspaces.retain(|w| &w.id != id);
        self.save(&data)
    }

    /// Look up a workspace entry by ID.
    ///
    /// # Errors
    /// Returns `WorkspaceNotFound` if no such entry exists.
    pub fn get_workspace(&self, id: &WorkspaceId) -> Result<WorkspaceEntry, FastestError> {
        let data = self.load()?;
        data.workspaces
            .into_iter()
            .find(|w| &w.id == id)
            .ok_or_else(|| FastestError::WorkspaceNotFound { name: id.clone() })
    }

    /// List every registered workspace.
    ///
    /// # Errors
    /// Returns an error on any I/O or parse failure.
    pub fn list_workspaces(&self) -> Result<Vec<WorkspaceEntry>, FastestError> {
        Ok(self.load()?.workspaces)
    }

    /// Pin a snapshot project-wide, keeping it reachable independent of any
    /// workspace's chain.
    ///
    /// # Errors
    /// Returns an error on any I/O or parse failure.
    pub fn pin_snapshot(&self, id: SnapshotId) -> Result<(), FastestError> {
        let mut data = self.load()?;
        if !data.pinned_snapshots.contains(&id) {
            data.pinned_snapshots.push(id);
        }
        self.save(&data)
    }

    /// Unpin a previously pinned snapshot.
    ///
    /// # Errors
    /// Returns an error on any I/O or parse failure.
    pub fn unpin_snapshot(&self, id: &SnapshotId) -> Result<(), FastestError> {
        let mut data = self.load()?;
        data.pinned_snapshots.retain(|p| p != id);
        self.save(&data)
    }

    /// All explicitly pinned snapshot IDs.
    ///
    /// # Errors
    /// Returns an error on any I/O or parse failure.
    pub fn pinned_snapshots(&self) -> Result<Vec<SnapshotId>, FastestError> {
        Ok(self.load()?.pinned_snapshots)
    }
}
