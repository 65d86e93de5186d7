//! The project root: owns the blob store, snapshot store, registry, and
//! project lock (spec §3 Ownership, §9 Design Notes).
//!
//! There is no process-wide singleton holding engine state anywhere in this
//! crate — every operation is a method on a `Project` or on a `Workspace`
//! borrowed from one. Two `Project` values can coexist in the same process
//! pointed at different directories without interfering.

use std::path::{Path, PathBuf};

use crate::blob::BlobStore;
use crate::config::ProjectConfig;
use crate::error::FastestError;
use crate::ids::ProjectId;
use crate::lock::ProjectLock;
use crate::registry::Registry;
use crate::snapshot::SnapshotStore;

/// The name of the engine's metadata directory at a project root.
pub const METADATA_DIR_NAME: &str = ".fastest";

/// The file recording a project's identity (`<metadata-dir>/project.json`).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct ProjectMeta {
    id: ProjectId,
}

/// A content-addressed project: the directory owning the blob store,
/// snapshot store, manifest store, and registry shared by all of its
/// workspaces.
pub struct Project {
    root: PathBuf,
    metadata_dir: PathBuf,
    id: ProjectId,
    config: ProjectConfig,
    blobs: BlobStore,
    snapshots: SnapshotStore,
    registry: Registry,
    lock: ProjectLock,
}

impl Project {
    /// Initialize a new project at `root`. Fails if a project already
    /// exists there.
    ///
    /// # Errors
    /// Returns an error if `root`'s metadata directory already exists, or
    /// on any I/O failure creating it.
    pub fn init(root: &Path) -> Result<Self, FastestError> {
        let metadata_dir = root.join(METADATA_DIR_NAME);
        if metadata_dir.exists() {
            return Err(FastestError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already contains a project", metadata_dir.display()),
            )));
        }
        std::fs::create_dir_all(&metadata_dir)?;
        let id = ProjectId::generate();
        let meta = ProjectMeta { id };
        crate::atomic::write_atomic(
            &metadata_dir.join("project.json"),
            &serde_json::to_vec(&meta).expect("ProjectMeta serialization cannot fail"),
        )?;
        Self::open(root)
    }

    /// Open an existing project at `root`.
    ///
    /// # Errors
    /// Returns `WorkspaceCorrupted`-shaped errors if the metadata directory
    /// is missing or its identity file fails to parse, or any I/O error
    /// opening the underlying stores.
    pub fn open(root: &Path) -> Result<Self, FastestError> {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let metadata_dir = root.join(METADATA_DIR_NAME);
        let meta_bytes = std::fs::read(metadata_dir.join("project.json"))?;
        let meta: ProjectMeta = serde_json::from_slice(&meta_bytes).map_err(|e| {
            FastestError::CorruptRegistry {
                detail: format!("project.json: {e}"),
            }
        })?;
        let config = ProjectConfig::load(&metadata_dir.join("settings.toml"))?;
        let cache_dir = config
            .store
            .cache_dir
            .clone()
            .unwrap_or_else(|| BlobStore::default_dir(&meta.id));
        let blobs = BlobStore::open(cache_dir)?;
        let snapshots = SnapshotStore::open(metadata_dir.join("snapshots"))?;
        let registry = Registry::new(metadata_dir.join("registry.json"));
        let lock = ProjectLock::new(metadata_dir.join("lock"));

        std::fs::create_dir_all(metadata_dir.join("manifests"))?;
        std::fs::create_dir_all(metadata_dir.join("workspaces"))?;

        Ok(Self {
            root,
            metadata_dir,
            id: meta.id,
            config,
            blobs,
            snapshots,
            registry,
            lock,
        })
    }

    #[must_use]
    pub fn id(&self) -> ProjectId {
        self.id
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    #[must_use]
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    #[must_use]
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    #[must_use]
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn lock(&self) -> &ProjectLock {
        &self.lock
    }

    /// Path to a manifest keyed by its own hash
    /// (`<metadata-dir>/manifests/<sha256>.json`).
    #[must_use]
    pub fn manifest_path(&self, hash: &crate::hash::Sha256Hex) -> PathBuf {
        self.metadata_dir
            .join("manifests")
            .join(format!("{hash}.json"))
    }

    /// Path to a workspace's private directory
    /// (`<metadata-dir>/workspaces/<id>/`).
    #[must_use]
    pub fn workspace_dir(&self, id: &crate::ids::WorkspaceId) -> PathBuf {
        self.metadata_dir.join("workspaces").join(id.as_str())
    }

    /// Persist a manifest, keyed by its own hash, if not already present.
    ///
    /// # Errors
    /// Returns an error on any I/O failure.
    pub fn store_manifest(&self, manifest: &crate::manifest::Manifest) -> Result<crate::hash::Sha256Hex, FastestError> {
        let hash = manifest.hash();
        let path = self.manifest_path(&hash);
        if !path.exists() {
            crate::atomic::write_atomic(&path, &manifest.to_json())?;
        }
        Ok(hash)
    }

    /// Load a manifest by its hash.
    ///
    /// # Errors
    /// Returns `CorruptManifest` if the file is missing or fails to parse.
    pub fn load_manifest(&self, hash: &crate::hash::Sha256Hex) -> Result<crate::manifest::Manifest, FastestError> {
        let path = self.manifest_path(hash);
        let bytes = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FastestError::CorruptManifest {
                    detail: format!("manifest {hash} referenced but missing from store"),
                }
            } else {
                FastestError::Io(e)
            }
        })?;
        crate::manifest::Manifest::from_json(&bytes)
    }

    /// All manifest hashes currently stored, for GC's reachability sweep.
    ///
    /// # Errors
    /// Returns an error if the manifests directory cannot be read.
    pub fn list_manifest_hashes(&self) -> Result<Vec<crate::hash::Sha256Hex>, FastestError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(self.metadata_dir.join("manifests"))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(hash) = crate::hash::Sha256Hex::new(stem) {
                out.push(hash);
            }
        }
        Ok(out)
    }

    /// Delete a manifest file. Used only by GC; missing files are not an
    /// error.
    ///
    /// # Errors
    /// Returns an error on I/O failures other than not-found.
    pub fn remove_manifest(&self, hash: &crate::hash::Sha256Hex) -> Result<(), FastestError> {
        match std::fs::remove_file(self.manifest_path(hash)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_open_roundtrips_identity() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::init(dir.path()).unwrap();
        let id = project.id();
        drop(project);
        let reopened = Project::open(dir.path()).unwrap();
        assert_eq!(reopened.id(), id);
    }

    #[test]
    fn init_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        Project::init(dir.path()).unwrap();
        assert!(Project::init(dir.path()).is_err());
    }

    #[test]
    fn store_and_load_manifest_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::init(dir.path()).unwrap();
        let manifest = crate::manifest::Manifest::default();
        let hash = project.store_manifest(&manifest).unwrap();
        let loaded = project.load_manifest(&hash).unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn load_missing_manifest_errors() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::init(dir.path()).unwrap();
        let bogus = crate::hash::Sha256Hex::of(b"nothing stored");
        assert!(matches!(
            project.load_manifest(&bogus),
            Err(FastestError::CorruptManifest { .. })
        ));
    }

    #[test]
    fn metadata_directory_layout_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::init(dir.path()).unwrap();
        assert!(project.metadata_dir().join("manifests").is_dir());
        assert!(project.metadata_dir().join("snapshots").is_dir());
        assert!(project.metadata_dir().join("workspaces").is_dir());
    }
}
