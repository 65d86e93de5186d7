//! Content-addressed blob store (spec §4.4).
//!
//! A directory under the per-user cache root, one file per blob named by
//! its SHA-256 hash. Insertion is atomic: write to a temp file in the same
//! directory, `fsync`, then `rename` onto the target path. If the target
//! already exists the temp file is discarded — insertion is idempotent and
//! does not take the project lock.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::FastestError;
use crate::hash::{Sha256Hex, hash_bytes};

/// A directory of content-addressed blobs.
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Open (creating if necessary) a blob store rooted at `dir`.
    ///
    /// # Errors
    /// Returns an error if `dir` cannot be created.
    pub fn open(dir: PathBuf) -> Result<Self, FastestError> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The platform-default location for a project's blob cache:
    /// `<cache_dir>/fastest/blobs/<project-id>`.
    #[must_use]
    pub fn default_dir(project_id: &crate::ids::ProjectId) -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("fastest")
            .join("blobs")
            .join(project_id.to_string())
    }

    /// Insert `bytes`, returning its content hash. Any I/O error aborts the
    /// caller — silent failure is forbidden.
    ///
    /// # Errors
    /// Returns an error on any I/O failure while writing or renaming.
    pub fn insert(&self, bytes: &[u8]) -> Result<Sha256Hex, FastestError> {
        let hash = Sha256Hex::new(&hash_bytes(bytes)).expect("hash_bytes always yields 64 lowercase hex chars");
        let target = self.path_for(&hash);
        if target.exists() {
            return Ok(hash);
        }
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        match tmp.persist(&target) {
            Ok(_) => Ok(hash),
            Err(e) if target.exists() => {
                drop(e);
                Ok(hash)
            }
            Err(e) => Err(FastestError::Io(e.error)),
        }
    }

    /// Read the bytes of a previously inserted blob.
    ///
    /// # Errors
    /// Returns `BlobNotFound` if no blob with this hash exists.
    pub fn read(&self, hash: &Sha256Hex) -> Result<Vec<u8>, FastestError> {
        let path = self.path_for(hash);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FastestError::BlobNotFound {
                    hash: hash.as_str().to_owned(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a blob with this hash exists.
    #[must_use]
    pub fn exists(&self, hash: &Sha256Hex) -> bool {
        self.path_for(hash).is_file()
    }

    /// All hashes currently stored, for GC's reachability sweep.
    ///
    /// # Errors
    /// Returns an error if the store directory cannot be read.
    pub fn iter_all(&self) -> Result<Vec<Sha256Hex>, FastestError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Ok(hash) = Sha256Hex::new(name) {
                out.push(hash);
            }
        }
        Ok(out)
    }

    /// Delete a blob. Used only by GC; missing blobs are not an error.
    ///
    /// # Errors
    /// Returns an error on I/O failures other than not-found.
    pub fn remove(&self, hash: &Sha256Hex) -> Result<(), FastestError> {
        match fs::remove_file(self.path_for(hash)) {
            Ok(()) | Err(_) if !self.path_for(hash).exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for(&self, hash: &Sha256Hex) -> PathBuf {
        self.dir.join(hash.as_str())
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
