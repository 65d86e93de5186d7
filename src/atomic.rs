//! The write-temp + fsync + rename discipline (spec §4.4, §5), shared by
//! every component that persists JSON metadata: manifests, snapshots,
//! workspace config, the registry, the merge-parents file.
//!
//! No component in this crate writes a metadata file with `fs::write`
//! directly — a crash mid-write must never leave a half-written file where
//! a reader expects a complete one.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::FastestError;

/// Atomically replace the contents of `path` with `bytes`.
///
/// Writes to a temp file in `path`'s parent directory, `fsync`s it, then
/// renames onto `path`. Renaming within the same filesystem is atomic, so a
/// reader of `path` always sees either the old complete contents or the new
/// complete contents, never a partial write.
///
/// # Errors
/// Returns an error on any I/O failure. No partial state is left behind:
/// either the rename happens or `path` is untouched.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FastestError> {
    let parent = path.parent().ok_or_else(|| FastestError::Io(std::io::Error::other(
        format!("{} has no parent directory", path.display()),
    )))?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| FastestError::Io(e.error))?;
    sync_dir(parent)?;
    Ok(())
}

/// Best-effort directory-entry fsync after a rename, so the rename itself
/// is durable across a crash (not just the file contents). Not supported on
/// all platforms; failures here are not fatal since the rename already
/// completed.
fn sync_dir(dir: &Path) -> Result<(), FastestError> {
    match File::open(dir) {
        Ok(f) => {
            let _ = f.sync_all();
            Ok(())
        }
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_creates_file_with_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn write_atomic_replaces_existing_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn write_atomic_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("out.json");
        write_atomic(&path, b"x").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"x");
    }

    #[test]
    fn write_atomic_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_atomic(&path, b"x").unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().filter_map(Result::ok).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name(), "out.json");
    }
}
