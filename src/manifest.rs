//! File-tree manifests: build, validate, serialize, hash, diff (spec §4.3).
//!
//! A [`Manifest`] is the content-addressed description of a project tree at
//! one instant. Its hash — `hash_bytes(canonical_json(manifest))` — is what
//! a [`crate::snapshot::Snapshot`] actually points at.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FastestError;
use crate::hash::{Sha256Hex, canonical_json, hash_bytes};
use crate::ignore_match::IgnoreMatcher;

/// The manifest schema version. Bumped only if the on-disk shape changes.
pub const MANIFEST_VERSION: u32 = 1;

/// The type-dependent payload of a manifest entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File { size: u64, hash: Sha256Hex },
    Dir,
    Symlink { target: String },
}

impl EntryKind {
    const fn type_str(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Dir => "dir",
            Self::Symlink { .. } => "symlink",
        }
    }

    /// Tiebreak ordering used when two entries share a path prefix during
    /// sort (spec §4.3: "sorted by path ascending and by tiebreaker (type)
    /// for determinism").
    const fn type_order(&self) -> u8 {
        match self {
            Self::Dir => 0,
            Self::File { .. } => 1,
            Self::Symlink { .. } => 2,
        }
    }
}

/// One entry in a [`Manifest`]: a path plus its type-dependent payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    /// POSIX-separated, non-empty, must not contain `..`.
    pub path: String,
    /// POSIX permission bits (executable bit preserved).
    pub mode: u32,
    pub kind: EntryKind,
}

/// An ordered, content-addressable description of a project-root tree.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Walk `root`, skipping entries the `ignore` matcher rejects, hashing
    /// every file's bytes (inserting them into `blobs` as it goes) and
    /// recording symlink targets.
    ///
    /// # Errors
    /// Returns `TooManyFiles` if `max_files` is set and exceeded, or any
    /// I/O error encountered while walking or hashing.
    pub fn build_from_tree(
        root: &Path,
        ignore: &IgnoreMatcher,
        blobs: &crate::blob::BlobStore,
        max_files: Option<usize>,
    ) -> Result<Self, FastestError> {
        let mut entries = Vec::new();
        let mut file_count = 0usize;
        walk(root, root, ignore, blobs, &mut entries, &mut file_count, max_files)?;
        entries.sort_by(|a, b| a.path.cmp(&b.path).then(a.kind.type_order().cmp(&b.kind.type_order())));
        Ok(Self { entries })
    }

    /// Serialize to the canonical JSON form used for hashing and storage.
    #[must_use]
    pub fn to_json(&self) -> Vec<u8> {
        canonical_json(&self.to_value())
    }

    /// The manifest's content-address: `hash_bytes(canonical_json(self))`.
    #[must_use]
    pub fn hash(&self) -> Sha256Hex {
        Sha256Hex::of(&self.to_json())
    }

    fn to_value(&self) -> Value {
        let mut entries: Vec<Value> = self
            .entries
            .iter()
            .map(|e| {
                let mut obj = serde_json::Map::new();
                obj.insert("path".into(), Value::String(e.path.clone()));
                obj.insert("mode".into(), Value::Number(e.mode.into()));
                obj.insert("type".into(), Value::String(e.kind.type_str().into()));
                match &e.kind {
                    EntryKind::File { size, hash } => {
                        obj.insert("size".into(), Value::Number((*size).into()));
                        obj.insert("hash".into(), Value::String(hash.as_str().to_owned()));
                    }
                    EntryKind::Dir => {}
                    EntryKind::Symlink { target } => {
                        obj.insert("target".into(), Value::String(target.clone()));
                    }
                }
                Value::Object(obj)
            })
            .collect();
        entries.sort_by(|a, b| {
            let pa = a.get("path").and_then(Value::as_str).unwrap_or_default();
            let pb = b.get("path").and_then(Value::as_str).unwrap_or_default();
            pa.cmp(pb)
        });
        let mut root = serde_json::Map::new();
        root.insert("version".into(), Value::Number(MANIFEST_VERSION.into()));
        root.insert("entries".into(), Value::Array(entries));
        Value::Object(root)
    }

    /// Parse and strictly validate a manifest from its canonical JSON bytes.
    ///
    /// # Errors
    /// Returns `CorruptManifest` for any structural violation: non-object
    /// top level, missing/wrong-typed `version`/`entries`, empty paths,
    /// paths containing `..`, invalid or wrong-length hex hashes, unknown
    /// entry types, files missing `hash`/`size`, symlinks missing `target`,
    /// or duplicate paths.
    pub fn from_json(bytes: &[u8]) -> Result<Self, FastestError> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| FastestError::CorruptManifest {
            detail: format!("invalid JSON: {e}"),
        })?;
        let obj = value.as_object().ok_or_else(|| FastestError::CorruptManifest {
            detail: "manifest must be a JSON object".to_owned(),
        })?;
        let version = obj
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| FastestError::CorruptManifest {
                detail: "missing or non-integer 'version' field".to_owned(),
            })?;
        if version != u64::from(MANIFEST_VERSION) {
            return Err(FastestError::CorruptManifest {
                detail: format!("unsupported manifest version {version}"),
            });
        }
        let raw_entries = obj
            .get("entries")
            .and_then(Value::as_array)
            .ok_or_else(|| FastestError::CorruptManifest {
                detail: "missing or non-array 'entries' field".to_owned(),
            })?;

        let mut entries = Vec::with_capacity(raw_entries.len());
        let mut seen_paths = std::collections::HashSet::new();
        for raw in raw_entries {
            let entry = parse_entry(raw)?;
            if !seen_paths.insert(entry.path.clone()) {
                return Err(FastestError::CorruptManifest {
                    detail: format!("duplicate path {:?}", entry.path),
                });
            }
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    /// Two-way diff, keyed on path.
    #[must_use]
    pub fn diff(a: &Self, b: &Self) -> ManifestDiff {
        let a_map: BTreeMap<&str, &ManifestEntry> =
            a.entries.iter().map(|e| (e.path.as_str(), e)).collect();
        let b_map: BTreeMap<&str, &ManifestEntry> =
            b.entries.iter().map(|e| (e.path.as_str(), e)).collect();

        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut deleted = Vec::new();
        let mut unchanged = Vec::new();

        for (path, entry) in &b_map {
            match a_map.get(path) {
                None => added.push((*entry).clone()),
                Some(a_entry) => {
                    if entries_equal(a_entry, entry) {
                        unchanged.push((*entry).clone());
                    } else {
                        modified.push((*entry).clone());
                    }
                }
            }
        }
        for (path, entry) in &a_map {
            if !b_map.contains_key(path) {
                deleted.push((*entry).clone());
            }
        }
        ManifestDiff {
            added,
            modified,
            deleted,
            unchanged,
        }
    }

    /// Per-path classification against a base, for merge (spec §4.10 step 4).
    #[must_use]
    pub fn three_way_diff(base: &Self, ours: &Self, theirs: &Self) -> ThreeWayDiff {
        let base_map: BTreeMap<&str, &ManifestEntry> =
            base.entries.iter().map(|e| (e.path.as_str(), e)).collect();
        let ours_map: BTreeMap<&str, &ManifestEntry> =
            ours.entries.iter().map(|e| (e.path.as_str(), e)).collect();
        let theirs_map: BTreeMap<&str, &ManifestEntry> =
            theirs.entries.iter().map(|e| (e.path.as_str(), e)).collect();

        let mut paths: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
        paths.extend(base_map.keys());
        paths.extend(ours_map.keys());
        paths.extend(theirs_map.keys());

        let mut classifications = Vec::new();
        for path in paths {
            let b = base_map.get(path).copied();
            let o = ours_map.get(path).copied();
            let t = theirs_map.get(path).copied();
            let class = classify(b, o, t);
            classifications.push((path.to_owned(), class));
        }
        ThreeWayDiff { classifications }
    }
}

fn entries_equal(a: &ManifestEntry, b: &ManifestEntry) -> bool {
    a.mode == b.mode && a.kind == b.kind
}

/// The classification of one path under a three-way merge (spec §4.10).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThreeWayClass {
    /// Identical (or absent) across base/ours/theirs.
    BothSame,
    /// `ours == base`, theirs differs: take theirs.
    TheirsChanged,
    /// `theirs == base`, ours differs: keep ours.
    OursChanged,
    /// `ours == theirs`, both differ from base: convergent edit.
    BothSameChange,
    /// All three differ: conflict.
    Conflict,
}

fn classify(
    base: Option<&ManifestEntry>,
    ours: Option<&ManifestEntry>,
    theirs: Option<&ManifestEntry>,
) -> ThreeWayClass {
    let base_eq_ours = entries_opt_equal(base, ours);
    let base_eq_theirs = entries_opt_equal(base, theirs);
    let ours_eq_theirs = entries_opt_equal(ours, theirs);

    if base_eq_ours && base_eq_theirs {
        ThreeWayClass::BothSame
    } else if base_eq_ours {
        ThreeWayClass::TheirsChanged
    } else if base_eq_theirs {
        ThreeWayClass::OursChanged
    } else if ours_eq_theirs {
        ThreeWayClass::BothSameChange
    } else {
        ThreeWayClass::Conflict
    }
}

fn entries_opt_equal(a: Option<&ManifestEntry>, b: Option<&ManifestEntry>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => entries_equal(a, b),
        _ => false,
    }
}

/// The per-path classification result of [`Manifest::three_way_diff`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreeWayDiff {
    pub classifications: Vec<(String, ThreeWayClass)>,
}

/// The result of [`Manifest::diff`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ManifestDiff {
    pub added: Vec<ManifestEntry>,
    pub modified: Vec<ManifestEntry>,
    pub deleted: Vec<ManifestEntry>,
    pub unchanged: Vec<ManifestEntry>,
}

impl Serialize for ManifestEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("path", &self.path)?;
        map.serialize_entry("mode", &self.mode)?;
        map.serialize_entry("type", self.kind.type_str())?;
        match &self.kind {
            EntryKind::File { size, hash } => {
                map.serialize_entry("size", size)?;
                map.serialize_entry("hash", hash.as_str())?;
            }
            EntryKind::Dir => {}
            EntryKind::Symlink { target } => {
                map.serialize_entry("target", target)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ManifestEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        parse_entry(&value).map_err(serde::de::Error::custom)
    }
}

fn parse_entry(raw: &Value) -> Result<ManifestEntry, FastestError> {
    let obj = raw.as_object().ok_or_else(|| FastestError::CorruptManifest {
        detail: "entry must be a JSON object".to_owned(),
    })?;
    let path = obj
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| FastestError::CorruptManifest {
            detail: "entry missing string 'path'".to_owned(),
        })?;
    validate_path(path)?;
    let mode = obj
        .get("mode")
        .and_then(Value::as_u64)
        .ok_or_else(|| FastestError::CorruptManifest {
            detail: format!("entry {path:?} missing or non-integer 'mode'"),
        })? as u32;
    let type_str = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| FastestError::CorruptManifest {
            detail: format!("entry {path:?} missing string 'type'"),
        })?;
    let kind = match type_str {
        "file" => {
            let size = obj
                .get("size")
                .and_then(Value::as_u64)
                .ok_or_else(|| FastestError::CorruptManifest {
                    detail: format!("file entry {path:?} missing 'size'"),
                })?;
            let hash_str = obj
                .get("hash")
                .and_then(Value::as_str)
                .ok_or_else(|| FastestError::CorruptManifest {
                    detail: format!("file entry {path:?} missing 'hash'"),
                })?;
            let hash = Sha256Hex::new(hash_str).map_err(|e| FastestError::CorruptManifest {
                detail: format!("file entry {path:?} has invalid hash: {e}"),
            })?;
            EntryKind::File { size, hash }
        }
        "dir" => EntryKind::Dir,
        "symlink" => {
            let target = obj
                .get("target")
                .and_then(Value::as_str)
                .ok_or_else(|| FastestError::CorruptManifest {
                    detail: format!("symlink entry {path:?} missing 'target'"),
                })?;
            if target.is_empty() {
                return Err(FastestError::CorruptManifest {
                    detail: format!("symlink entry {path:?} has empty target"),
                });
            }
            EntryKind::Symlink {
                target: target.to_owned(),
            }
        }
        other => {
            return Err(FastestError::CorruptManifest {
                detail: format!("entry {path:?} has unknown type {other:?}"),
            });
        }
    };
    Ok(ManifestEntry {
        path: path.to_owned(),
        mode,
        kind,
    })
}

fn validate_path(path: &str) -> Result<(), FastestError> {
    if path.is_empty() {
        return Err(FastestError::InvalidPath {
            path: path.to_owned(),
            reason: "path must not be empty".to_owned(),
        });
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(FastestError::InvalidPath {
            path: path.to_owned(),
            reason: "path must not contain '..'".to_owned(),
        });
    }
    if path.starts_with('/') {
        return Err(FastestError::InvalidPath {
            path: path.to_owned(),
            reason: "path must be relative (no leading '/')".to_owned(),
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn walk(
    project_root: &Path,
    dir: &Path,
    ignore: &IgnoreMatcher,
    blobs: &crate::blob::BlobStore,
    entries: &mut Vec<ManifestEntry>,
    file_count: &mut usize,
    max_files: Option<usize>,
) -> Result<(), FastestError> {
    let mut children: Vec<fs::DirEntry> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    children.sort_by_key(std::fs::DirEntry::file_name);

    for child in children {
        let abs_path = child.path();
        let rel_path = abs_path
            .strip_prefix(project_root)
            .unwrap_or(&abs_path)
            .to_owned();
        let rel_str = path_to_posix(&rel_path);

        let file_type = child.file_type()?;
        let is_dir = file_type.is_dir();
        if ignore.is_ignored(&rel_path, is_dir) {
            continue;
        }

        if file_type.is_symlink() {
            let target = fs::read_link(&abs_path)?;
            let target_str = path_to_posix(&target);
            let meta = fs::symlink_metadata(&abs_path)?;
            entries.push(ManifestEntry {
                path: rel_str,
                mode: meta.permissions().mode() & 0o7777,
                kind: EntryKind::Symlink { target: target_str },
            });
        } else if is_dir {
            entries.push(ManifestEntry {
                path: rel_str,
                mode: child.metadata()?.permissions().mode() & 0o7777,
                kind: EntryKind::Dir,
            });
            walk(project_root, &abs_path, ignore, blobs, entries, file_count, max_files)?;
        } else {
            *file_count += 1;
            if let Some(limit) = max_files {
                if *file_count > limit {
                    return Err(FastestError::TooManyFiles {
                        count: *file_count,
                        limit,
                    });
                }
            }
            let bytes = fs::read(&abs_path)?;
            let hash = blobs.insert(&bytes)?;
            let meta = child.metadata()?;
            entries.push(ManifestEntry {
                path: rel_str,
                mode: meta.permissions().mode() & 0o7777,
                kind: EntryKind::File {
                    size: meta.size(),
                    hash,
                },
            });
        }
    }
    Ok(())
}

fn path_to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Sanity helper used by `snapshot`/`workspace`: hash raw bytes directly
/// without a `Manifest` wrapper (symlink targets, conflict markers, etc).
#[must_use]
pub fn hash_raw(bytes: &[u8]) -> String {
    hash_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_entry(path: &str, content: &[u8]) -> ManifestEntry {
        ManifestEntry {
            path: path.to_owned(),
            mode: 0o644,
            kind: EntryKind::File {
                size: content.len() as u64,
                hash: Sha256Hex::of(content),
            },
        }
    }

    #[test]
    fn to_json_sorts_by_path() {
        let m = Manifest {
            entries: vec![file_entry("b.txt", b"b"), file_entry("a.txt", b"a")],
        };
        let json = String::from_utf8(m.to_json()).unwrap();
        assert!(json.find("a.txt").unwrap() < json.find("b.txt").unwrap());
    }

    #[test]
    fn hash_is_stable_regardless_of_entry_order() {
        let m1 = Manifest {
            entries: vec![file_entry("a.txt", b"a"), file_entry("b.txt", b"b")],
        };
        let m2 = Manifest {
            entries: vec![file_entry("b.txt", b"b"), file_entry("a.txt", b"a")],
        };
        assert_eq!(m1.hash(), m2.hash());
    }

    #[test]
    fn from_json_roundtrips() {
        let m = Manifest {
            entries: vec![file_entry("a.txt", b"hello")],
        };
        let bytes = m.to_json();
        let parsed = Manifest::from_json(&bytes).unwrap();
        assert_eq!(parsed, m);
    }

    #[test]
    fn build_from_tree_records_permission_bits_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let blobs = crate::blob::BlobStore::open(dir.path().join("blobs")).unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(&root).unwrap();
        let file_path = root.join("a.txt");
        fs::write(&file_path, b"hi").unwrap();
        fs::set_permissions(&file_path, fs::Permissions::from_mode(0o644)).unwrap();

        let ignore = crate::ignore_match::IgnoreMatcher::none();
        let manifest = Manifest::build_from_tree(&root, &ignore, &blobs, None).unwrap();

        let entry = manifest.entries.iter().find(|e| e.path == "a.txt").unwrap();
        // `st_mode` carries file-type bits (e.g. 0o100644 for a regular
        // file); only the low 12 permission bits belong in the manifest.
        assert_eq!(entry.mode, 0o644);
        assert!(entry.mode <= 0o7777);
    }

    #[test]
    fn from_json_rejects_empty_path() {
        let bad = br#"{"version":1,"entries":[{"path":"","mode":420,"type":"dir"}]}"#;
        assert!(Manifest::from_json(bad).is_err());
    }

    #[test]
    fn from_json_rejects_dotdot_path() {
        let bad = br#"{"version":1,"entries":[{"path":"../etc/passwd","mode":420,"type":"dir"}]}"#;
        assert!(Manifest::from_json(bad).is_err());
    }

    #[test]
    fn from_json_rejects_bad_hash_length() {
        let bad = br#"{"version":1,"entries":[{"path":"a","mode":420,"type":"file","size":1,"hash":"abc"}]}"#;
        assert!(Manifest::from_json(bad).is_err());
    }

    #[test]
    fn from_json_rejects_unknown_type() {
        let bad = br#"{"version":1,"entries":[{"path":"a","mode":420,"type":"pipe"}]}"#;
        assert!(Manifest::from_json(bad).is_err());
    }

    #[test]
    fn from_json_rejects_missing_symlink_target() {
        let bad = br#"{"version":1,"entries":[{"path":"a","mode":420,"type":"symlink"}]}"#;
        assert!(Manifest::from_json(bad).is_err());
    }

    #[test]
    fn from_json_rejects_duplicate_paths() {
        let bad = br#"{"version":1,"entries":[
            {"path":"a","mode":420,"type":"dir"},
            {"path":"a","mode":420,"type":"dir"}
        ]}"#;
        assert!(Manifest::from_json(bad).is_err());
    }

    #[test]
    fn diff_detects_added_modified_deleted_unchanged() {
        let a = Manifest {
            entries: vec![
                file_entry("same.txt", b"x"),
                file_entry("changed.txt", b"old"),
                file_entry("gone.txt", b"bye"),
            ],
        };
        let b = Manifest {
            entries: vec![
                file_entry("same.txt", b"x"),
                file_entry("changed.txt", b"new"),
                file_entry("new.txt", b"hi"),
            ],
        };
        let diff = Manifest::diff(&a, &b);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].path, "new.txt");
        assert_eq!(diff.modified.len(), 1);
        assert_eq!(diff.modified[0].path, "changed.txt");
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(diff.deleted[0].path, "gone.txt");
        assert_eq!(diff.unchanged.len(), 1);
    }

    #[test]
    fn three_way_diff_classifies_all_cases() {
        let base = Manifest {
            entries: vec![
                file_entry("same.txt", b"x"),
                file_entry("ours_changed.txt", b"base"),
                file_entry("theirs_changed.txt", b"base"),
                file_entry("both_same.txt", b"base"),
                file_entry("conflict.txt", b"base"),
            ],
        };
        let ours = Manifest {
            entries: vec![
                file_entry("same.txt", b"x"),
                file_entry("ours_changed.txt", b"ours"),
                file_entry("theirs_changed.txt", b"base"),
                file_entry("both_same.txt", b"convergent"),
                file_entry("conflict.txt", b"ours"),
            ],
        };
        let theirs = Manifest {
            entries: vec![
                file_entry("same.txt", b"x"),
                file_entry("ours_changed.txt", b"base"),
                file_entry("theirs_changed.txt", b"theirs"),
                file_entry("both_same.txt", b"convergent"),
                file_entry("conflict.txt", b"theirs"),
            ],
        };
        let diff = Manifest::three_way_diff(&base, &ours, &theirs);
        let find = |p: &str| {
            diff.classifications
                .iter()
                .find(|(path, _)| path == p)
                .map(|(_, c)| c.clone())
                .unwrap()
        };
        assert_eq!(find("same.txt"), ThreeWayClass::BothSame);
        assert_eq!(find("ours_changed.txt"), ThreeWayClass::OursChanged);
        assert_eq!(find("theirs_changed.txt"), ThreeWayClass::TheirsChanged);
        assert_eq!(find("both_same.txt"), ThreeWayClass::BothSameChange);
        assert_eq!(find("conflict.txt"), ThreeWayClass::Conflict);
    }
}
