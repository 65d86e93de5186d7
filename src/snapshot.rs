//! Immutable snapshot metadata chain (spec §4.5).
//!
//! Each snapshot is a JSON file named by its ULID `id`. Snapshots are
//! addressed by `id`, not content, so two identical manifests may yield
//! distinct snapshots.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::FastestError;
use crate::hash::Sha256Hex;
use crate::ids::SnapshotId;

/// An immutable record of a project tree at one instant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub manifest_hash: Sha256Hex,
    /// Empty for a root snapshot, one for a normal commit, ≥2 for a merge.
    pub parent_ids: Vec<SnapshotId>,
    pub message: String,
    pub author: Option<String>,
    /// RFC-3339 timestamp.
    pub created_at: String,
}

/// The directory of snapshot metadata files (`<metadata-dir>/snapshots`).
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open (creating if necessary) a snapshot store rooted at `dir`.
    ///
    /// # Errors
    /// Returns an error if `dir` cannot be created.
    pub fn open(dir: PathBuf) -> Result<Self, FastestError> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Create and atomically persist a new snapshot.
    ///
    /// # Errors
    /// Returns an error on any I/O failure while writing.
    pub fn create(
        &self,
        manifest_hash: Sha256Hex,
        parent_ids: Vec<SnapshotId>,
        message: String,
        author: Option<String>,
    ) -> Result<Snapshot, FastestError> {
        let snapshot = Snapshot {
            id: SnapshotId::generate(),
            manifest_hash,
            parent_ids,
            message,
            author,
            created_at: rfc3339_now(),
        };
        self.write(&snapshot)?;
        Ok(snapshot)
    }

    /// Persist an already-constructed snapshot (used by history rewrite,
    /// which mints new IDs for an existing chain's content).
    ///
    /// # Errors
    /// Returns an error on any I/O failure while writing.
    pub fn write(&self, snapshot: &Snapshot) -> Result<(), FastestError> {
        let bytes = serde_json::to_vec(snapshot).expect("Snapshot serialization cannot fail");
        crate::atomic::write_atomic(&self.path_for(&snapshot.id), &bytes)?;
        Ok(())
    }

    /// Look up a snapshot by ID.
    ///
    /// # Errors
    /// Returns `SnapshotNotFound` if no such snapshot exists, or
    /// `CorruptSnapshot` if the file exists but fails to parse.
    pub fn get(&self, id: &SnapshotId) -> Result<Snapshot, FastestError> {
        let path = self.path_for(id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FastestError::SnapshotNotFound { id: id.to_string() });
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| FastestError::CorruptSnapshot {
            id: id.to_string(),
            detail: e.to_string(),
        })
    }

    #[must_use]
    pub fn exists(&self, id: &SnapshotId) -> bool {
        self.path_for(id).is_file()
    }

    /// Delete a snapshot's metadata file. Used only by GC.
    ///
    /// # Errors
    /// Returns an error on I/O failures other than not-found.
    pub fn remove(&self, id: &SnapshotId) -> Result<(), FastestError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All snapshot IDs currently stored, for GC's reachability sweep.
    ///
    /// # Errors
    /// Returns an error if the store directory cannot be read.
    pub fn iter_all(&self) -> Result<Vec<SnapshotId>, FastestError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let stem = entry.path();
            let Some(stem) = stem.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(id) = SnapshotId::parse(stem) {
                out.push(id);
            }
        }
        Ok(out)
    }

    /// Lazy BFS walk of `id`'s ancestors, following `parent_ids`. Cycles
    /// are impossible by construction (a snapshot's parents are always
    /// created before it) but are defended against via a visited set.
    ///
    /// # Errors
    /// Returns an error if any ancestor fails to load.
    pub fn ancestors(&self, id: &SnapshotId) -> Result<Vec<Snapshot>, FastestError> {
        let mut visited = HashSet::new();
        let mut queue = vec![id.clone()];
        let mut out = Vec::new();
        while let Some(next) = queue.pop() {
            if !visited.insert(next.clone()) {
                continue;
            }
            let snapshot = self.get(&next)?;
            for parent in &snapshot.parent_ids {
                if !visited.contains(parent) {
                    queue.push(parent.clone());
                }
            }
            out.push(snapshot);
        }
        Ok(out)
    }

    /// The lowest common ancestor of `a` and `b`, found by walking both
    /// chains and intersecting visited sets. Ties broken by (a) most
    /// recent `created_at`, (b) lexicographic `id` — deterministic and
    /// mandatory (spec §4.10 step 1).
    ///
    /// # Errors
    /// Returns an error if either chain fails to load.
    pub fn merge_base(
        &self,
        a: &SnapshotId,
        b: &SnapshotId,
    ) -> Result<Option<Snapshot>, FastestError> {
        let a_ancestors = self.ancestors(a)?;
        let b_ancestors = self.ancestors(b)?;
        let b_ids: HashSet<&SnapshotId> = b_ancestors.iter().map(|s| &s.id).collect();

        let mut candidates: Vec<&Snapshot> =
            a_ancestors.iter().filter(|s| b_ids.contains(&s.id)).collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        candidates.sort_by(|x, y| y.created_at.cmp(&x.created_at).then(x.id.cmp(&y.id)));
        Ok(candidates.first().map(|s| (*s).clone()))
    }

    fn path_for(&self, id: &SnapshotId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

pub(crate) fn rfc3339_now() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch");
    humantime_rfc3339(now.as_secs(), now.subsec_nanos())
}

/// Minimal RFC-3339 (UTC, second precision) formatter so this crate does not
/// need a full datetime dependency for a single timestamp field.
fn humantime_rfc3339(secs: u64, _nanos: u32) -> String {
    let days_since_epoch = secs / 86400;
    let secs_of_day = secs % 86400;
    let (year, month, day) = civil_from_days(days_since_epoch as i64);
    let hour = secs_of_day / 3600;
    let minute = (secs_of_day % 3600) / 60;
    let second = secs_of_day % 60;
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}Z")
}

/// Howard Hinnant's civil-from-days algorithm (proleptic Gregorian, days
/// since 1970-01-01).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}
