//! Unified error taxonomy for the snapshot engine (spec §7).
//!
//! [`FastestError`] is the single error type every public operation returns.
//! Each variant corresponds to one row of spec.md §7's taxonomy table; the
//! policy column (surface vs. retry vs. fail-closed) is documented on the
//! variant rather than encoded in the type, since the *caller* (workspace,
//! merge engine, GC) is the one that knows whether a given `NotFound` is
//! "expected-absent" or an invariant violation.
//!
//! No variant here papers over a failure: every I/O, corruption, or lock
//! error aborts the in-progress operation. Nothing in this crate "fails
//! open".

use std::fmt;
use std::path::PathBuf;

use crate::ids::{IdError, WorkspaceId};

/// Unified error type for all snapshot-engine operations.
#[derive(Debug)]
pub enum FastestError {
    /// Disk I/O failed. The operation aborts; atomic-write discipline
    /// guarantees no partial state was left behind.
    Io(std::io::Error),

    /// A manifest file failed structural or content validation
    /// (spec §4.3 `from_json`).
    CorruptManifest { detail: String },

    /// A snapshot metadata file failed structural validation.
    CorruptSnapshot { id: String, detail: String },

    /// The project registry failed structural validation.
    CorruptRegistry { detail: String },

    /// A blob was expected to exist (referenced by a manifest) but is
    /// missing from the store. Unlike `WorkspaceNotFound`, this is always
    /// an invariant violation: a valid manifest only ever references blobs
    /// that were inserted before it was written (spec §3 Manifest
    /// invariants).
    BlobNotFound { hash: String },

    /// The requested snapshot does not exist. Two different causes are
    /// merged deliberately: a caller passing a stale/typo'd ID, or GC
    /// having swept an orphan after a crash (spec §7 `NotFound` note).
    /// Callers that can tell the difference from context should do so.
    SnapshotNotFound { id: String },

    /// A workspace with this name already exists.
    WorkspaceExists { name: WorkspaceId },

    /// The requested workspace does not exist.
    WorkspaceNotFound { name: WorkspaceId },

    /// A workspace's on-disk config or lock state is corrupted.
    WorkspaceCorrupted { name: WorkspaceId, detail: String },

    /// A workspace name failed validation.
    InvalidWorkspaceName { name: String, reason: String },

    /// A merge completed with one or more unresolved conflicts. This is
    /// not an error condition in the taxonomy sense (spec §7: "not an
    /// error, a successful outcome") — it is included here only so that
    /// call sites that want a single `Result` surface can map it to one;
    /// [`crate::merge::MergeOutcome`] is the primary way to observe it.
    UnresolvedConflicts { paths: Vec<PathBuf> },

    /// Acquiring a project or workspace lock failed outright (e.g. the
    /// platform does not support advisory locks on this path).
    Locked { detail: String },

    /// Acquiring a lock did not complete within the caller's budget.
    /// The core never silently proceeds without the lock it asked for.
    LockTimeout { detail: String },

    /// `Manifest::build_from_tree` exceeded the caller's file-count cap.
    TooManyFiles { count: usize, limit: usize },

    /// A destructive operation was refused because the working tree has
    /// uncommitted changes and the caller did not opt out.
    DirtyTree { added: usize, modified: usize, deleted: usize },

    /// A required pre-operation safety snapshot could not be taken; the
    /// destructive operation that asked for it is aborted entirely.
    PreOperationSnapshotFailed { detail: String },

    /// A configuration file could not be loaded or parsed.
    ConfigError { path: PathBuf, detail: String },

    /// A path in a manifest entry failed validation (spec §3: non-empty,
    /// POSIX-separated, must not contain `..`).
    InvalidPath { path: String, reason: String },

    /// A history rewrite action list could not be applied as given (e.g.
    /// a leading `SquashWithPrevious` with no prior kept snapshot).
    InvalidRewrite { detail: String },
}

impl fmt::Display for FastestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::CorruptManifest { detail } => write!(f, "corrupt manifest: {detail}"),
            Self::CorruptSnapshot { id, detail } => {
                write!(f, "corrupt snapshot '{id}': {detail}")
            }
            Self::CorruptRegistry { detail } => write!(f, "corrupt project registry: {detail}"),
            Self::BlobNotFound { hash } => {
                write!(
                    f,
                    "blob '{hash}' referenced by a manifest is missing from the blob store \
                     (store or manifest chain is corrupt)"
                )
            }
            Self::SnapshotNotFound { id } => write!(f, "snapshot '{id}' not found"),
            Self::WorkspaceExists { name } => write!(f, "workspace '{name}' already exists"),
            Self::WorkspaceNotFound { name } => write!(f, "workspace '{name}' not found"),
            Self::WorkspaceCorrupted { name, detail } => {
                write!(f, "workspace '{name}' is corrupted: {detail}")
            }
            Self::InvalidWorkspaceName { name, reason } => {
                write!(f, "invalid workspace name '{name}': {reason}")
            }
            Self::UnresolvedConflicts { paths } => {
                write!(f, "merge left {} file(s) unresolved:", paths.len())?;
                for p in paths {
                    write!(f, "\n  - {}", p.display())?;
                }
                Ok(())
            }
            Self::Locked { detail } => write!(f, "could not acquire lock: {detail}"),
            Self::LockTimeout { detail } => write!(f, "timed out waiting for lock: {detail}"),
            Self::TooManyFiles { count, limit } => {
                write!(f, "tree has {count} files, exceeding the cap of {limit}")
            }
            Self::DirtyTree {
                added,
                modified,
                deleted,
            } => write!(
                f,
                "working tree has uncommitted changes (+{added} ~{modified} -{deleted}); \
                 pass an explicit override to proceed anyway"
            ),
            Self::PreOperationSnapshotFailed { detail } => {
                write!(f, "required pre-operation safety snapshot failed: {detail}")
            }
            Self::ConfigError { path, detail } => {
                write!(f, "configuration error in '{}': {detail}", path.display())
            }
            Self::InvalidPath { path, reason } => {
                write!(f, "invalid manifest path {path:?}: {reason}")
            }
            Self::InvalidRewrite { detail } => write!(f, "invalid rewrite: {detail}"),
        }
    }
}

impl std::error::Error for FastestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FastestError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<IdError> for FastestError {
    fn from(err: IdError) -> Self {
        Self::InvalidWorkspaceName {
            name: err.value,
            reason: err.reason,
        }
    }
}

impl From<crate::hash::HashError> for FastestError {
    fn from(err: crate::hash::HashError) -> Self {
        Self::CorruptManifest {
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_blob_not_found_mentions_corruption() {
        let err = FastestError::BlobNotFound {
            hash: "a".repeat(64),
        };
        let msg = format!("{err}");
        assert!(msg.contains(&"a".repeat(64)));
        assert!(msg.contains("corrupt"));
    }

    #[test]
    fn display_unresolved_conflicts_lists_paths() {
        let err = FastestError::UnresolvedConflicts {
            paths: vec![PathBuf::from("a.rs"), PathBuf::from("b.rs")],
        };
        let msg = format!("{err}");
        assert!(msg.contains("2 file(s)"));
        assert!(msg.contains("a.rs"));
        assert!(msg.contains("b.rs"));
    }

    #[test]
    fn display_dirty_tree_includes_counts() {
        let err = FastestError::DirtyTree {
            added: 1,
            modified: 2,
            deleted: 3,
        };
        let msg = format!("{err}");
        assert!(msg.contains("+1"));
        assert!(msg.contains("~2"));
        assert!(msg.contains("-3"));
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::other("disk full");
        let err: FastestError = io_err.into();
        assert!(matches!(err, FastestError::Io(_)));
    }

    #[test]
    fn error_source_io_is_some() {
        let err = FastestError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_source_non_io_is_none() {
        let err = FastestError::SnapshotNotFound { id: "x".into() };
        assert!(std::error::Error::source(&err).is_none());
    }
}
