//! Identifiers for snapshots, workspaces, and projects (spec §3, §4.1).
//!
//! `SnapshotId` is a ULID: sortable by creation time, which every reader of
//! the snapshot chain relies on. `WorkspaceId` is a validated human-chosen
//! name, unique within a project. `ProjectId` is a ULID assigned once at
//! `init` and never reused, so the blob cache can be keyed by it without
//! colliding across two projects that happen to share a directory name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A validation error for an ID newtype.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdError {
    pub kind: &'static str,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?} — {}", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for IdError {}

/// Build a `Ulid` newtype with the shared `Display`/`FromStr`/serde glue.
///
/// ULID canonical string form is fixed as the crate default (Crockford
/// base32, uppercase); every reader compares ULID strings byte-for-byte
/// without case-folding (spec.md §4.1).
macro_rules! ulid_newtype {
    ($name:ident, $kind:literal) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a fresh, time-ordered identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Parse a canonical ULID string.
            ///
            /// # Errors
            /// Returns an error if `s` is not a well-formed ULID.
            pub fn parse(s: &str) -> Result<Self, IdError> {
                Ulid::from_string(s)
                    .map(Self)
                    .map_err(|e| IdError {
                        kind: $kind,
                        value: s.to_owned(),
                        reason: e.to_string(),
                    })
            }

            #[must_use]
            pub fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(&s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

ulid_newtype!(SnapshotId, "SnapshotId");
ulid_newtype!(ProjectId, "ProjectId");

/// A validated workspace identifier: unique within a project, 1–64 ASCII
/// characters, lowercase alphanumeric with single hyphens as separators.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub const MAX_LEN: usize = 64;

    /// Create a new `WorkspaceId`, validating format.
    ///
    /// # Errors
    /// Returns an error if the name is empty, too long, or contains
    /// characters other than lowercase ASCII letters, digits, and hyphens.
    pub fn new(s: &str) -> Result<Self, IdError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), IdError> {
        let err = |reason: &str| IdError {
            kind: "WorkspaceId",
            value: s.to_owned(),
            reason: reason.to_owned(),
        };
        if s.is_empty() {
            return Err(err("workspace name must not be empty"));
        }
        if s.len() > Self::MAX_LEN {
            return Err(err(&format!(
                "workspace name must be at most {} characters, got {}",
                Self::MAX_LEN,
                s.len()
            )));
        }
        if s.starts_with('-') || s.ends_with('-') {
            return Err(err("workspace name must not start or end with a hyphen"));
        }
        if !s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            return Err(err(
                "workspace name must contain only lowercase letters, digits, and hyphens",
            ));
        }
        if s.contains("--") {
            return Err(err("workspace name must not contain consecutive hyphens"));
        }
        Ok(())
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkspaceId {
    type Err = IdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for WorkspaceId {
    type Error = IdError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<WorkspaceId> for String {
    fn from(id: WorkspaceId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_ids_are_lexicographically_sortable_by_creation_order() {
        let a = SnapshotId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = SnapshotId::generate();
        assert!(a.to_string() <= b.to_string());
    }

    #[test]
    fn snapshot_id_roundtrips_through_serde() {
        let id = SnapshotId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let decoded: SnapshotId = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn snapshot_id_rejects_malformed_string() {
        assert!(SnapshotId::parse("not-a-ulid").is_err());
    }

    #[test]
    fn workspace_id_valid() {
        assert!(WorkspaceId::new("agent-1").is_ok());
        assert!(WorkspaceId::new("main").is_ok());
    }

    #[test]
    fn workspace_id_rejects_uppercase() {
        assert!(WorkspaceId::new("Agent").is_err());
    }

    #[test]
    fn workspace_id_rejects_consecutive_hyphens() {
        assert!(WorkspaceId::new("a--b").is_err());
    }

    #[test]
    fn workspace_id_rejects_leading_trailing_hyphen() {
        assert!(WorkspaceId::new("-a").is_err());
        assert!(WorkspaceId::new("a-").is_err());
    }

    #[test]
    fn workspace_id_rejects_empty_and_too_long() {
        assert!(WorkspaceId::new("").is_err());
        let long = "a".repeat(65);
        assert!(WorkspaceId::new(&long).is_err());
    }

    #[test]
    fn workspace_id_serde_rejects_invalid() {
        let json = "\"BAD NAME\"";
        assert!(serde_json::from_str::<WorkspaceId>(json).is_err());
    }
}
