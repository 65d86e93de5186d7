//! Gitignore-style pattern matching (spec §4.2).
//!
//! Combines a hard default set (the engine's own metadata directory, common
//! build outputs, editor junk) with an optional project-root ignore file.
//! Directory-pruning is the tree walker's job (see [`crate::manifest`]); this
//! module only answers "does this path match".

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::error::FastestError;

/// Patterns applied to every project regardless of configuration.
///
/// `.fastest/` is the engine's own metadata directory; a tree walk must
/// never try to hash its own bookkeeping files as working-tree content.
const HARD_DEFAULTS: &[&str] = &[
    ".git/",
    ".fastest/",
    "target/",
    "node_modules/",
    "*.swp",
    ".DS_Store",
];

/// Combines the hard defaults with an optional project ignore file.
pub struct IgnoreMatcher {
    inner: Gitignore,
}

impl IgnoreMatcher {
    /// Build a matcher for `root`, reading `ignore_file_name` from the
    /// project root if it exists (e.g. `.fastestignore`).
    ///
    /// # Errors
    /// Returns an error if the ignore file exists but contains a pattern
    /// `ignore` cannot parse.
    pub fn build(root: &Path, ignore_file_name: &str) -> Result<Self, FastestError> {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in HARD_DEFAULTS {
            builder.add_line(None, pattern).map_err(|e| {
                FastestError::CorruptManifest {
                    detail: format!("invalid built-in ignore pattern {pattern:?}: {e}"),
                }
            })?;
        }
        let custom_path = root.join(ignore_file_name);
        if custom_path.is_file() {
            if let Some(err) = builder.add(&custom_path) {
                return Err(FastestError::CorruptManifest {
                    detail: format!("invalid pattern in {}: {err}", custom_path.display()),
                });
            }
        }
        let inner = builder.build().map_err(|e| FastestError::CorruptManifest {
            detail: format!("failed to build ignore matcher: {e}"),
        })?;
        Ok(Self { inner })
    }

    /// An empty matcher: nothing is ignored beyond what a caller explicitly
    /// passes to [`Self::build`]. Useful for `restore`-style walks over
    /// already-materialized, trusted trees.
    #[must_use]
    pub fn none() -> Self {
        Self {
            inner: Gitignore::empty(),
        }
    }

    /// Returns `true` if `path` (relative to the matcher's root) should be
    /// skipped. `is_dir` affects trailing-slash pattern semantics.
    #[must_use]
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        self.inner.matched(path, is_dir).is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn ignores_git_directory() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = IgnoreMatcher::build(dir.path(), ".fastestignore").unwrap();
        assert!(matcher.is_ignored(Path::new(".git"), true));
    }

    #[test]
    fn ignores_metadata_directory() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = IgnoreMatcher::build(dir.path(), ".fastestignore").unwrap();
        assert!(matcher.is_ignored(Path::new(".fastest"), true));
    }

    #[test]
    fn ignores_target_directory() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = IgnoreMatcher::build(dir.path(), ".fastestignore").unwrap();
        assert!(matcher.is_ignored(Path::new("target"), true));
    }

    #[test]
    fn does_not_ignore_ordinary_file() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = IgnoreMatcher::build(dir.path(), ".fastestignore").unwrap();
        assert!(!matcher.is_ignored(Path::new("src/main.rs"), false));
    }

    #[test]
    fn custom_ignore_file_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".fastestignore"), "*.log\nbuild/\n").unwrap();
        let matcher = IgnoreMatcher::build(dir.path(), ".fastestignore").unwrap();
        assert!(matcher.is_ignored(Path::new("debug.log"), false));
        assert!(matcher.is_ignored(Path::new("build"), true));
        assert!(!matcher.is_ignored(Path::new("debug.log.txt"), false));
    }

    #[test]
    fn negation_pattern_unignores() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".fastestignore"), "*.log\n!keep.log\n").unwrap();
        let matcher = IgnoreMatcher::build(dir.path(), ".fastestignore").unwrap();
        assert!(matcher.is_ignored(Path::new("debug.log"), false));
        assert!(!matcher.is_ignored(Path::new("keep.log"), false));
    }

    #[test]
    fn missing_custom_ignore_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = IgnoreMatcher::build(dir.path(), ".fastestignore");
        assert!(matcher.is_ok());
    }

    #[test]
    fn none_matcher_ignores_nothing() {
        let matcher = IgnoreMatcher::none();
        assert!(!matcher.is_ignored(Path::new(".git"), true));
    }

    #[test]
    fn anchored_pattern_only_matches_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".fastestignore"), "/only-root.txt\n").unwrap();
        let matcher = IgnoreMatcher::build(dir.path(), ".fastestignore").unwrap();
        assert!(matcher.is_ignored(Path::new("only-root.txt"), false));
        assert!(!matcher.is_ignored(Path::new("nested/only-root.txt"), false));
    }
}
