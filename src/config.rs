//! Project-level tunable settings (`.fastest/settings.toml`).
//!
//! Distinct from a workspace's `config.json` (see [`crate::workspace`]),
//! which is *state* (fork/current snapshot, pending merge parents) rather
//! than user-chosen settings. This file holds the handful of knobs a user
//! may want to override: the ignore file name, the manifest file-count
//! cap, and the blob cache location. Missing file → all defaults.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level project configuration.
///
/// Parsed from `<metadata-dir>/settings.toml`. Missing fields use sensible
/// defaults. Missing file → all defaults (no error).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
#[derive(Default)]
pub struct ProjectConfig {
    /// Tree-walking / ignore-matching settings.
    #[serde(default)]
    pub tree: TreeConfig,

    /// Blob/manifest storage settings.
    #[serde(default)]
    pub store: StoreConfig,
}

// ---------------------------------------------------------------------------
// TreeConfig
// ---------------------------------------------------------------------------

/// Settings controlling `build_from_tree`'s walk.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeConfig {
    /// Name of the project-root ignore file, beyond the hard defaults
    /// (`.git/`, the metadata directory, `target/`, `node_modules/`,
    /// `*.swp`, `.DS_Store`).
    #[serde(default = "default_ignore_file")]
    pub ignore_file: String,

    /// Maximum number of files `build_from_tree` will accept before
    /// failing with `TooManyFiles`. `None` means unbounded.
    #[serde(default)]
    pub max_files: Option<usize>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            ignore_file: default_ignore_file(),
            max_files: None,
        }
    }
}

fn default_ignore_file() -> String {
    ".fastestignore".to_owned()
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Settings controlling where content-addressed data lives on disk.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
#[derive(Default)]
pub struct StoreConfig {
    /// Override for the blob cache root. `None` uses the platform cache
    /// directory (`dirs::cache_dir()/fastest/blobs/<project-id>`).
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a project configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded, if available.
    pub path: Option<PathBuf>,
    /// Human-readable message, with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::error::FastestError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError {
            path: err.path.unwrap_or_default(),
            detail: err.message,
        }
    }
}

impl ProjectConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_fields() {
        let cfg = ProjectConfig::default();
        assert_eq!(cfg.tree.ignore_file, ".fastestignore");
        assert_eq!(cfg.tree.max_files, None);
        assert_eq!(cfg.store.cache_dir, None);
    }

    #[test]
    fn parse_empty_string() {
        let cfg = ProjectConfig::parse("").unwrap();
        assert_eq!(cfg, ProjectConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[tree]
ignore_file = ".ignore"
max_files = 10000

[store]
cache_dir = "/tmp/fastest-cache"
"#;
        let cfg = ProjectConfig::parse(toml).unwrap();
        assert_eq!(cfg.tree.ignore_file, ".ignore");
        assert_eq!(cfg.tree.max_files, Some(10000));
        assert_eq!(cfg.store.cache_dir, Some(PathBuf::from("/tmp/fastest-cache")));
    }

    #[test]
    fn parse_partial_config_uses_defaults() {
        let toml = r#"
[tree]
max_files = 500
"#;
        let cfg = ProjectConfig::parse(toml).unwrap();
        assert_eq!(cfg.tree.max_files, Some(500));
        assert_eq!(cfg.tree.ignore_file, ".fastestignore");
        assert_eq!(cfg.store.cache_dir, None);
    }

    #[test]
    fn parse_rejects_unknown_top_level_field() {
        let toml = "unknown_field = true\n";
        let err = ProjectConfig::parse(toml).unwrap_err();
        assert!(err.message.contains("unknown field"));
    }

    #[test]
    fn parse_rejects_unknown_nested_field() {
        let toml = r#"
[tree]
extra = "oops"
"#;
        let err = ProjectConfig::parse(toml).unwrap_err();
        assert!(err.message.contains("unknown field"));
    }

    #[test]
    fn parse_includes_line_number_on_error() {
        let toml = "good = 1\n[tree]\nmax_files = \"oops\"\n";
        let err = ProjectConfig::parse(toml).unwrap_err();
        assert!(err.message.contains("line"));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = ProjectConfig::load(Path::new("/nonexistent/settings.toml")).unwrap();
        assert_eq!(cfg, ProjectConfig::default());
    }

    #[test]
    fn load_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[tree]\nmax_files = 42\n").unwrap();
        let cfg = ProjectConfig::load(&path).unwrap();
        assert_eq!(cfg.tree.max_files, Some(42));
    }

    #[test]
    fn load_invalid_file_shows_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid [[[toml").unwrap();
        let err = ProjectConfig::load(&path).unwrap_err();
        assert_eq!(err.path.as_deref(), Some(path.as_path()));
        assert!(!err.message.is_empty());
    }

    #[test]
    fn config_error_display_with_path() {
        let err = ConfigError {
            path: Some(PathBuf::from("/repo/.fastest/settings.toml")),
            message: "bad field".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("/repo/.fastest/settings.toml"));
        assert!(msg.contains("bad field"));
    }

    #[test]
    fn config_error_display_without_path() {
        let err = ConfigError {
            path: None,
            message: "parse error".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("config error"));
        assert!(msg.contains("parse error"));
    }
}
