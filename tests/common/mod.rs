use std::fs;
use std::path::PathBuf;

use fastest_core::{Project, WorkspaceId};

/// A project plus its backing tempdir, kept alive for the test's duration.
pub struct TestProject {
    pub dir: tempfile::TempDir,
    pub project: Project,
}

pub fn new_project() -> TestProject {
    let dir = tempfile::tempdir().unwrap();
    let project = Project::init(dir.path()).unwrap();
    TestProject { dir, project }
}

/// Create a workspace at `<project-root>/<name>` and return its path.
pub fn new_workspace(tp: &TestProject, name: &str, fork: Option<fastest_core::SnapshotId>) -> PathBuf {
    let id = WorkspaceId::new(name).unwrap();
    let path = tp.dir.path().join(name);
    fs::create_dir_all(&path).unwrap();
    fastest_core::workspace::Workspace::create(&tp.project, id, path.clone(), fork).unwrap();
    path
}

pub fn write_file(root: &std::path::Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}
