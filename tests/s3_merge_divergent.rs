mod common;

use std::fs;

use common::{new_project, new_workspace, write_file};
use fastest_core::merge::{merge, MergeStrategy, NullResolver};
use fastest_core::workspace::Workspace;

#[test]
fn divergent_non_overlapping_edits_merge_cleanly() {
    let tp = new_project();
    let main_path = new_workspace(&tp, "main", None);
    write_file(&main_path, "shared/config.toml", b"version = 1");
    let mut main_ws = Workspace::open(&tp.project, "main".parse().unwrap()).unwrap();
    let root = main_ws.commit("root".to_owned(), None).unwrap();
    drop(main_ws);

    let agent_path = new_workspace(&tp, "agent", Some(root.id.clone()));
    // The agent workspace forks from `root`'s tree, but is created as an
    // empty directory — materialize the fork point before diverging.
    main_ws_restore(&tp, &root.id, &agent_path);
    write_file(&agent_path, "agent/notes.md", b"work in progress");
    let mut agent_ws = Workspace::open(&tp.project, "agent".parse().unwrap()).unwrap();
    let agent_head = agent_ws.commit("agent adds notes".to_owned(), None).unwrap();
    drop(agent_ws);

    write_file(&main_path, "main/extra.txt", b"main-side work");
    let mut main_ws = Workspace::open(&tp.project, "main".parse().unwrap()).unwrap();
    main_ws.commit("main adds extra file".to_owned(), None).unwrap();

    let outcome = merge(&mut main_ws, &agent_head.id, MergeStrategy::Manual, &NullResolver, true).unwrap();
    assert!(!outcome.has_conflicts());
    assert_eq!(
        fs::read(main_path.join("agent/notes.md")).unwrap(),
        b"work in progress"
    );
    assert!(main_path.join("main/extra.txt").exists());

    let merged = main_ws.commit("merge agent work".to_owned(), None).unwrap();
    assert_eq!(merged.parent_ids.len(), 2);
}

fn main_ws_restore(tp: &common::TestProject, snapshot_id: &fastest_core::SnapshotId, target: &std::path::Path) {
    let ws = Workspace::open(&tp.project, "main".parse().unwrap()).unwrap();
    ws.restore(snapshot_id, target).unwrap();
}
