mod common;

use common::{new_project, write_file};
use fastest_core::hash::canonical_json;
use fastest_core::ignore_match::IgnoreMatcher;
use fastest_core::manifest::Manifest;

/// Two independent tree walks of byte-identical content, in different
/// directory-listing orders, must hash identically — the property that
/// lets a snapshot's identity be checked on a different machine than the
/// one that created it.
#[test]
fn manifest_hash_is_stable_across_independent_builds() {
    let tp1 = new_project();
    let dir1 = tp1.dir.path().join("tree");
    write_file(&dir1, "b/second.txt", b"second");
    write_file(&dir1, "a/first.txt", b"first");
    write_file(&dir1, "top.txt", b"top level");

    let tp2 = new_project();
    let dir2 = tp2.dir.path().join("tree");
    // Same content, written in a different order.
    write_file(&dir2, "top.txt", b"top level");
    write_file(&dir2, "a/first.txt", b"first");
    write_file(&dir2, "b/second.txt", b"second");

    let ignore = IgnoreMatcher::none();
    let m1 = Manifest::build_from_tree(&dir1, &ignore, tp1.project.blobs(), None).unwrap();
    let m2 = Manifest::build_from_tree(&dir2, &ignore, tp2.project.blobs(), None).unwrap();

    assert_eq!(m1.hash(), m2.hash());
    assert_eq!(m1.to_json(), m2.to_json());
}

#[test]
fn canonical_json_is_independent_of_source_object_key_order() {
    let v1 = serde_json::json!({"version": 1, "entries": [{"path": "a", "mode": 420, "type": "dir"}]});
    let v2: serde_json::Value = serde_json::from_str(
        r#"{"entries":[{"type":"dir","mode":420,"path":"a"}],"version":1}"#,
    )
    .unwrap();
    assert_eq!(canonical_json(&v1), canonical_json(&v2));
}
