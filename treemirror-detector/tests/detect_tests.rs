//! Change detection over real temporary trees.
//!
//! Each test gets an isolated `TempDir`. Modification times are pinned with
//! `filetime` so signature comparisons never depend on clock resolution.

use filetime::{set_file_mtime, FileTime};
use rstest::rstest;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use treemirror_core::{ChangeCatalog, ChangeKind, EntryKind, FilterSet};
use treemirror_detector::{detect, with_outstanding};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_tree() -> TempDir {
    TempDir::new().expect("tempdir")
}

fn write(root: &Path, rel: &str, content: &str, mtime: i64) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(&path, content).expect("write fixture");
    set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).expect("set mtime");
}

fn summary(changes: &[treemirror_core::ChangeRecord]) -> Vec<(ChangeKind, String)> {
    changes.iter().map(|c| (c.kind, c.path.clone())).collect()
}

// ---------------------------------------------------------------------------
// Basic lifecycle
// ---------------------------------------------------------------------------

#[test]
fn first_scan_reports_creates_sorted() {
    let tree = make_tree();
    write(tree.path(), "b.txt", "b", 1_000);
    write(tree.path(), "a/z.txt", "z", 1_000);
    write(tree.path(), "a/c.txt", "c", 1_000);
    let mut catalog = ChangeCatalog::in_memory(tree.path());

    let changes = detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    assert_eq!(
        summary(&changes),
        vec![
            (ChangeKind::Create, "a".to_string()),
            (ChangeKind::Create, "a/c.txt".to_string()),
            (ChangeKind::Create, "a/z.txt".to_string()),
            (ChangeKind::Create, "b.txt".to_string()),
        ]
    );
    assert!(changes.iter().all(|c| c.version == 1));
    assert_eq!(changes[0].entry, EntryKind::Directory);
}

#[test]
fn second_scan_of_unchanged_tree_is_empty() {
    let tree = make_tree();
    write(tree.path(), "docs/readme.md", "hello", 1_000);
    let mut catalog = ChangeCatalog::in_memory(tree.path());

    let first = detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    assert_eq!(first.len(), 2);
    let second = detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    assert!(second.is_empty(), "got: {second:?}");
}

#[test]
fn modified_file_is_update_with_bumped_version() {
    let tree = make_tree();
    write(tree.path(), "a.txt", "one", 1_000);
    let mut catalog = ChangeCatalog::in_memory(tree.path());
    detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();

    write(tree.path(), "a.txt", "one", 2_000);
    let changes = detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    assert_eq!(summary(&changes), vec![(ChangeKind::Update, "a.txt".to_string())]);
    assert_eq!(changes[0].version, 2);
    assert_eq!(catalog.lookup("a.txt").unwrap().version, 2);
}

#[test]
fn directory_mtime_change_is_not_an_update() {
    let tree = make_tree();
    fs::create_dir(tree.path().join("d")).unwrap();
    let mut catalog = ChangeCatalog::in_memory(tree.path());
    detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();

    set_file_mtime(tree.path().join("d"), FileTime::from_unix_time(5_000, 0)).unwrap();
    let changes = detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    assert!(changes.is_empty());
}

#[test]
fn removed_file_is_tombstoned_delete() {
    let tree = make_tree();
    write(tree.path(), "a.txt", "one", 1_000);
    write(tree.path(), "keep.txt", "keep", 1_000);
    let mut catalog = ChangeCatalog::in_memory(tree.path());
    detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();

    fs::remove_file(tree.path().join("a.txt")).unwrap();
    let changes = detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    assert_eq!(summary(&changes), vec![(ChangeKind::Delete, "a.txt".to_string())]);
    let record = catalog.lookup("a.txt").unwrap();
    assert!(record.tombstone);
    assert!(record.tombstoned_at.is_some());
    assert_eq!(record.version, 2);

    let again = detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    assert!(again.is_empty());
}

#[test]
fn recreated_file_resurrects_tombstone() {
    let tree = make_tree();
    write(tree.path(), "a.txt", "one", 1_000);
    let mut catalog = ChangeCatalog::in_memory(tree.path());
    detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    fs::remove_file(tree.path().join("a.txt")).unwrap();
    detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();

    write(tree.path(), "a.txt", "two", 3_000);
    let changes = detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    assert_eq!(summary(&changes), vec![(ChangeKind::Create, "a.txt".to_string())]);
    assert_eq!(changes[0].version, 3);
    assert!(!catalog.lookup("a.txt").unwrap().tombstone);
}

// ---------------------------------------------------------------------------
// Rename coalescing
// ---------------------------------------------------------------------------

#[test]
fn delete_plus_identical_create_becomes_rename() {
    let tree = make_tree();
    write(tree.path(), "old.txt", "payload", 1_000);
    let mut catalog = ChangeCatalog::in_memory(tree.path());
    detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();

    fs::rename(tree.path().join("old.txt"), tree.path().join("new.txt")).unwrap();
    let changes = detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    assert_eq!(changes.len(), 1, "got: {changes:?}");
    assert_eq!(changes[0].kind, ChangeKind::Rename);
    assert_eq!(changes[0].old_path.as_deref(), Some("old.txt"));
    assert_eq!(changes[0].path, "new.txt");
    assert!(catalog.lookup("old.txt").unwrap().tombstone);
}

#[test]
fn different_signature_stays_delete_and_create() {
    let tree = make_tree();
    write(tree.path(), "old.txt", "payload", 1_000);
    let mut catalog = ChangeCatalog::in_memory(tree.path());
    detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();

    fs::remove_file(tree.path().join("old.txt")).unwrap();
    write(tree.path(), "new.txt", "other payload", 1_000);
    let changes = detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    assert_eq!(
        summary(&changes),
        vec![
            (ChangeKind::Create, "new.txt".to_string()),
            (ChangeKind::Delete, "old.txt".to_string()),
        ]
    );
}

// ---------------------------------------------------------------------------
// Exclusion
// ---------------------------------------------------------------------------

#[rstest]
#[case("scratch.tmp")]
#[case("~$report.docx")]
#[case("node_modules/pkg/index.js")]
#[case("src/.git/HEAD")]
fn excluded_paths_produce_no_records(#[case] rel: &str) {
    let tree = make_tree();
    write(tree.path(), rel, "x", 1_000);
    let filter = FilterSet::from_lists("*.tmp,~$*", "node_modules,.git").unwrap();
    let mut catalog = ChangeCatalog::in_memory(tree.path());

    let changes = detect(tree.path(), &filter, &mut catalog).unwrap();
    assert!(
        changes.iter().all(|c| !c.path.ends_with(rel.rsplit('/').next().unwrap())),
        "excluded path leaked: {changes:?}"
    );
    assert!(catalog.lookup(rel).is_none());
}

#[test]
fn newly_excluded_path_is_dropped_without_delete() {
    let tree = make_tree();
    write(tree.path(), "cache/blob.bin", "x", 1_000);
    let mut catalog = ChangeCatalog::in_memory(tree.path());
    detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();

    let filter = FilterSet::from_lists("", "cache").unwrap();
    let changes = detect(tree.path(), &filter, &mut catalog).unwrap();
    assert!(changes.is_empty(), "got: {changes:?}");
    assert!(catalog.lookup("cache").is_none());
    assert!(catalog.lookup("cache/blob.bin").is_none());
}

// ---------------------------------------------------------------------------
// Retries
// ---------------------------------------------------------------------------

#[test]
fn unsynced_changes_are_requeued_next_cycle() {
    let tree = make_tree();
    write(tree.path(), "a.txt", "one", 1_000);
    let mut catalog = ChangeCatalog::in_memory(tree.path());
    let fresh = detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    assert_eq!(with_outstanding(&catalog, fresh).len(), 1);

    let fresh = detect(tree.path(), &FilterSet::empty(), &mut catalog).unwrap();
    assert!(fresh.is_empty());
    let retried = with_outstanding(&catalog, fresh);
    assert_eq!(summary(&retried), vec![(ChangeKind::Create, "a.txt".to_string())]);

    catalog.mark_synced("a.txt", 1);
    assert!(with_outstanding(&catalog, Vec::new()).is_empty());
}
