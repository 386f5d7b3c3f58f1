use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

struct Setup {
    tmp: TempDir,
    a: PathBuf,
    b: PathBuf,
    config: PathBuf,
}

fn setup() -> Setup {
    let tmp = TempDir::new().expect("tmp");
    let a = tmp.path().join("a");
    let b = tmp.path().join("b");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();
    let config = tmp.path().join("mirror.yaml");
    fs::write(
        &config,
        format!(
            "path1: \"{}\"\npath2: \"{}\"\nstate_dir: \"{}\"\nexcluded_files: \"*.tmp\"\nlock_wait_attempts: 1\nlock_wait_interval_ms: 10\n",
            a.display(),
            b.display(),
            tmp.path().join("state").display()
        ),
    )
    .unwrap();
    Setup { tmp, a, b, config }
}

fn treemirror(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("treemirror").expect("binary built");
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn once_mirrors_a_single_file() {
    let s = setup();
    fs::write(s.a.join("x.txt"), "hello").unwrap();
    fs::write(s.a.join("scratch.tmp"), "ignored").unwrap();

    treemirror(s.tmp.path())
        .arg("once")
        .arg("--config")
        .arg(&s.config)
        .assert()
        .success()
        .stdout(contains("cycle complete"));

    assert_eq!(fs::read_to_string(s.b.join("x.txt")).unwrap(), "hello");
    assert!(!s.b.join("scratch.tmp").exists());
}

#[test]
fn once_json_reports_both_passes() {
    let s = setup();
    fs::write(s.b.join("from_b.txt"), "b").unwrap();

    treemirror(s.tmp.path())
        .args(["once", "--json", "--config"])
        .arg(&s.config)
        .assert()
        .success()
        .stdout(contains("\"a_to_b\"").and(contains("\"b_to_a\"")));

    assert!(s.a.join("from_b.txt").exists());
}

#[test]
fn status_counts_tracked_entries_after_a_cycle() {
    let s = setup();
    fs::write(s.a.join("one.txt"), "1").unwrap();
    fs::write(s.a.join("two.txt"), "2").unwrap();

    treemirror(s.tmp.path())
        .arg("once")
        .arg("--config")
        .arg(&s.config)
        .assert()
        .success();

    let output = treemirror(s.tmp.path())
        .args(["status", "--json", "--config"])
        .arg(&s.config)
        .output()
        .expect("status runs");
    assert!(output.status.success());
    let trees: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    let trees = trees.as_array().expect("array of trees");
    assert_eq!(trees.len(), 2);
    for tree in trees {
        assert_eq!(tree["tracked"], 2);
        assert_eq!(tree["pending"], 0);
        assert_eq!(tree["reachable"], true);
    }
}

#[test]
fn status_table_mentions_sync_state() {
    let s = setup();
    treemirror(s.tmp.path())
        .arg("status")
        .arg("--config")
        .arg(&s.config)
        .assert()
        .success()
        .stdout(contains("tracked").and(contains("trees in sync")));
}

#[test]
fn scan_lists_creates_and_persists_catalog() {
    let s = setup();
    fs::write(s.a.join("doc.txt"), "d").unwrap();
    fs::create_dir_all(s.a.join("node_modules")).unwrap();
    fs::write(s.a.join("node_modules").join("dep.js"), "x").unwrap();
    let state = s.tmp.path().join("scan-state");

    treemirror(s.tmp.path())
        .arg("scan")
        .arg(&s.a)
        .args(["--exclude-folders", "node_modules", "--state-dir"])
        .arg(&state)
        .assert()
        .success()
        .stdout(
            contains("CREATE doc.txt")
                .and(contains("dep.js").not())
                .and(contains("catalog: ")),
        );

    assert_eq!(fs::read_dir(state.join("catalogs")).unwrap().count(), 1);

    treemirror(s.tmp.path())
        .arg("scan")
        .arg(&s.a)
        .args(["--exclude-folders", "node_modules", "--state-dir"])
        .arg(&state)
        .assert()
        .success()
        .stdout(contains("no changes"));
}

#[test]
fn scan_of_missing_root_fails() {
    let s = setup();
    treemirror(s.tmp.path())
        .arg("scan")
        .arg(s.tmp.path().join("nowhere"))
        .arg("--state-dir")
        .arg(s.tmp.path().join("state"))
        .assert()
        .failure()
        .stderr(contains("scan failed"));
}

#[test]
fn copy_seeds_a_tree_and_respects_overwrite() {
    let s = setup();
    fs::create_dir_all(s.a.join("sub")).unwrap();
    fs::write(s.a.join("sub").join("f.txt"), "new").unwrap();
    fs::create_dir_all(s.b.join("sub")).unwrap();
    fs::write(s.b.join("sub").join("f.txt"), "old").unwrap();

    treemirror(s.tmp.path())
        .arg("copy")
        .arg(&s.a)
        .arg(&s.b)
        .arg("--no-wait")
        .assert()
        .success()
        .stdout(contains("1 skipped"));
    assert_eq!(fs::read_to_string(s.b.join("sub").join("f.txt")).unwrap(), "old");

    treemirror(s.tmp.path())
        .arg("copy")
        .arg(&s.a)
        .arg(&s.b)
        .args(["--overwrite", "--no-wait"])
        .assert()
        .success()
        .stdout(contains("1 copied"));
    assert_eq!(fs::read_to_string(s.b.join("sub").join("f.txt")).unwrap(), "new");
}

#[test]
fn nested_roots_are_rejected() {
    let s = setup();
    let bad = s.tmp.path().join("nested.yaml");
    fs::write(
        &bad,
        format!(
            "path1: \"{}\"\npath2: \"{}\"\n",
            s.a.display(),
            s.a.join("inner").display()
        ),
    )
    .unwrap();

    treemirror(s.tmp.path())
        .arg("once")
        .arg("--config")
        .arg(&bad)
        .assert()
        .failure()
        .stderr(contains("nested"));
}

#[test]
fn interval_flag_must_be_positive() {
    let s = setup();
    treemirror(s.tmp.path())
        .args(["status", "--interval", "0", "--config"])
        .arg(&s.config)
        .assert()
        .failure()
        .stderr(contains("check_interval_sec"));
}
