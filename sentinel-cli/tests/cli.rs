use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn sentinel_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("sentinel"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("SENTINEL_STORE")
        .env_remove("SENTINEL_CONFIG")
        .env_remove("SENTINEL_NAMESPACE");
    cmd
}

fn watched_tree() -> TempDir {
    let dir = TempDir::new().expect("tree");
    fs::write(dir.path().join("a.txt"), vec![0u8; 10]).expect("a");
    fs::write(dir.path().join("b.txt"), vec![0u8; 20]).expect("b");
    dir
}

fn add_watch(home: &Path, key: &str, path: &Path) {
    sentinel_cmd(home)
        .args(["watch", "add", key, "--path"])
        .arg(path)
        .assert()
        .success()
        .stdout(contains("created"));
}

#[test]
fn watch_add_list_show_remove() {
    let home = TempDir::new().expect("home");
    let tree = watched_tree();
    add_watch(home.path(), "default/data", tree.path());

    let record = home
        .path()
        .join(".sentinel")
        .join("records")
        .join("default")
        .join("data.yaml");
    assert!(record.exists(), "record file should be written under ~/.sentinel");

    let output = sentinel_cmd(home.path())
        .args(["watch", "list", "--json"])
        .output()
        .expect("list");
    assert!(output.status.success());
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(listed[0]["key"], "default/data");
    assert_eq!(listed[0]["files"], 0);

    sentinel_cmd(home.path())
        .args(["watch", "show", "default/data"])
        .assert()
        .success()
        .stdout(contains("kind: FileMonitor"))
        .stdout(contains("apiVersion: sentinel.io/v1"));

    sentinel_cmd(home.path())
        .args(["watch", "remove", "default/data"])
        .assert()
        .success()
        .stdout(contains("removed"));
    assert!(!record.exists());

    sentinel_cmd(home.path())
        .args(["watch", "list"])
        .assert()
        .success()
        .stdout(contains("No watch records."));
}

#[test]
fn re_adding_same_spec_is_unchanged() {
    let home = TempDir::new().expect("home");
    let tree = watched_tree();
    add_watch(home.path(), "default/data", tree.path());

    sentinel_cmd(home.path())
        .args(["watch", "add", "default/data", "--path"])
        .arg(tree.path())
        .assert()
        .success()
        .stdout(contains("unchanged"));
}

#[test]
fn malformed_key_is_rejected() {
    let home = TempDir::new().expect("home");
    sentinel_cmd(home.path())
        .args(["watch", "add", "no-slash", "--path", "/tmp"])
        .assert()
        .failure()
        .stderr(contains("invalid record key"));
}

#[test]
fn scan_prints_json_snapshot() {
    let home = TempDir::new().expect("home");
    let tree = watched_tree();

    let output = sentinel_cmd(home.path())
        .args(["scan", "--json"])
        .arg(tree.path())
        .output()
        .expect("scan");
    assert!(output.status.success());
    let snapshot: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let entries = snapshot["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["name"], "a.txt");
    assert_eq!(entries[0]["size"], 10);
    assert_eq!(entries[1]["isDir"], false);
}

#[test]
fn scan_of_missing_path_fails() {
    let home = TempDir::new().expect("home");
    sentinel_cmd(home.path())
        .args(["scan"])
        .arg(home.path().join("nope"))
        .assert()
        .failure()
        .stderr(contains("scan failed"));
}

#[test]
fn diff_then_reconcile_once_converges() {
    let home = TempDir::new().expect("home");
    let tree = watched_tree();
    add_watch(home.path(), "default/data", tree.path());

    sentinel_cmd(home.path())
        .args(["diff", "default/data"])
        .assert()
        .success()
        .stdout(contains("a.txt"))
        .stdout(contains("2 added, 0 updated, 0 removed"));

    sentinel_cmd(home.path())
        .env("RUST_LOG", "info")
        .args(["reconcile", "--once"])
        .assert()
        .success()
        .stdout(contains("updated"))
        .stderr(contains("status updated"));

    sentinel_cmd(home.path())
        .args(["diff", "default/data"])
        .assert()
        .success()
        .stdout(contains("No differences for 'default/data'."));

    fs::remove_file(tree.path().join("b.txt")).expect("rm");
    sentinel_cmd(home.path())
        .args(["diff", "default/data"])
        .assert()
        .success()
        .stdout(contains("0 added, 0 updated, 1 removed"));
}

#[test]
fn reconcile_once_reports_missing_root_without_failing_others() {
    let home = TempDir::new().expect("home");
    let tree = watched_tree();
    add_watch(home.path(), "default/good", tree.path());
    add_watch(home.path(), "default/gone", &tree.path().join("missing"));

    sentinel_cmd(home.path())
        .args(["reconcile", "--once"])
        .assert()
        .failure()
        .stdout(contains("failed:scan:not_found"))
        .stdout(contains("1 record(s) failed"))
        .stderr(contains("1 of 2 record(s) failed"));

    let output = sentinel_cmd(home.path())
        .args(["watch", "list", "--json"])
        .output()
        .expect("list");
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(listed[0]["key"], "default/gone");
    assert_eq!(listed[0]["files"], 0);
    assert_eq!(listed[1]["key"], "default/good");
    assert_eq!(listed[1]["files"], 2);
}

#[test]
fn global_store_flag_and_namespace_filter() {
    let home = TempDir::new().expect("home");
    let store = TempDir::new().expect("store");
    let tree = watched_tree();

    for key in ["team-a/one", "team-b/two"] {
        sentinel_cmd(home.path())
            .arg("--store")
            .arg(store.path())
            .args(["watch", "add", key, "--path"])
            .arg(tree.path())
            .assert()
            .success();
    }
    assert!(store.path().join("team-a").join("one.yaml").exists());

    sentinel_cmd(home.path())
        .arg("--store")
        .arg(store.path())
        .args(["reconcile", "--once", "--namespace", "team-b"])
        .assert()
        .success()
        .stdout(contains("1 records"))
        .stdout(contains("team-b/two"))
        .stdout(contains("team-a/one").not());
}

#[test]
fn invalid_concurrency_override_is_rejected() {
    let home = TempDir::new().expect("home");
    sentinel_cmd(home.path())
        .args(["reconcile", "--once", "--concurrency", "0"])
        .assert()
        .failure()
        .stderr(contains("invalid controller configuration"));
}

#[test]
fn parent_namespace_filter_is_rejected() {
    let home = TempDir::new().expect("home");
    sentinel_cmd(home.path())
        .args(["reconcile", "--once", "--namespace", ".."])
        .assert()
        .failure()
        .stderr(contains("invalid namespace"));
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().expect("home");
    sentinel_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));

    sentinel_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("not running"));
}
