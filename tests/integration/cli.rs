//! Integration tests for the `anchorkeep` binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn anchorkeep(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("anchorkeep").expect("binary should build");
    cmd.arg("--data-dir").arg(dir.path());
    cmd
}

fn status_json(dir: &TempDir) -> serde_json::Value {
    let output = anchorkeep(dir)
        .args(["status", "--json"])
        .output()
        .expect("status should run");
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).expect("status should print JSON")
}

#[test]
fn test_status_on_empty_data_dir() {
    let dir = TempDir::new().unwrap();

    anchorkeep(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Last map:     (none)"))
        .stdout(predicate::str::contains("Loadable:     no"));

    // First run writes the example config and the log file
    assert!(dir.path().join("config.toml").is_file());
    assert!(dir.path().join("logs").join("anchorkeep.log").is_file());
}

#[test]
fn test_simulate_then_inspect() {
    let dir = TempDir::new().unwrap();

    anchorkeep(&dir)
        .args(["simulate", "--objects", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Mapped room_"))
        .stdout(predicate::str::contains("restored 3 objects (0 rejected)"));

    let status = status_json(&dir);
    assert_eq!(status["has_saved_map"], true);
    assert_eq!(status["objects"], 3);
    let signature = status["last_signature"].as_str().unwrap().to_string();

    anchorkeep(&dir)
        .arg("inspect")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Map:    {}", signature)))
        .stdout(predicate::str::contains("Nodes:  4"))
        .stdout(predicate::str::contains("Valid:  yes"));

    anchorkeep(&dir)
        .args(["objects", &signature])
        .assert()
        .success()
        .stdout(predicate::eq("(0, 0, 1)\n(1, 0, 2)\n(2, 0, 3)\n"));

    anchorkeep(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(signature.as_str()));
}

#[test]
fn test_clear_objects_and_forget() {
    let dir = TempDir::new().unwrap();
    anchorkeep(&dir).arg("simulate").assert().success();

    anchorkeep(&dir)
        .arg("clear-objects")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Cleared objects for room_"));
    assert_eq!(status_json(&dir)["objects"], 0);

    anchorkeep(&dir).arg("forget").assert().success();
    let status = status_json(&dir);
    assert!(status["last_signature"].is_null());
    assert_eq!(status["has_saved_map"], false);
}

#[test]
fn test_objects_without_saved_map_fails() {
    let dir = TempDir::new().unwrap();

    anchorkeep(&dir)
        .arg("objects")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no saved map"));
}

#[test]
fn test_invalid_signature_is_rejected() {
    let dir = TempDir::new().unwrap();

    anchorkeep(&dir)
        .args(["inspect", "../escape"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid map signature"));
}
