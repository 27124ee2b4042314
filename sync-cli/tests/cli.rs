//! End-to-end tests for the tasksync binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

fn tasksync(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tasksync").unwrap();
    cmd.arg("--data-dir").arg(data_dir);
    cmd
}

#[test]
fn init_then_add_and_list() {
    let dir = tempdir().unwrap();

    tasksync(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized tasksync"));

    tasksync(dir.path())
        .args(["add-task", "Water plants", "--project", "Home", "--due", "2025-06-16"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added task"));

    tasksync(dir.path())
        .args(["list", "--date", "2025-06-16"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Water plants"));

    tasksync(dir.path())
        .args(["list", "--project", "home"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Water plants"));

    tasksync(dir.path())
        .args(["list", "--date", "2025-06-17"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No tasks."));
}

#[test]
fn init_twice_fails() {
    let dir = tempdir().unwrap();
    tasksync(dir.path()).arg("init").assert().success();

    tasksync(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Already initialized"));
}

#[test]
fn sync_between_two_data_dirs() {
    let shared = tempdir().unwrap();
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();

    for dir in [first.path(), second.path()] {
        tasksync(dir)
            .arg("init")
            .arg("--remote-dir")
            .arg(shared.path())
            .assert()
            .success();
    }

    tasksync(first.path())
        .args(["add-project", "Travel"])
        .assert()
        .success();
    tasksync(first.path())
        .args(["add-task", "Book flights", "--project", "Travel"])
        .assert()
        .success();
    tasksync(first.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("Sync complete"));

    tasksync(second.path())
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("tasks +1"));

    tasksync(second.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Book flights"));
    tasksync(second.path())
        .arg("projects")
        .assert()
        .success()
        .stdout(predicate::str::contains("Travel"));
}

#[test]
fn sync_without_remote_fails_with_message() {
    let dir = tempdir().unwrap();

    tasksync(dir.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("can't be reached"));
}

#[test]
fn status_reports_remote_state() {
    let dir = tempdir().unwrap();

    tasksync(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("UNAVAILABLE"))
        .stdout(predicate::str::contains("Last sync: never"));

    tasksync(dir.path()).arg("init").assert().success();

    tasksync(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("AVAILABLE"))
        .stdout(predicate::str::contains("Tasks:    0 (0 open)"));
}

#[test]
fn complete_marks_task_done() {
    let dir = tempdir().unwrap();
    tasksync(dir.path()).arg("init").assert().success();

    let output = tasksync(dir.path())
        .args(["add-task", "Ship it"])
        .output()
        .unwrap();
    let stdout = String::from_utf8(output.stdout).unwrap();
    let id = stdout
        .split_whitespace()
        .nth(2)
        .expect("id in output")
        .to_string();

    tasksync(dir.path())
        .args(["complete", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed"));

    tasksync(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("[x]"));
}

#[test]
fn bad_config_is_reported() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("tasksync.toml"), "[sync]\nstrategy = \"keep_both\"\n").unwrap();

    tasksync(dir.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load"));
}
