//! CLI smoke tests: argument surface, status/reset subcommands, exit codes.
//!
//! The `run` subcommand is only exercised for its failure paths; driving a
//! real agent binary is out of scope here.

use assert_cmd::cargo;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn vigil() -> Command {
    Command::new(cargo::cargo_bin!("vigil"))
}

#[test]
fn help_lists_subcommands() {
    vigil()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("reset"));
}

#[test]
fn version_flag() {
    vigil()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn status_with_no_state_reports_cleanly() {
    let temp = TempDir::new().unwrap();
    vigil()
        .args(["status", "--project"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No status recorded yet"))
        .stdout(predicate::str::contains("closed"));
}

#[test]
fn reset_creates_state_and_reports() {
    let temp = TempDir::new().unwrap();
    vigil()
        .args(["reset", "--project"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Circuit breaker reset"));

    assert!(temp.path().join(".vigil").join("circuit_state.json").exists());
}

#[test]
fn reset_with_session_flag() {
    let temp = TempDir::new().unwrap();
    vigil()
        .args(["reset", "--session", "--reason", "operator_cleanup", "--project"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Session reset"));
}

#[test]
fn run_without_prompt_fails_with_missing_code() {
    let temp = TempDir::new().unwrap();
    // Fails either on agent discovery or on the missing prompt file; both
    // are "missing prerequisite" failures sharing one exit code.
    vigil()
        .args(["run", "--project"])
        .arg(temp.path())
        .assert()
        .failure()
        .code(6);
}

#[test]
fn nonexistent_project_is_rejected() {
    vigil()
        .args(["status", "--project", "/definitely/not/a/real/path"])
        .assert()
        .failure();
}
