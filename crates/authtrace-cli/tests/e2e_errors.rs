//! E2E tests for error rendering: stable `E####` codes on stderr and a
//! non-zero exit status.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

fn at_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("authtrace"));
    cmd.current_dir(dir);
    cmd.env("AUTHTRACE_LOG", "error");
    cmd.env_remove("AUTHTRACE_FORMAT");
    cmd
}

fn error_code(stderr: &[u8]) -> String {
    let body: Value = serde_json::Deserializer::from_slice(stderr)
        .into_iter::<Value>()
        .next()
        .expect("JSON error on stderr")
        .expect("valid JSON");
    body["error"]["error_code"]
        .as_str()
        .expect("error_code")
        .to_string()
}

#[test]
fn reads_require_an_initialized_store() {
    let dir = TempDir::new().expect("tempdir");
    let output = at_cmd(dir.path())
        .args(["summary", "MAIN", "--json"])
        .output()
        .expect("summary should not crash");
    assert!(!output.status.success());
    assert_eq!(error_code(&output.stderr), "E1001");
    assert!(!dir.path().join(".authtrace").exists());
}

#[test]
fn inverted_window_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    at_cmd(dir.path()).args(["init"]).assert().success();

    let output = at_cmd(dir.path())
        .args(["summary", "MAIN/PROJ", "--base", "200", "--head", "100", "--json"])
        .output()
        .expect("summary should not crash");
    assert!(!output.status.success());
    assert_eq!(error_code(&output.stderr), "E2004");
}

#[test]
fn unreadable_archive_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    at_cmd(dir.path()).args(["init"]).assert().success();
    std::fs::write(dir.path().join("delta.zip"), b"not a zip").expect("write");

    let output = at_cmd(dir.path())
        .args(["archive-diff", "MAIN", "delta.zip", "--json"])
        .output()
        .expect("archive-diff should not crash");
    assert!(!output.status.success());
    assert_eq!(error_code(&output.stderr), "E4001");
}

#[test]
fn broken_config_is_reported_in_text_mode() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("authtrace.toml"), "[store\npath = 1").expect("write");

    at_cmd(dir.path())
        .args(["init", "--format", "text"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E1002]"));
}

#[test]
fn store_flag_overrides_default_location() {
    let dir = TempDir::new().expect("tempdir");
    at_cmd(dir.path())
        .args(["--store", "custom/store.db", "init"])
        .assert()
        .success();
    assert!(dir.path().join("custom/store.db").exists());
    assert!(!dir.path().join(".authtrace").exists());
}

#[test]
fn unknown_activity_type_is_a_usage_error() {
    let dir = TempDir::new().expect("tempdir");
    at_cmd(dir.path())
        .args(["activities", "--type", "MERGE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("MERGE"));
}
