//! Integration tests for the warmpool CLI.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

/// A warmpool command running in `dir`, isolated from the caller's environment.
fn warmpool(dir: &std::path::Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("warmpool").unwrap();
    cmd.current_dir(dir)
        .env("NO_COLOR", "1")
        .env_remove("WARMPOOL_CONFIG")
        .env_remove("WARMPOOL_PORT")
        .env_remove("WARMPOOL_SOCKET_PATH");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = tempdir().unwrap();
    warmpool(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("reload"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("built-in worker").not());
}

#[test]
fn test_version() {
    let dir = tempdir().unwrap();
    warmpool(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_config_show_option_default() {
    let dir = tempdir().unwrap();
    warmpool(dir.path())
        .args(["config", "--show-option", "port"])
        .assert()
        .success()
        .stdout("8080\n");
}

#[test]
fn test_config_precedence() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("warmpool.json"), r#"{ "port": 9000 }"#).unwrap();

    warmpool(dir.path())
        .args(["config", "--show-option", "port"])
        .assert()
        .success()
        .stdout("9000\n");

    warmpool(dir.path())
        .env("WARMPOOL_PORT", "9100")
        .args(["config", "--show-option", "port"])
        .assert()
        .success()
        .stdout("9100\n");

    warmpool(dir.path())
        .env("WARMPOOL_PORT", "9100")
        .args(["config", "--show-option", "port", "--port", "9200"])
        .assert()
        .success()
        .stdout("9200\n");
}

#[test]
fn test_config_unknown_option() {
    let dir = tempdir().unwrap();
    warmpool(dir.path())
        .args(["config", "--show-option", "no-such-key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown option"));
}

#[test]
fn test_config_write() {
    let dir = tempdir().unwrap();
    warmpool(dir.path())
        .args(["config", "--write", "--workers", "3", "--memory-limit", "1G"])
        .assert()
        .success();

    let raw = std::fs::read_to_string(dir.path().join("warmpool.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["workers"], 3);
    assert_eq!(json["memory-limit"], 1024);
}

#[test]
fn test_config_table() {
    let dir = tempdir().unwrap();
    warmpool(dir.path())
        .args(["config", "--ascii"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max-execution-time"))
        .stdout(predicate::str::contains("Default"));
}

#[test]
fn test_malformed_settings_file() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("warmpool.json"), "{ nope").unwrap();
    warmpool(dir.path())
        .args(["config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid settings"));
}

#[test]
fn test_status_without_supervisor() {
    let dir = tempdir().unwrap();
    warmpool(dir.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No supervisor is listening"));
}

#[test]
fn test_stop_with_explicit_socket_path() {
    let dir = tempdir().unwrap();
    warmpool(dir.path())
        .args(["stop", "--socket-path", "elsewhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("elsewhere"));
}

#[test]
fn test_start_rejects_invalid_settings() {
    let dir = tempdir().unwrap();
    warmpool(dir.path())
        .args(["start", "--workers", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("workers must be at least 1"));
}

#[test]
fn test_worker_outside_supervisor() {
    let dir = tempdir().unwrap();
    warmpool(dir.path())
        .env_remove("WARMPOOL_CONTROL_SOCKET")
        .arg("worker")
        .assert()
        .failure()
        .stderr(predicate::str::contains("WARMPOOL_CONTROL_SOCKET"));
}

#[test]
fn test_completions() {
    let dir = tempdir().unwrap();
    warmpool(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("warmpool"));
}
