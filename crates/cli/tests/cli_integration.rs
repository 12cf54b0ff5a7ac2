//! CLI integration tests for the offline subcommands.
//!
//! Uses `assert_cmd` to spawn the `postmortem` binary and verify exit codes,
//! stdout content, and stderr content.

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper: create a Command for the `postmortem` binary with a clean environment.
fn postmortem() -> Command {
    let mut cmd = cargo_bin_cmd!("postmortem");
    cmd.env_remove("POSTMORTEM_PORT")
        .env_remove("POSTMORTEM_RATE_LIMIT");
    cmd
}

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("postmortem.toml");
    fs::write(&path, body).expect("write config");
    path
}

const VALID: &str = r#"
[server]
port = 9100
rate_limit = 30

[[users]]
id = "alice"
role = "employee"
api_key = "alice-key"

[[users]]
id = "bob"
role = "manager"
api_key = "bob-key"
"#;

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    postmortem()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Incident postmortem workflow server"));
}

#[test]
fn version_exits_0() {
    postmortem()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("postmortem"));
}

#[test]
fn serve_requires_config() {
    postmortem()
        .arg("serve")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--config"));
}

// ──────────────────────────────────────────────
// 2. check-config
// ──────────────────────────────────────────────

#[test]
fn check_config_valid_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, VALID);
    postmortem()
        .arg("check-config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("ok (2 users, port 9100, rate limit 30/min)"));
}

#[test]
fn check_config_applies_env_overrides() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, VALID);
    postmortem()
        .env("POSTMORTEM_PORT", "9200")
        .env("POSTMORTEM_RATE_LIMIT", "5")
        .args(["--output", "json", "check-config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"port\": 9200"))
        .stdout(predicate::str::contains("\"rate_limit\": 5"));
}

#[test]
fn check_config_bad_env_override_fails() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, VALID);
    postmortem()
        .env("POSTMORTEM_PORT", "eighty")
        .arg("check-config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("POSTMORTEM_PORT"));
}

#[test]
fn check_config_reports_every_problem() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[[users]]
id = "alice"
role = "employee"
api_key = "k1"

[[users]]
id = "alice"
role = "manager"
api_key = "k1"
"#,
    );
    postmortem()
        .arg("check-config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate user id 'alice'"))
        .stderr(predicate::str::contains("api_key already assigned"));
}

#[test]
fn check_config_json_errors() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[server]\nport = 8080\n");
    let output = postmortem()
        .args(["--output", "json", "check-config"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(body["valid"], false);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
}

#[test]
fn check_config_unknown_role_fails() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "[[users]]\nid = \"root\"\nrole = \"admin\"\napi_key = \"k\"\n",
    );
    postmortem()
        .arg("check-config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot parse"));
}

#[test]
fn check_config_missing_file_fails() {
    postmortem()
        .args(["check-config", "does/not/exist.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}

// ──────────────────────────────────────────────
// 3. capabilities
// ──────────────────────────────────────────────

#[test]
fn capabilities_lists_every_role() {
    postmortem()
        .arg("capabilities")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "employee: create_analysis, edit_analysis, submit_analysis",
        ))
        .stdout(predicate::str::contains("owner: view_report"))
        .stdout(predicate::str::contains("manager: create_task"));
}

#[test]
fn capabilities_for_one_role_as_json() {
    let output = postmortem()
        .args(["--output", "json", "capabilities", "--role", "manager"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let table: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(table.as_object().unwrap().len(), 1);
    assert_eq!(table["manager"]["visibility"], "all");
    assert!(table["manager"]["actions"]
        .as_array()
        .unwrap()
        .contains(&serde_json::json!("review_analysis")));
}

#[test]
fn capabilities_rejects_unknown_role() {
    postmortem()
        .args(["capabilities", "--role", "intern"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown role"));
}
