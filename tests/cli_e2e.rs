//! End-to-end CLI tests for twcs.
//!
//! These tests run the actual twcs binary against a fixture upstream and a
//! temporary database, and verify:
//! - Command-line interface behavior
//! - Output format and content
//! - Error handling and messages
//!
//! # Test Organization
//!
//! - `test_run_*` - Full pipeline runs
//! - `test_rank_*` / `test_status_*` / `test_show_*` - Read-only commands
//! - `test_config_*` - Configuration command
//! - `test_cli_*` - General CLI tests (flags, help, version)

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

/// Log a test event with timestamp
macro_rules! test_log {
    ($($arg:tt)*) => {
        let timestamp = chrono::Utc::now().format("%H:%M:%S%.3f");
        eprintln!("[TEST {}] {}", timestamp, format!($($arg)*));
    };
}

const FIXTURE: &str = r#"{
  "timelines": {
    "support": [
      {
        "id_str": "1001",
        "created_at": "Wed Oct 10 20:19:24 +0000 2018",
        "full_text": "@customer Sorry about that, please DM us your order number.",
        "in_reply_to_status_id_str": "1000",
        "in_reply_to_screen_name": "customer",
        "user": {"id_str": "10", "screen_name": "Support"}
      },
      {
        "id_str": "1002",
        "created_at": "Wed Oct 10 21:00:00 +0000 2018",
        "full_text": "@other We are looking into the outage and will share…",
        "truncated": true,
        "user": {"id_str": "10", "screen_name": "Support"}
      }
    ]
  },
  "searches": {
    "support": [
      {
        "id_str": "2001",
        "created_at": "Wed Oct 10 19:00:00 +0000 2018",
        "full_text": "@support my package never arrived",
        "user": {"id_str": "20", "screen_name": "customer"}
      }
    ]
  },
  "statuses": [
    {
      "id_str": "1002",
      "created_at": "Wed Oct 10 21:00:00 +0000 2018",
      "full_text": "@other We are looking into the outage and will share an update within the hour.",
      "user": {"id_str": "10", "screen_name": "Support"}
    }
  ]
}"#;

/// A workspace with an empty config file, a fixture, and a database path.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        fs::write(dir.path().join("config.toml"), "").expect("Failed to write config");
        fs::write(dir.path().join("fixture.json"), FIXTURE).expect("Failed to write fixture");
        Self { dir }
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("twcs.db")
    }

    fn fixture(&self) -> PathBuf {
        self.dir.path().join("fixture.json")
    }

    /// twcs command isolated from the user's config and environment.
    fn cmd(&self) -> Command {
        let mut cmd = twcs_cmd();
        for var in [
            "TWCS_DB",
            "TWCS_SCREEN_NAMES",
            "MONITORED_SCREEN_NAMES",
            "TWCS_QUOTA",
            "TWCS_BASE_URL",
            "TWCS_BEARER_TOKEN",
            "RUST_LOG",
            "LOG_LEVEL",
        ] {
            cmd.env_remove(var);
        }
        cmd.env("NO_COLOR", "1")
            .env("TWCS_CONFIG", self.dir.path().join("config.toml"))
            .arg("--db")
            .arg(self.db());
        cmd
    }

    fn run_fixture(&self) {
        self.cmd()
            .args(["run", "--screen-names", "support", "--fixture"])
            .arg(self.fixture())
            .assert()
            .success();
    }
}

fn twcs_cmd() -> Command {
    cargo_bin_cmd!("twcs")
}

fn json_stdout(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is not valid JSON")
}

// =============================================================================
// Run Command Tests
// =============================================================================

#[test]
fn test_run_with_fixture_text_output() {
    test_log!("Starting test_run_with_fixture_text_output");
    let start = Instant::now();
    let ws = Workspace::new();

    ws.cmd()
        .args(["run", "--screen-names", "@Support", "--fixture"])
        .arg(ws.fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("Run complete"))
        .stdout(predicate::str::contains("@support"))
        .stdout(predicate::str::contains("Orphan Resolution"))
        .stdout(predicate::str::contains("Truncation Repair"));

    assert!(ws.db().exists());
    test_log!("Test completed in {:?}", start.elapsed());
}

#[test]
fn test_run_with_fixture_json_output() {
    test_log!("Starting test_run_with_fixture_json_output");
    let ws = Workspace::new();

    let output = ws
        .cmd()
        .args(["--format", "json", "run", "--screen-names", "support", "--fixture"])
        .arg(ws.fixture())
        .output()
        .expect("Failed to run twcs");
    assert!(output.status.success());

    let summary = json_stdout(&output);
    assert_eq!(summary["ranked"], serde_json::json!(["support"]));
    let account = &summary["collection"]["accounts"][0];
    assert_eq!(account["screen_name"], "support");
    assert_eq!(account["replies"]["status"], "completed");
    assert_eq!(account["replies"]["stored"], 2);
    assert_eq!(account["mentions"]["stored"], 1);
    assert_eq!(summary["orphans"]["marked_inaccessible"], 1);
    assert_eq!(summary["truncation"]["repaired"], 1);
}

#[test]
fn test_run_skip_repair() {
    let ws = Workspace::new();

    let output = ws
        .cmd()
        .args(["-f", "json", "run", "--skip-repair", "--screen-names", "support", "--fixture"])
        .arg(ws.fixture())
        .output()
        .expect("Failed to run twcs");
    assert!(output.status.success());

    let summary = json_stdout(&output);
    assert!(summary["orphans"].is_null());
    assert!(summary["truncation"].is_null());
}

#[test]
fn test_run_without_screen_names_fails() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["run", "--fixture"])
        .arg(ws.fixture())
        .assert()
        .failure()
        .stderr(predicate::str::contains("No monitored screen names"));
}

#[test]
fn test_run_screen_names_from_env() {
    let ws = Workspace::new();

    let output = ws
        .cmd()
        .env("MONITORED_SCREEN_NAMES", "support, other")
        .args(["-f", "json", "run", "--quota", "1", "--fixture"])
        .arg(ws.fixture())
        .output()
        .expect("Failed to run twcs");
    assert!(output.status.success());

    let summary = json_stdout(&output);
    assert_eq!(summary["ranked"].as_array().map(Vec::len), Some(2));
    assert_eq!(summary["collection"]["quota"], 1);
    assert_eq!(summary["collection"]["accounts"].as_array().map(Vec::len), Some(1));
}

#[test]
fn test_run_without_token_fails() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["run", "--screen-names", "support"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Missing credential"));
}

#[test]
fn test_run_invalid_quota_env_fails() {
    let ws = Workspace::new();

    ws.cmd()
        .env("TWCS_QUOTA", "lots")
        .args(["run", "--screen-names", "support", "--fixture"])
        .arg(ws.fixture())
        .assert()
        .failure()
        .stderr(predicate::str::contains("TWCS_QUOTA"));
}

// =============================================================================
// Read-only Command Tests
// =============================================================================

#[test]
fn test_rank_json_output() {
    let ws = Workspace::new();
    ws.run_fixture();

    let output = ws
        .cmd()
        .args(["-f", "json", "rank", "--screen-names", "newcomer,support"])
        .output()
        .expect("Failed to run twcs");
    assert!(output.status.success());

    let ranked = json_stdout(&output);
    let ranked = ranked.as_array().expect("rank output is an array");
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0]["screen_name"], "support");
    assert!(ranked[0]["weight"].is_number());
    assert_eq!(ranked[1]["screen_name"], "newcomer");
    assert!(ranked[1]["weight"].is_null());
}

#[test]
fn test_status_counts() {
    let ws = Workspace::new();
    ws.run_fixture();

    let output = ws
        .cmd()
        .args(["-f", "json", "status"])
        .output()
        .expect("Failed to run twcs");
    assert!(output.status.success());

    let status = json_stdout(&output);
    assert_eq!(status["counts"]["messages"], 3);
    assert_eq!(status["counts"]["fetch_attempts"], 2);
    assert_eq!(status["counts"]["inaccessible"], 1);
    assert_eq!(status["counts"]["truncated"], 0);
    assert_eq!(status["accounts"][0]["screen_name"], "support");
    assert!(status["accounts"][0]["last_replies"].is_string());

    ws.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Store Status"))
        .stdout(predicate::str::contains("@support"));
}

#[test]
fn test_status_without_database_fails() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No database found"));
}

#[test]
fn test_show_message() {
    let ws = Workspace::new();
    ws.run_fixture();

    ws.cmd()
        .args(["show", "1002"])
        .assert()
        .success()
        .stdout(predicate::str::contains("within the hour"))
        .stdout(predicate::str::contains("@support"));

    ws.cmd()
        .args(["show", "1001", "--raw"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"in_reply_to_status_id_str\""));

    ws.cmd()
        .args(["show", "999"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// =============================================================================
// Config Command Tests
// =============================================================================

#[test]
fn test_config_get_key() {
    let ws = Workspace::new();
    fs::write(
        ws.dir.path().join("config.toml"),
        "[collect]\nquota = 42\n",
    )
    .expect("Failed to write config");

    ws.cmd()
        .args(["config", "--get", "collect.quota"])
        .assert()
        .success()
        .stdout(predicate::str::diff("42\n"));
}

#[test]
fn test_config_get_unknown_key_suggests() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["config", "--get", "collect.qouta"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Did you mean"))
        .stderr(predicate::str::contains("collect.quota"));
}

#[test]
fn test_config_invalid_file_fails() {
    let ws = Workspace::new();
    fs::write(ws.dir.path().join("config.toml"), "[collect\nquota = ")
        .expect("Failed to write config");

    ws.cmd()
        .args(["config", "--show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

// =============================================================================
// General CLI Tests
// =============================================================================

#[test]
fn test_cli_help() {
    twcs_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("repair"));
}

#[test]
fn test_cli_version() {
    twcs_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("twcs"));
}

#[test]
fn test_cli_completions() {
    twcs_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("twcs"));
}

#[test]
fn test_cli_unknown_command() {
    twcs_cmd().arg("harvest").assert().failure();
}
