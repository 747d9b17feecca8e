//! Integration tests for the cordon binary.
//!
//! Each test invokes the `cordon` binary via `assert_cmd` and checks exit
//! codes and both output surfaces. Tests that would need privilege or burn
//! CPU stay in cordon-core where they are `#[ignore]`-gated.

#![allow(deprecated)] // cargo_bin deprecation; macro replacement not yet stable

use assert_cmd::Command;
use predicates::prelude::*;

/// Convenience: get a `Command` for the `cordon` binary.
fn cordon() -> Command {
    Command::cargo_bin("cordon").expect("cordon binary not found")
}

#[test]
fn echo_passes_through_and_exits_zero() {
    cordon()
        .args(["/bin/echo", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"))
        .stdout(predicate::str::contains("Starting command: /bin/echo hello"))
        .stdout(predicate::str::contains("Process exited normally with status 0"));
}

#[test]
fn human_lines_are_bracket_prefixed() {
    cordon()
        .args(["/bin/true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[cordon "))
        .stdout(predicate::str::contains("Child PID: "));
}

#[test]
fn target_exit_code_is_mirrored() {
    cordon()
        .args(["sh", "-c", "exit 7"])
        .assert()
        .code(7)
        .stdout(predicate::str::contains("Process exited normally with status 7"));
}

#[test]
fn policy_summary_echoes_the_limits() {
    cordon()
        .args(["--cpu=60", "--mem=256", "--no-net", "/bin/true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Active restrictions:"))
        .stdout(predicate::str::contains("CPU time: 60 seconds"))
        .stdout(predicate::str::contains("Memory: 256 MiB"))
        .stdout(predicate::str::contains("Network: disabled"));
}

#[test]
fn json_mode_emits_a_single_object() {
    let output = cordon()
        .args(["--json", "--cpu=60", "sh", "-c", "exit 0"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).unwrap();
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("stdout must be one JSON object");
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["success"], true);
    assert_eq!(json["limits"]["cpu_seconds"], 60);
    assert_eq!(json["installed"]["cpu_limit"], true);
    assert_eq!(json["limit_exceeded"]["cpu"], false);
}

#[test]
fn json_mode_reports_failures_faithfully() {
    let output = cordon()
        .args(["--json", "sh", "-c", "exit 5"])
        .assert()
        .code(5)
        .get_output()
        .clone();

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout must be one JSON object");
    assert_eq!(json["exit_code"], 5);
    assert_eq!(json["success"], false);
}

#[test]
fn signalled_target_reports_signal_name() {
    let output = cordon()
        .args(["--json", "sh", "-c", "kill -KILL $$"])
        .assert()
        .code(1)
        .get_output()
        .clone();

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["exit_code"], serde_json::Value::Null);
    assert_eq!(json["signal_number"], 9);
    assert_eq!(json["signal_name"], "SIGKILL");
}

#[test]
fn bad_jail_fails_before_any_child_runs() {
    let log_dir = tempfile::tempdir().unwrap();
    cordon()
        .env("CORDON_MONITOR_LOG_DIR", log_dir.path())
        .args(["--monitor", "--jail=/nonexistent", "/bin/true"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("/nonexistent"));

    // The aborted attempt must not have produced a monitor log.
    let leftovers = std::fs::read_dir(log_dir.path())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn missing_target_is_a_supervisor_failure() {
    cordon()
        .args(["no-such-binary-cordon-cli-test"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("command not found"));
}

#[test]
fn unknown_options_exit_with_usage() {
    cordon()
        .args(["--frobnicate", "/bin/true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn empty_invocation_exits_with_usage() {
    cordon().assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_prints_the_option_table() {
    cordon()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--cpu"))
        .stdout(predicate::str::contains("--jail"))
        .stdout(predicate::str::contains("--no-net"));
}

#[test]
fn double_dash_shields_hyphenated_targets() {
    cordon()
        .args(["--", "/bin/echo", "--cpu=9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--cpu=9"));
}

#[test]
fn monitor_writes_a_well_formed_session_log() {
    let log_dir = tempfile::tempdir().unwrap();

    cordon()
        .env("CORDON_MONITOR_LOG_DIR", log_dir.path())
        .args(["--monitor", "--monitor-interval=0.2", "sleep", "0.5"])
        .assert()
        .success();

    let log = std::fs::read_dir(log_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|e| e == "jsonl"))
        .expect("a monitor log must exist");

    let content = std::fs::read_to_string(&log).unwrap();
    let events: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(events.first().unwrap()["event"], "start");
    assert_eq!(events.last().unwrap()["event"], "stop");
    let starts = events.iter().filter(|e| e["event"] == "start").count();
    let stops = events.iter().filter(|e| e["event"] == "stop").count();
    assert_eq!((starts, stops), (1, 1));
    for pair in events.windows(2) {
        if pair[0]["event"] == "sample" && pair[1]["event"] == "sample" {
            assert!(pair[0]["timestamp"].as_str() <= pair[1]["timestamp"].as_str());
        }
    }
    // The supervisor's exit code is linked into the stop record.
    assert_eq!(events.last().unwrap()["exit_code"], 0);
}
