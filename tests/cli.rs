//! Exit codes and output of the stackpulse binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn stackpulse() -> Command {
    let mut cmd = Command::cargo_bin("stackpulse").unwrap();
    cmd.arg("--no-config").arg("--log-level").arg("off");
    cmd
}

#[test]
fn test_watch_without_target_fails() {
    stackpulse()
        .arg("watch")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("must specify either --pid or --port"));
}

#[test]
fn test_watch_with_pid_and_port_fails() {
    stackpulse()
        .args(["watch", "--pid", "1", "--port", "3000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("mutually exclusive"));
}

#[test]
fn test_cpu_threshold_out_of_range_fails() {
    stackpulse()
        .args(["watch", "--pid", "1", "--cpu-threshold", "150"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CPU threshold"));
}

#[test]
fn test_invalid_heap_limit_fails() {
    stackpulse()
        .args(["status", "--pid", "1", "--heap-limit", "lots"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid heap limit"));
}

#[test]
fn test_unresolvable_port_fails() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    stackpulse()
        .args(["status", "--port", &port.to_string(), "--no-inspector"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no process listening"));
}

#[test]
fn test_config_to_stdout() {
    stackpulse()
        .args(["config", "-o", "-", "--commented"])
        .assert()
        .success()
        .stdout(predicate::str::contains("# stackpulse configuration"))
        .stdout(predicate::str::contains("polling_ms: 100"));
}

#[cfg(target_os = "linux")]
#[test]
fn test_status_of_own_process_as_json() {
    let pid = std::process::id().to_string();
    let output = stackpulse()
        .args(["status", "--pid", &pid, "--no-inspector", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let status: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(status["pid"].as_u64(), Some(u64::from(std::process::id())));
    assert_eq!(status["snapshot"]["eventLoop"]["measured"], false);
}
