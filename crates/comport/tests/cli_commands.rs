#![cfg(all(unix, feature = "cli"))]

use std::process::{Command, Output};

const MISSING_DEV: &str = "/nonexistent/comport-tty";
// Nothing listens on port 1, so bus connections are refused at once.
const DEAD_BUS_PORT: &str = "1";

fn comport(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_comport"))
        .env_remove("COMPORT_DEV")
        .env_remove("COMPORT_REDIS_HOST")
        .env_remove("COMPORT_REDIS_PORT")
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("comport should run")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn version_prints_package_version() {
    let output = comport(&["version"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        stdout(&output).trim(),
        format!("comport {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn extended_version_lists_features() {
    let output = comport(&["version", "--extended"]);
    assert_eq!(output.status.code(), Some(0));
    let text = stdout(&output);
    assert!(text.contains("name: comport"));
    assert!(text.contains("features: serial=true, redis=true, cli=true"));
}

#[test]
fn self_test_without_device_or_bus_fails_health_check() {
    let output = comport(&[
        "--format",
        "json",
        "test",
        "--dev",
        MISSING_DEV,
        "--redisport",
        DEAD_BUS_PORT,
    ]);
    assert_eq!(output.status.code(), Some(30), "stderr: {}", stderr(&output));

    let report: serde_json::Value =
        serde_json::from_str(stdout(&output).trim()).expect("report should be JSON");
    assert_eq!(report["overall"], "fail");
    assert_eq!(report["device"], MISSING_DEV);

    let checks = report["checks"].as_array().expect("checks should be a list");
    let status_of = |name: &str| {
        checks
            .iter()
            .find(|check| check["name"] == name)
            .map(|check| check["status"].clone())
            .expect("check should be present")
    };
    assert_eq!(status_of("bus_reachable"), "fail");
    assert_eq!(status_of("serial_open"), "fail");
    assert_eq!(status_of("device_query"), "skip");
}

#[test]
fn raw_probe_without_device_is_transport_error() {
    let output = comport(&["raw", "--dev", MISSING_DEV, "I"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("device open failed"));
}

#[test]
fn run_without_device_is_transport_error() {
    let output = comport(&["run", "--dev", MISSING_DEV, "--redisport", DEAD_BUS_PORT]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn onewire_alias_without_device_is_transport_error() {
    let output = comport(&["1wire", "--dev", MISSING_DEV, "--redisport", DEAD_BUS_PORT]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn send_to_unreachable_bus_is_transport_error() {
    let output = comport(&[
        "send",
        "I",
        "--to",
        "127.0.0.1:/dev/ttyUSB0",
        "--redisport",
        DEAD_BUS_PORT,
    ]);
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("publish failed"));
}

#[test]
fn monitor_with_unreachable_bus_is_transport_error() {
    let output = comport(&["monitor", "--redisport", DEAD_BUS_PORT]);
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("bus unreachable"));
}

#[test]
fn invalid_wait_timeout_is_usage_error() {
    let output = comport(&["send", "I", "--wait", "--wait-timeout", "0s"]);
    assert_eq!(output.status.code(), Some(64));
    assert!(stderr(&output).contains("duration must be greater than zero"));
}

#[test]
fn unknown_subcommand_is_rejected() {
    let output = comport(&["listen"]);
    assert_eq!(output.status.code(), Some(2));
}
