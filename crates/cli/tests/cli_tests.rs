//! CLI integration tests

use mockito::{Matcher, Server};
use std::process::{Command, Output};

fn emctl(api_url: &str, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_emctl"))
        .arg("--api-url")
        .arg(api_url)
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute emctl")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

const MONITOR_LIST: &str = r#"{
    "stream": "connected",
    "monitors": [
        {"measurement": {"id": 5001, "kind": "traceroute", "target": "k.root-servers.net"}, "state": "running"},
        {"measurement": {"id": 5004, "kind": "traceroute"}, "state": "restarting"}
    ]
}"#;

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_emctl"))
        .arg("--help")
        .output()
        .expect("Failed to execute emctl");

    let text = stdout(&output);
    assert!(output.status.success(), "CLI help should succeed");
    assert!(text.contains("Edge Latency Monitor"), "Should show app name");
    assert!(text.contains("monitors"), "Should show monitors command");
    assert!(text.contains("feedback"), "Should show feedback command");
    assert!(text.contains("detect"), "Should show detect command");
    assert!(text.contains("status"), "Should show status command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_emctl"))
        .arg("--version")
        .output()
        .expect("Failed to execute emctl");

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout(&output).contains("emctl"), "Should show binary name");
}

#[test]
fn test_monitors_list_table() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/api/v1/monitors")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(MONITOR_LIST)
        .create();

    let output = emctl(&server.url(), &["monitors", "list"]);

    mock.assert();
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Stream: connected"));
    assert!(text.contains("5001"));
    assert!(text.contains("k.root-servers.net"));
    assert!(text.contains("restarting"));
    assert!(text.contains("Total: 2 monitors"));
}

#[test]
fn test_monitors_list_json() {
    let mut server = Server::new();
    server
        .mock("GET", "/api/v1/monitors")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(MONITOR_LIST)
        .create();

    let output = emctl(&server.url(), &["--format", "json", "monitors", "list"]);

    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["monitors"][1]["measurement"]["id"], 5004);
    assert_eq!(value["stream"], "connected");
}

#[test]
fn test_create_monitor_sends_request() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/api/v1/monitors")
        .match_body(Matcher::Json(serde_json::json!({
            "measurement_id": 5001,
            "kind": "traceroute",
            "target": "k.root-servers.net"
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"measurement_id": 5001, "outcome": "created"}"#)
        .create();

    let output = emctl(
        &server.url(),
        &["monitors", "create", "5001", "--target", "k.root-servers.net"],
    );

    mock.assert();
    assert!(output.status.success());
    assert!(stdout(&output).contains("Monitoring measurement 5001"));
}

#[test]
fn test_create_bulk() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/api/v1/monitors/bulk")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "measurements": [
                {"measurement_id": 1, "kind": "traceroute"},
                {"measurement_id": 2, "kind": "traceroute"}
            ]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"created": [2]}"#)
        .create();

    let output = emctl(&server.url(), &["monitors", "create-bulk", "1", "2"]);

    mock.assert();
    assert!(output.status.success());
    assert!(stdout(&output).contains("Created 1 of 2 monitors: 2"));
}

#[test]
fn test_stop_monitor() {
    let mut server = Server::new();
    let mock = server
        .mock("DELETE", "/api/v1/monitors/5001")
        .with_status(204)
        .create();

    let output = emctl(&server.url(), &["monitors", "stop", "5001"]);

    mock.assert();
    assert!(output.status.success());
    assert!(stdout(&output).contains("Stopped monitoring measurement 5001"));
}

#[test]
fn test_feedback_unknown_measurement_fails() {
    let mut server = Server::new();
    server
        .mock("POST", "/api/v1/monitors/42/feedback")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": "measurement 42 is not monitored"}"#)
        .create();

    let output = emctl(&server.url(), &["feedback", "42"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("measurement 42 is not monitored"));
}

#[test]
fn test_detect_shows_alerts() {
    let mut server = Server::new();
    server
        .mock("POST", "/api/v1/monitors/5001/detect")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"measurement_id": 5001, "alerts": [{
                "measurement_id": 5001,
                "as_number": 1103,
                "bucket_start": "2023-11-14T22:40:00Z",
                "score": 50.0,
                "notify": true,
                "flagged_probes": 3,
                "distinct_probes": 6,
                "description": "Increase in RTT in neighboring AS1103: 3 of 6 probes affected"
            }]}"#,
        )
        .create();

    let output = emctl(&server.url(), &["detect", "5001"]);

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("AS1103"));
    assert!(text.contains("2023-11-14 22:40 UTC"));
    assert!(text.contains("50.00%"));
    assert!(text.contains("3/6"));
}

#[test]
fn test_status_reports_unhealthy_daemon() {
    let mut server = Server::new();
    server
        .mock("GET", "/healthz")
        .with_status(503)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"status": "unhealthy", "components": {
                "stream": {"status": "unhealthy", "message": "connection refused", "last_check_timestamp": 1700000000}
            }}"#,
        )
        .create();
    server
        .mock("GET", "/readyz")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ready": true}"#)
        .create();
    server
        .mock("GET", "/api/v1/monitors")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"stream": "disconnected", "monitors": []}"#)
        .create();

    let output = emctl(&server.url(), &["status"]);

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Health:    unhealthy"));
    assert!(text.contains("Stream:    disconnected"));
    assert!(text.contains("connection refused"));
}
