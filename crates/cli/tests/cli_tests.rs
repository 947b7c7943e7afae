//! CLI integration tests

use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the binary with an empty home so no user config leaks in
fn spa(args: &[&str]) -> (Output, TempDir) {
    let home = TempDir::new().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_spa"))
        .args(args)
        .env("HOME", home.path())
        .env("NO_COLOR", "1")
        .env_remove("SPA_API_URL")
        .output()
        .expect("Failed to execute command");
    (output, home)
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let (output, _home) = spa(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Student Performance Analyzer"), "Should show app name");
    assert!(stdout.contains("predict"), "Should show predict command");
    assert!(stdout.contains("predict-legacy"), "Should show predict-legacy command");
    assert!(stdout.contains("health"), "Should show health command");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("SPA_API_URL"), "Should show env var");
    assert!(stdout.contains("--format"), "Should show format option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let (output, _home) = spa(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("spa"), "Should show binary name");
}

#[test]
fn test_predict_help() {
    let (output, _home) = spa(&["predict", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for flag in ["--age", "--name", "--department", "--period", "--model", "--top"] {
        assert!(stdout.contains(flag), "Should show {} option", flag);
    }
}

#[test]
fn test_predict_legacy_help() {
    let (output, _home) = spa(&["predict-legacy", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for flag in ["--age", "--internal", "--previous", "--attendance"] {
        assert!(stdout.contains(flag), "Should show {} option", flag);
    }
}

/// Period arguments are validated before any request is made
#[test]
fn test_invalid_period_is_rejected() {
    let (output, _home) = spa(&["predict", "--age", "18", "--period", "9:100:100:80"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("period index 9"), "{}", stderr);
}

#[test]
fn test_missing_period_is_rejected() {
    let (output, _home) = spa(&["predict", "--age", "18"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("required") || stderr.contains("error"));
}

#[test]
fn test_out_of_range_age_is_rejected() {
    let (output, _home) = spa(&["predict", "--age", "40", "--period", "1:100:100:80"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("age 40"), "{}", stderr);
}

#[test]
fn test_predict_against_server() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/predict")
        .match_query(mockito::Matcher::UrlEncoded(
            "model_type".into(),
            "ml".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "prediction": "Good",
                "confidence": 0.85,
                "model_used": "Random Forest + Rules",
                "feature_contributions": [
                    {"feature": "age", "value": 18.0, "contribution": 0.01},
                    {"feature": "period1_internal", "value": 140.0, "contribution": -0.12}
                ],
                "probabilities": [0.1, 0.6, 0.3],
                "explanation": "tree_shap",
                "rule_augmented": true,
                "timestamp": "2026-01-05T10:00:00Z"
            }"#,
        )
        .create();

    let url = server.url();
    let (output, _home) = spa(&[
        "--api-url",
        &url,
        "predict",
        "--name",
        "Asha",
        "--age",
        "18",
        "--period",
        "1:140:300:95",
    ]);
    mock.assert();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("Good"));
    assert!(stdout.contains("Random Forest + Rules"));
    assert!(stdout.contains("period1_internal"));
}

#[test]
fn test_server_error_detail_is_reported() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/predict")
        .match_query(mockito::Matcher::Any)
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail": "Artifacts for backend dl are unavailable"}"#)
        .create();

    let url = server.url();
    let (output, _home) = spa(&[
        "--api-url",
        &url,
        "predict-legacy",
        "--age",
        "19",
        "--internal",
        "70",
        "--previous",
        "65",
        "--attendance",
        "80",
        "--model",
        "dl",
    ]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("400"), "{}", stderr);
    assert!(stderr.contains("unavailable"), "{}", stderr);
}

#[test]
fn test_health_json() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/healthz")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"status": "degraded", "components": {
                "neural_backend": {"status": "degraded", "message": "dl_model missing", "last_check_timestamp": 0}
            }}"#,
        )
        .create();

    let url = server.url();
    let (output, _home) = spa(&["--api-url", &url, "--format", "json", "health"]);

    assert!(output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["status"], "degraded");
}

#[test]
fn test_invalid_command() {
    let (output, _home) = spa(&["invalid-command"]);
    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error") || stderr.contains("invalid"));
}
