mod test_support;

use serde_json::json;
use test_support::{error_code, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn health_reports_version_and_flags() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health
        .get("version")
        .and_then(|v| v.as_str())
        .map(|v| !v.is_empty())
        .unwrap_or(false));
    assert_eq!(
        health.get("workspacePath").cloned(),
        Some(serde_json::Value::Null)
    );
    assert_eq!(
        health.get("adminSetupEnabled").and_then(|v| v.as_bool()),
        Some(false)
    );
}

#[test]
fn unknown_method_is_not_implemented() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let error = request_err(&mut stdin, &mut reader, "1", "bogus.method", json!({}));
    assert_eq!(error_code(&error), "not_implemented");
}

#[test]
fn workspace_is_required_before_domain_methods() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    for (i, method) in [
        "users.list",
        "attendance.monthOpen",
        "fees.recalculate",
        "revenue.backfill",
        "analytics.revenue.open",
        "auth.lookupEmail",
    ]
    .iter()
    .enumerate()
    {
        let error = request_err(
            &mut stdin,
            &mut reader,
            &format!("{}", i + 1),
            method,
            json!({ "month": "2025-09", "username": "x" }),
        );
        assert_eq!(error_code(&error), "no_workspace", "method {}", method);
    }
}

#[test]
fn workspace_select_round_trips() {
    let workspace = temp_dir("feebook-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(
        selected.get("workspacePath").and_then(|v| v.as_str()),
        Some(workspace.to_string_lossy().as_ref())
    );
    let health = request_ok(&mut stdin, &mut reader, "2", "health", json!({}));
    assert_eq!(
        health.get("workspacePath").and_then(|v| v.as_str()),
        Some(workspace.to_string_lossy().as_ref())
    );
}
