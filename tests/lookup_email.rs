mod test_support;

use serde_json::json;
use test_support::{
    error_code, request_err, request_ok, select_workspace, spawn_sidecar, temp_dir,
};

#[test]
fn lookup_covers_the_full_error_taxonomy() {
    let workspace = temp_dir("feebook-lookup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "1", &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({
            "username": "Asha",
            "displayName": "Asha Rao",
            "role": "student",
            "email": "asha@example.org",
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({ "username": "binh", "displayName": "Binh Tran", "role": "student" }),
    );

    // Happy path, with surrounding whitespace trimmed.
    let found = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.lookupEmail",
        json!({ "username": "  Asha  " }),
    );
    assert_eq!(
        found.get("email").and_then(|v| v.as_str()),
        Some("asha@example.org")
    );

    // The lookup is case-sensitive.
    let wrong_case = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "auth.lookupEmail",
        json!({ "username": "asha" }),
    );
    assert_eq!(error_code(&wrong_case), "not_found");

    let no_match = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "auth.lookupEmail",
        json!({ "username": "nobody" }),
    );
    assert_eq!(error_code(&no_match), "not_found");

    let no_email = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "auth.lookupEmail",
        json!({ "username": "binh" }),
    );
    assert_eq!(error_code(&no_email), "failed_precondition");

    let empty = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "auth.lookupEmail",
        json!({ "username": "   " }),
    );
    assert_eq!(error_code(&empty), "invalid_argument");

    let too_long = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "auth.lookupEmail",
        json!({ "username": "x".repeat(101) }),
    );
    assert_eq!(error_code(&too_long), "invalid_argument");
}
