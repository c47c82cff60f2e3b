use rusqlite::OptionalExtension;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};

const MAX_USERNAME_LEN: usize = 100;

/// Username-to-email lookup for the login flow. Case-sensitive over the
/// trimmed username.
fn handle_lookup_email(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if username.is_empty() {
        return err(&req.id, "invalid_argument", "username must not be empty", None);
    }
    if username.len() > MAX_USERNAME_LEN {
        return err(&req.id, "invalid_argument", "username is too long", None);
    }

    let row: Option<Option<String>> = match conn
        .query_row(
            "SELECT email FROM users WHERE username = ?",
            [&username],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "internal", e.to_string(), None),
    };

    match row {
        None => err(&req.id, "not_found", "no account for that username", None),
        Some(None) => err(
            &req.id,
            "failed_precondition",
            "account has no email on file",
            None,
        ),
        Some(Some(email)) if email.trim().is_empty() => err(
            &req.id,
            "failed_precondition",
            "account has no email on file",
            None,
        ),
        Some(Some(email)) => ok(&req.id, json!({ "email": email })),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.lookupEmail" => Some(handle_lookup_email(state, req)),
        _ => None,
    }
}
