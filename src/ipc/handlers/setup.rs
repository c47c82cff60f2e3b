use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_rfc3339, optional_str, required_str};
use crate::ipc::types::{AppState, Request};

/// One-shot creation of the first admin account, gated by the admin-setup
/// feature flag. Disabled deployments bootstrap their admin out of band.
fn handle_admin_bootstrap(state: &mut AppState, req: &Request) -> serde_json::Value {
    if !state.config.admin_setup_enabled {
        return err(&req.id, "permission_denied", "admin setup is disabled", None);
    }
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let display_name = match required_str(req, "displayName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match optional_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if username.is_empty() {
        return err(&req.id, "bad_params", "username must not be empty", None);
    }

    let existing_admin: Option<String> = match conn
        .query_row(
            "SELECT id FROM users WHERE role = 'admin' LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing_admin.is_some() {
        return err(
            &req.id,
            "failed_precondition",
            "an admin account already exists",
            None,
        );
    }

    let taken: Option<String> = match conn
        .query_row("SELECT id FROM users WHERE username = ?", [&username], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(&req.id, "conflict", "username is already in use", None);
    }

    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, username, display_name, email, role, monthly_fee, active, created_at)
         VALUES(?, ?, ?, ?, 'admin', 0, 1, ?)",
        (&id, &username, &display_name, &email, &now),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "id": id,
            "username": username,
            "displayName": display_name,
            "email": email,
            "role": "admin",
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.adminBootstrap" => Some(handle_admin_bootstrap(state, req)),
        _ => None,
    }
}
