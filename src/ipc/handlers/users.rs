use log::info;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err, db_conn, load_user, now_rfc3339, optional_bool, optional_f64, optional_str,
    required_str, user_json,
};
use crate::ipc::types::{AppState, Request};

const ROLES: &[&str] = &["student", "teacher", "admin"];

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let role = match required_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match optional_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let monthly_fee = match optional_f64(req, "monthlyFee") {
        Ok(v) => v.unwrap_or(0.0),
        Err(e) => return e,
    };

    if username.is_empty() {
        return err(&req.id, "bad_params", "username must not be empty", None);
    }
    if !ROLES.contains(&role.as_str()) {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: student, teacher, admin",
            Some(json!({ "role": role })),
        );
    }
    if monthly_fee < 0.0 {
        return err(&req.id, "bad_params", "monthlyFee must not be negative", None);
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
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (&id, &username, &display_name, &email, &role, monthly_fee, &now),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    match load_user(conn, &id) {
        Ok(Some(u)) => ok(&req.id, json!({ "user": user_json(&u) })),
        Ok(None) => err(&req.id, "internal", "created user not found", None),
        Err(e) => calc_err(req, e),
    }
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match optional_str(req, "role") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(ref r) = role {
        if !ROLES.contains(&r.as_str()) {
            return err(
                &req.id,
                "bad_params",
                "role must be one of: student, teacher, admin",
                Some(json!({ "role": r })),
            );
        }
    }
    let include_inactive = match optional_bool(req, "includeInactive") {
        Ok(v) => v.unwrap_or(false),
        Err(e) => return e,
    };

    let mut sql = String::from(
        "SELECT id, username, display_name, email, role, monthly_fee, active, created_at, updated_at
         FROM users WHERE 1=1",
    );
    let mut params: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(r) = role {
        sql.push_str(" AND role = ?");
        params.push(rusqlite::types::Value::Text(r));
    }
    if !include_inactive {
        sql.push_str(" AND active = 1");
    }
    sql.push_str(" ORDER BY username");

    let mut stmt = match conn.prepare(&sql) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map(rusqlite::params_from_iter(params), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "username": r.get::<_, String>(1)?,
                "displayName": r.get::<_, String>(2)?,
                "email": r.get::<_, Option<String>>(3)?,
                "role": r.get::<_, String>(4)?,
                "monthlyFee": r.get::<_, f64>(5)?,
                "active": r.get::<_, i64>(6)? != 0,
                "createdAt": r.get::<_, String>(7)?,
                "updatedAt": r.get::<_, Option<String>>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "users": rows }))
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState {
        db, student_cache, ..
    } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let display_name = match optional_str(req, "displayName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match optional_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let monthly_fee = match optional_f64(req, "monthlyFee") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(fee) = monthly_fee {
        if fee < 0.0 {
            return err(&req.id, "bad_params", "monthlyFee must not be negative", None);
        }
    }
    if display_name.is_none() && email.is_none() && monthly_fee.is_none() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    let existing = match load_user(conn, &user_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return calc_err(req, e),
    };

    let now = now_rfc3339();
    let res = conn.execute(
        "UPDATE users SET display_name = ?, email = ?, monthly_fee = ?, updated_at = ? WHERE id = ?",
        (
            display_name.as_deref().unwrap_or(&existing.display_name),
            email.as_deref().or(existing.email.as_deref()),
            monthly_fee.unwrap_or(existing.monthly_fee),
            &now,
            &user_id,
        ),
    );
    if let Err(e) = res {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    student_cache.invalidate(&user_id);

    match load_user(conn, &user_id) {
        Ok(Some(u)) => ok(&req.id, json!({ "user": user_json(&u) })),
        Ok(None) => err(&req.id, "internal", "updated user not found", None),
        Err(e) => calc_err(req, e),
    }
}

fn handle_users_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState {
        db, student_cache, ..
    } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let active = match optional_bool(req, "active") {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "bad_params", "missing active", None),
        Err(e) => return e,
    };

    let now = now_rfc3339();
    let changed = match conn.execute(
        "UPDATE users SET active = ?, updated_at = ? WHERE id = ?",
        (active as i64, &now, &user_id),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "user not found", None);
    }
    student_cache.invalidate(&user_id);
    info!(
        "user {} marked {}",
        user_id,
        if active { "active" } else { "discontinued" }
    );

    ok(&req.id, json!({ "ok": true, "active": active }))
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState {
        db, student_cache, ..
    } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let existing = match load_user(conn, &user_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return calc_err(req, e),
    };

    // Account deletion cascades to everything hanging off the user.
    let tx = match conn.unchecked_transaction() {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for sql in [
        "DELETE FROM attendance WHERE student_id = ?",
        "DELETE FROM monthly_dues WHERE student_id = ?",
        "DELETE FROM teacher_monthly_summaries WHERE teacher_id = ?",
        "DELETE FROM users WHERE id = ?",
    ] {
        if let Err(e) = tx.execute(sql, [&user_id]) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    student_cache.invalidate(&user_id);
    info!("deleted {} account {}", existing.role, user_id);

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.setActive" => Some(handle_users_set_active(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        _ => None,
    }
}
