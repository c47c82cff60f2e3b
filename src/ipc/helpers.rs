use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;

use crate::calc::CalcError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be a string", key), None)),
    }
}

pub fn optional_f64(req: &Request, key: &str) -> Result<Option<f64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be a number", key), None)),
    }
}

pub fn optional_bool(req: &Request, key: &str) -> Result<Option<bool>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be a boolean", key), None)),
    }
}

/// Parses an optional array of non-empty string ids, deduplicated in order.
pub fn optional_id_array(
    req: &Request,
    key: &str,
) -> Result<Option<Vec<String>>, serde_json::Value> {
    let Some(raw) = req.params.get(key) else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(items) = raw.as_array() else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be an array of strings", key),
            None,
        ));
    };
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for v in items {
        let Some(id) = v.as_str() else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must contain only strings", key),
                None,
            ));
        };
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must not contain empty ids", key),
                None,
            ));
        }
        let owned = trimmed.to_string();
        if seen.insert(owned.clone()) {
            out.push(owned);
        }
    }
    Ok(Some(out))
}

pub fn calc_err(req: &Request, e: CalcError) -> serde_json::Value {
    err(
        &req.id,
        &e.code,
        e.message,
        e.details.map(|d| json!(d)).or(None),
    )
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub role: String,
    pub monthly_fee: f64,
    pub active: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

pub fn load_user(conn: &Connection, user_id: &str) -> Result<Option<UserRow>, CalcError> {
    conn.query_row(
        "SELECT id, username, display_name, email, role, monthly_fee, active, created_at, updated_at
         FROM users WHERE id = ?",
        [user_id],
        |r| {
            Ok(UserRow {
                id: r.get(0)?,
                username: r.get(1)?,
                display_name: r.get(2)?,
                email: r.get(3)?,
                role: r.get(4)?,
                monthly_fee: r.get(5)?,
                active: r.get::<_, i64>(6)? != 0,
                created_at: r.get(7)?,
                updated_at: r.get(8)?,
            })
        },
    )
    .optional()
    .map_err(|e| CalcError::new("db_query_failed", e.to_string()))
}

pub fn user_json(u: &UserRow) -> serde_json::Value {
    json!({
        "id": u.id,
        "username": u.username,
        "displayName": u.display_name,
        "email": u.email,
        "role": u.role,
        "monthlyFee": u.monthly_fee,
        "active": u.active,
        "createdAt": u.created_at,
        "updatedAt": u.updated_at,
    })
}

pub fn can_review(role: &str) -> bool {
    matches!(role, "teacher" | "admin")
}
