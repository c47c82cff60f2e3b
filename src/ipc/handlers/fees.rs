use log::warn;
use serde_json::json;

use crate::calc::{self, DueStatus, StoredDue};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err, db_conn, load_user, now_rfc3339, optional_f64, optional_id_array, optional_str,
    required_str,
};
use crate::ipc::types::{AppState, Request};

fn handle_fees_recalculate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState {
        db, student_cache, ..
    } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let month_raw = match required_str(req, "month") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (year, month) = match calc::parse_month_key(&month_raw) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let student_ids = match optional_id_array(req, "studentIds") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(ref ids) = student_ids {
        if ids.is_empty() {
            return err(
                &req.id,
                "bad_params",
                "studentIds must contain at least one id when present",
                None,
            );
        }
    }

    let now = now_rfc3339();
    let outcome = match calc::recalculate_fees(
        conn,
        student_cache,
        student_ids.as_deref(),
        year,
        month,
        &now,
    ) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    ok(
        &req.id,
        json!({
            "month": outcome.month_key,
            "total": outcome.total,
            "processed": outcome.processed,
            "skippedInactive": outcome.skipped_inactive,
            "failed": outcome.failed,
            "progress": {
                "current": outcome.processed + outcome.failed.len(),
                "total": outcome.total,
            }
        }),
    )
}

fn handle_fees_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let month_key = match optional_str(req, "monthKey") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student = match load_user(conn, &student_id) {
        Ok(Some(u)) if u.role == "student" => u,
        Ok(_) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return calc_err(req, e),
    };

    match month_key {
        Some(key) => {
            if let Err(e) = calc::parse_month_key(&key) {
                return calc_err(req, e);
            }
            let entry = match calc::read_due_row(conn, &student_id, &key) {
                Ok(v) => v.map(StoredDue::normalize),
                Err(e) => return calc_err(req, e),
            };
            ok(
                &req.id,
                json!({
                    "studentId": student_id,
                    "monthKey": key,
                    "due": entry,
                }),
            )
        }
        None => {
            let rows = match calc::read_all_due_rows(conn, &student_id) {
                Ok(v) => v,
                Err(e) => return calc_err(req, e),
            };
            let mut total_due_by_month = serde_json::Map::new();
            for (key, stored) in rows {
                let entry = stored.normalize();
                total_due_by_month.insert(key, json!(entry));
            }
            ok(
                &req.id,
                json!({
                    "studentId": student_id,
                    "studentName": student.display_name,
                    "totalDueByMonth": total_due_by_month,
                }),
            )
        }
    }
}

fn handle_fees_mark_paid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let month_key = match required_str(req, "monthKey") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = calc::parse_month_key(&month_key) {
        return calc_err(req, e);
    }
    let amount = match optional_f64(req, "amount") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(a) = amount {
        if a < 0.0 {
            return err(&req.id, "bad_params", "amount must not be negative", None);
        }
    }

    match load_user(conn, &student_id) {
        Ok(Some(u)) if u.role == "student" => {}
        Ok(_) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return calc_err(req, e),
    }

    let entry = match calc::read_due_row(conn, &student_id, &month_key) {
        Ok(Some(stored)) => stored.normalize(),
        Ok(None) => {
            return err(
                &req.id,
                "failed_precondition",
                "no due amount found for this month; recalculate fees first",
                None,
            )
        }
        Err(e) => return calc_err(req, e),
    };
    if entry.status == DueStatus::Paid {
        return err(
            &req.id,
            "failed_precondition",
            "due is already marked paid",
            Some(json!({ "paymentDate": entry.payment_date })),
        );
    }

    let now = now_rfc3339();
    let amount_paid = amount.unwrap_or(entry.due);
    if let Err(e) = conn.execute(
        "UPDATE monthly_dues SET status = 'paid', payment_date = ?, amount_paid = ?
         WHERE student_id = ? AND month_key = ?",
        (&now, amount_paid, &student_id, &month_key),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    // Payment marking drives the rollups. Best-effort: the payment stands
    // even when aggregation fails, and the caller may re-trigger it.
    let mut revenue_aggregated = false;
    match calc::aggregate_month_revenue(conn, &month_key, &now) {
        Ok(_) => revenue_aggregated = true,
        Err(e) => warn!(
            "revenue aggregation after payment failed for {}: {}",
            month_key, e.message
        ),
    }

    let updated = match calc::read_due_row(conn, &student_id, &month_key) {
        Ok(v) => v.map(StoredDue::normalize),
        Err(e) => return calc_err(req, e),
    };
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "monthKey": month_key,
            "due": updated,
            "revenueAggregated": revenue_aggregated,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.recalculate" => Some(handle_fees_recalculate(state, req)),
        "fees.get" => Some(handle_fees_get(state, req)),
        "fees.markPaid" => Some(handle_fees_mark_paid(state, req)),
        _ => None,
    }
}
