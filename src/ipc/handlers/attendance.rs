use chrono::{Datelike, NaiveDate};
use log::{info, warn};
use rusqlite::OptionalExtension;
use serde_json::json;

use crate::cache::load_student;
use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err, can_review, db_conn, load_user, now_rfc3339, optional_id_array, optional_str,
    required_str,
};
use crate::ipc::types::{AppState, Request};

fn parse_date(req: &Request, raw: &str) -> Result<NaiveDate, serde_json::Value> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| err(&req.id, "bad_params", "date must be YYYY-MM-DD", None))
}

fn record_json(
    id: &str,
    student_id: &str,
    student_name: &str,
    date: &str,
    status: &str,
    approved_by: Option<&str>,
    approved_at: Option<&str>,
) -> serde_json::Value {
    json!({
        "id": id,
        "studentId": student_id,
        "studentName": student_name,
        "date": date,
        "status": status,
        "approvedBy": approved_by,
        "approvedAt": approved_at,
    })
}

fn handle_attendance_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState {
        db, student_cache, ..
    } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date_raw = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match parse_date(req, &date_raw) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let student = match load_student(conn, student_cache, &student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !student.active {
        return err(
            &req.id,
            "failed_precondition",
            "student account is discontinued",
            None,
        );
    }

    let existing: Option<String> = match conn
        .query_row(
            "SELECT status FROM attendance WHERE student_id = ? AND date = ?",
            (&student_id, &date_raw),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(status) = existing {
        return err(
            &req.id,
            "conflict",
            "attendance already marked for this date",
            Some(json!({ "status": status })),
        );
    }

    let record_id = format!("{}_{}", student_id, date_raw);
    let now = now_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO attendance(id, student_id, student_name, date, status, month, year, created_at)
         VALUES(?, ?, ?, ?, 'pending', ?, ?, ?)",
        (
            &record_id,
            &student_id,
            &student.display_name,
            &date_raw,
            date.month(),
            date.year(),
            &now,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "record": record_json(
                &record_id,
                &student_id,
                &student.display_name,
                &date_raw,
                "pending",
                None,
                None,
            )
        }),
    )
}

fn handle_attendance_review(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let record_id = match required_str(req, "recordId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let reviewer_id = match required_str(req, "reviewerId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let decision = match required_str(req, "decision") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if decision != "approved" && decision != "rejected" {
        return err(
            &req.id,
            "bad_params",
            "decision must be one of: approved, rejected",
            Some(json!({ "decision": decision })),
        );
    }

    let reviewer = match load_user(conn, &reviewer_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "reviewer not found", None),
        Err(e) => return calc_err(req, e),
    };
    if !can_review(&reviewer.role) {
        return err(
            &req.id,
            "permission_denied",
            "only teachers can review attendance",
            None,
        );
    }

    let record: Option<(String, String, String, String, i64, i64)> = match conn
        .query_row(
            "SELECT student_id, student_name, date, status, year, month
             FROM attendance WHERE id = ?",
            [&record_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((student_id, student_name, date, status, year, month)) = record else {
        return err(&req.id, "not_found", "attendance record not found", None);
    };
    if status != "pending" {
        return err(
            &req.id,
            "failed_precondition",
            "attendance is not pending review",
            Some(json!({ "status": status })),
        );
    }

    let now = now_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE attendance SET status = ?, approved_by = ?, approved_at = ? WHERE id = ?",
        (&decision, &reviewer_id, &now, &record_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    // Approval changes the approved-day count, so refresh the student's due
    // for that month. Best-effort: a recalculation failure never undoes the
    // review itself.
    let mut recalculated = false;
    if decision == "approved" {
        let fee = load_user(conn, &student_id)
            .ok()
            .flatten()
            .map(|u| u.monthly_fee);
        match fee {
            Some(monthly_fee) => {
                match calc::recalculate_student_month(
                    conn,
                    &student_id,
                    monthly_fee,
                    year as i32,
                    month as u32,
                    &now,
                ) {
                    Ok(_) => recalculated = true,
                    Err(e) => warn!(
                        "fee recalculation after approval failed for {}: {}",
                        student_id, e.message
                    ),
                }
            }
            None => warn!(
                "fee recalculation after approval skipped: student {} not found",
                student_id
            ),
        }
    }

    ok(
        &req.id,
        json!({
            "record": record_json(
                &record_id,
                &student_id,
                &student_name,
                &date,
                &decision,
                Some(reviewer_id.as_str()),
                Some(now.as_str()),
            ),
            "recalculated": recalculated,
        }),
    )
}

fn handle_attendance_bulk_stamp(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState {
        db, student_cache, ..
    } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date_raw = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match parse_date(req, &date_raw) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match required_str(req, "status") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if status != "approved" && status != "absent" {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: approved, absent",
            Some(json!({ "status": status })),
        );
    }
    let student_ids = match optional_id_array(req, "studentIds") {
        Ok(Some(ids)) if !ids.is_empty() => ids,
        Ok(_) => return err(&req.id, "bad_params", "missing studentIds", None),
        Err(e) => return e,
    };

    let teacher = match load_user(conn, &teacher_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "teacher not found", None),
        Err(e) => return calc_err(req, e),
    };
    if !can_review(&teacher.role) {
        return err(
            &req.id,
            "permission_denied",
            "only teachers can stamp attendance",
            None,
        );
    }

    let now = now_rfc3339();
    let mut stamped: Vec<String> = Vec::new();
    let mut skipped_unknown: Vec<String> = Vec::new();
    let mut skipped_inactive: Vec<String> = Vec::new();

    let tx = match conn.unchecked_transaction() {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for student_id in &student_ids {
        let student = match load_student(&tx, student_cache, student_id) {
            Ok(Some(s)) => s,
            Ok(None) => {
                skipped_unknown.push(student_id.clone());
                continue;
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if !student.active {
            info!("bulk stamp skipping discontinued student {}", student_id);
            skipped_inactive.push(student_id.clone());
            continue;
        }
        let record_id = format!("{}_{}", student_id, date_raw);
        if let Err(e) = tx.execute(
            "INSERT INTO attendance(id, student_id, student_name, date, status, month, year,
                                    created_at, approved_by, approved_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, date) DO UPDATE SET
               status = excluded.status,
               student_name = excluded.student_name,
               approved_by = excluded.approved_by,
               approved_at = excluded.approved_at",
            (
                &record_id,
                student_id,
                &student.display_name,
                &date_raw,
                &status,
                date.month(),
                date.year(),
                &now,
                &teacher_id,
                &now,
            ),
        ) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "studentId": student_id })),
            );
        }
        stamped.push(student_id.clone());
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    // Stamped days change approved counts; refresh dues for the month.
    let mut recalc = None;
    if !stamped.is_empty() {
        match calc::recalculate_fees(
            conn,
            student_cache,
            Some(stamped.as_slice()),
            date.year(),
            date.month(),
            &now,
        ) {
            Ok(outcome) => recalc = serde_json::to_value(&outcome).ok(),
            Err(e) => warn!(
                "fee recalculation after bulk stamp failed for {}: {}",
                date_raw, e.message
            ),
        }
    }

    ok(
        &req.id,
        json!({
            "stamped": stamped,
            "skippedUnknown": skipped_unknown,
            "skippedInactive": skipped_inactive,
            "recalc": recalc,
        }),
    )
}

fn handle_attendance_month_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let month_raw = match required_str(req, "month") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (year, month) = match calc::parse_month_key(&month_raw) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let student_id = match optional_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut sql = String::from(
        "SELECT id, student_id, student_name, date, status, approved_by, approved_at
         FROM attendance WHERE year = ? AND month = ?",
    );
    let mut params: Vec<rusqlite::types::Value> = vec![
        rusqlite::types::Value::Integer(year as i64),
        rusqlite::types::Value::Integer(month as i64),
    ];
    if let Some(sid) = student_id {
        sql.push_str(" AND student_id = ?");
        params.push(rusqlite::types::Value::Text(sid));
    }
    sql.push_str(" ORDER BY date, student_name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map(rusqlite::params_from_iter(params), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, Option<String>>(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut pending = 0usize;
    let mut approved = 0usize;
    let mut rejected = 0usize;
    let mut absent = 0usize;
    let records: Vec<serde_json::Value> = rows
        .iter()
        .map(|(id, sid, name, date, status, approved_by, approved_at)| {
            match status.as_str() {
                "pending" => pending += 1,
                "approved" => approved += 1,
                "rejected" => rejected += 1,
                "absent" => absent += 1,
                _ => {}
            }
            record_json(
                id,
                sid,
                name,
                date,
                status,
                approved_by.as_deref(),
                approved_at.as_deref(),
            )
        })
        .collect();

    ok(
        &req.id,
        json!({
            "month": calc::month_key(year, month),
            "daysInMonth": calc::days_in_month(year, month),
            "records": records,
            "counts": {
                "pending": pending,
                "approved": approved,
                "rejected": rejected,
                "absent": absent,
            }
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.submit" => Some(handle_attendance_submit(state, req)),
        "attendance.review" => Some(handle_attendance_review(state, req)),
        "attendance.bulkStamp" => Some(handle_attendance_bulk_stamp(state, req)),
        "attendance.monthOpen" => Some(handle_attendance_month_open(state, req)),
        _ => None,
    }
}
