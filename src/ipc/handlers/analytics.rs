use chrono::{Datelike, Utc};
use serde_json::json;

use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::helpers::{calc_err, db_conn};
use crate::ipc::types::{AppState, Request};

fn current_month() -> (i32, u32) {
    let today = Utc::now().date_naive();
    (today.year(), today.month())
}

fn handle_revenue_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let today = current_month();
    let epoch = calc::platform_epoch(today, state.config.epoch_override);

    let series = match calc::compute_revenue_series(conn, epoch, today) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    ok(
        &req.id,
        json!({
            "epoch": calc::month_key(epoch.0, epoch.1),
            "source": series.source,
            "points": series.points,
        }),
    )
}

fn handle_attendance_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let today = current_month();
    let epoch = calc::platform_epoch(today, state.config.epoch_override);

    let series = match calc::compute_attendance_series(conn, epoch, today) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    ok(
        &req.id,
        json!({
            "epoch": calc::month_key(epoch.0, epoch.1),
            "source": series.source,
            "currentMonthLive": true,
            "points": series.points,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.revenue.open" => Some(handle_revenue_open(state, req)),
        "analytics.attendance.open" => Some(handle_attendance_open(state, req)),
        _ => None,
    }
}
