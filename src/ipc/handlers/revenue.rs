use serde_json::json;

use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::helpers::{calc_err, db_conn, now_rfc3339, required_str};
use crate::ipc::types::{AppState, Request};

fn handle_revenue_aggregate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
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

    let now = now_rfc3339();
    let revenue = match calc::aggregate_month_revenue(conn, &month_key, &now) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let approved_count = match calc::aggregate_month_attendance(conn, &month_key, &now) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    ok(
        &req.id,
        json!({
            "monthKey": revenue.month_key,
            "revenue": revenue.revenue,
            "teachersUpdated": revenue.teachers_updated,
            "approvedCount": approved_count,
        }),
    )
}

fn handle_revenue_backfill(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let now = now_rfc3339();
    match calc::backfill_platform_rollups(conn, &now) {
        Ok(outcome) => ok(
            &req.id,
            json!({
                "months": outcome.months,
                "failed": outcome.failed,
                "count": outcome.months.len(),
            }),
        ),
        Err(e) => calc_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "revenue.aggregate" => Some(handle_revenue_aggregate(state, req)),
        "revenue.backfill" => Some(handle_revenue_backfill(state, req)),
        _ => None,
    }
}
