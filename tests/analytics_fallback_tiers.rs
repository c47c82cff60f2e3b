mod test_support;

use chrono::{Datelike, Utc};
use serde_json::json;
use test_support::{
    create_user, request_ok, select_workspace, spawn_sidecar_with_env, temp_dir,
};

const EPOCH_ENV: (&str, &str) = ("FEEBOOK_PLATFORM_EPOCH", "2025-08");

fn point_value(result: &serde_json::Value, month_key: &str, field: &str) -> Option<f64> {
    result
        .get("points")
        .and_then(|v| v.as_array())?
        .iter()
        .find(|p| p.get("monthKey").and_then(|v| v.as_str()) == Some(month_key))?
        .get(field)
        .and_then(|v| v.as_f64())
}

#[test]
fn rollups_feed_the_revenue_series() {
    let workspace = temp_dir("feebook-analytics-revenue");
    let (_child, mut stdin, mut reader) = spawn_sidecar_with_env(&[EPOCH_ENV]);
    select_workspace(&mut stdin, &mut reader, "1", &workspace);
    let s1 = create_user(&mut stdin, &mut reader, "2", "asha", "student", 3000.0);
    let t1 = create_user(&mut stdin, &mut reader, "3", "mr-rao", "teacher", 0.0);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.bulkStamp",
        json!({
            "teacherId": t1,
            "date": "2025-09-05",
            "studentIds": [s1],
            "status": "approved",
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.markPaid",
        json!({ "studentId": s1, "monthKey": "2025-09" }),
    );

    let revenue = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "analytics.revenue.open",
        json!({}),
    );
    assert_eq!(revenue.get("epoch").and_then(|v| v.as_str()), Some("2025-08"));
    assert_eq!(revenue.get("source").and_then(|v| v.as_str()), Some("rollup"));
    assert_eq!(point_value(&revenue, "2025-09", "revenue"), Some(100.0));
    // Months with no data chart as zero.
    assert_eq!(point_value(&revenue, "2025-08", "revenue"), Some(0.0));
}

#[test]
fn teacher_summaries_back_an_empty_revenue_rollup() {
    let workspace = temp_dir("feebook-analytics-summaries");
    let (mut child, mut stdin, mut reader) = spawn_sidecar_with_env(&[EPOCH_ENV]);
    select_workspace(&mut stdin, &mut reader, "1", &workspace);
    let s1 = create_user(&mut stdin, &mut reader, "2", "asha", "student", 3000.0);
    let t1 = create_user(&mut stdin, &mut reader, "3", "mr-rao", "teacher", 0.0);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.bulkStamp",
        json!({
            "teacherId": t1,
            "date": "2025-09-05",
            "studentIds": [s1],
            "status": "approved",
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.markPaid",
        json!({ "studentId": s1, "monthKey": "2025-09" }),
    );

    // Simulate a platform whose rollup documents were never written: drop
    // them out-of-band and leave only the per-teacher summaries behind.
    drop(stdin);
    let _ = child.wait();
    {
        let conn = rusqlite::Connection::open(workspace.join("feebook.sqlite3"))
            .expect("open workspace db");
        conn.execute("DELETE FROM platform_monthly_revenue", [])
            .expect("clear rollups");
    }

    let (_child, mut stdin, mut reader) = spawn_sidecar_with_env(&[EPOCH_ENV]);
    select_workspace(&mut stdin, &mut reader, "1", &workspace);
    let revenue = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "analytics.revenue.open",
        json!({}),
    );
    assert_eq!(
        revenue.get("source").and_then(|v| v.as_str()),
        Some("teacher_summaries")
    );
    assert_eq!(point_value(&revenue, "2025-09", "revenue"), Some(100.0));
}

#[test]
fn raw_records_back_missing_attendance_rollups() {
    let workspace = temp_dir("feebook-analytics-raw");
    let (_child, mut stdin, mut reader) = spawn_sidecar_with_env(&[EPOCH_ENV]);
    select_workspace(&mut stdin, &mut reader, "1", &workspace);
    let s1 = create_user(&mut stdin, &mut reader, "2", "asha", "student", 3000.0);
    let s2 = create_user(&mut stdin, &mut reader, "3", "binh", "student", 3000.0);
    let t1 = create_user(&mut stdin, &mut reader, "4", "mr-rao", "teacher", 0.0);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.bulkStamp",
        json!({
            "teacherId": t1,
            "date": "2025-09-05",
            "studentIds": [s1, s2],
            "status": "approved",
        }),
    );

    // No aggregation has run, so no rollup documents exist yet.
    let attendance = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "analytics.attendance.open",
        json!({}),
    );
    assert_eq!(
        attendance.get("source").and_then(|v| v.as_str()),
        Some("raw_current_epoch")
    );
    assert_eq!(point_value(&attendance, "2025-09", "approvedCount"), Some(2.0));
}

#[test]
fn attendance_rollups_win_after_backfill() {
    let workspace = temp_dir("feebook-analytics-rollup");
    let (_child, mut stdin, mut reader) = spawn_sidecar_with_env(&[EPOCH_ENV]);
    select_workspace(&mut stdin, &mut reader, "1", &workspace);
    let s1 = create_user(&mut stdin, &mut reader, "2", "asha", "student", 3000.0);
    let t1 = create_user(&mut stdin, &mut reader, "3", "mr-rao", "teacher", 0.0);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.bulkStamp",
        json!({
            "teacherId": t1,
            "date": "2025-09-05",
            "studentIds": [s1],
            "status": "approved",
        }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "5", "revenue.backfill", json!({}));

    let attendance = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "analytics.attendance.open",
        json!({}),
    );
    assert_eq!(
        attendance.get("source").and_then(|v| v.as_str()),
        Some("rollup")
    );
    assert_eq!(point_value(&attendance, "2025-09", "approvedCount"), Some(1.0));
}

#[test]
fn prior_epoch_scan_when_the_current_window_is_empty() {
    let workspace = temp_dir("feebook-analytics-prior");
    let env = [("FEEBOOK_PLATFORM_EPOCH", "2026-02")];
    let (_child, mut stdin, mut reader) = spawn_sidecar_with_env(&env);
    select_workspace(&mut stdin, &mut reader, "1", &workspace);
    let s1 = create_user(&mut stdin, &mut reader, "2", "asha", "student", 3000.0);
    let t1 = create_user(&mut stdin, &mut reader, "3", "mr-rao", "teacher", 0.0);

    // 2025-09 sits inside the prior epoch window (2025-02 .. 2026-01).
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.bulkStamp",
        json!({
            "teacherId": t1,
            "date": "2025-09-05",
            "studentIds": [s1],
            "status": "approved",
        }),
    );

    let attendance = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "analytics.attendance.open",
        json!({}),
    );
    assert_eq!(
        attendance.get("source").and_then(|v| v.as_str()),
        Some("raw_prior_epoch")
    );
    assert_eq!(point_value(&attendance, "2025-09", "approvedCount"), Some(1.0));
}

#[test]
fn recent_scan_when_both_epoch_windows_are_empty() {
    let workspace = temp_dir("feebook-analytics-recent");
    let env = [("FEEBOOK_PLATFORM_EPOCH", "2026-02")];
    let (_child, mut stdin, mut reader) = spawn_sidecar_with_env(&env);
    select_workspace(&mut stdin, &mut reader, "1", &workspace);
    let s1 = create_user(&mut stdin, &mut reader, "2", "asha", "student", 3000.0);
    let t1 = create_user(&mut stdin, &mut reader, "3", "mr-rao", "teacher", 0.0);

    // Older than both the current and the prior epoch windows.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.bulkStamp",
        json!({
            "teacherId": t1,
            "date": "2024-05-06",
            "studentIds": [s1],
            "status": "approved",
        }),
    );

    let attendance = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "analytics.attendance.open",
        json!({}),
    );
    assert_eq!(
        attendance.get("source").and_then(|v| v.as_str()),
        Some("raw_recent")
    );
    assert_eq!(point_value(&attendance, "2024-05", "approvedCount"), Some(1.0));
}

#[test]
fn the_current_month_is_always_recomputed_live() {
    let workspace = temp_dir("feebook-analytics-live");
    let (_child, mut stdin, mut reader) = spawn_sidecar_with_env(&[EPOCH_ENV]);
    select_workspace(&mut stdin, &mut reader, "1", &workspace);
    let s1 = create_user(&mut stdin, &mut reader, "2", "asha", "student", 3000.0);
    let t1 = create_user(&mut stdin, &mut reader, "3", "mr-rao", "teacher", 0.0);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.bulkStamp",
        json!({
            "teacherId": t1,
            "date": "2025-09-05",
            "studentIds": [s1],
            "status": "approved",
        }),
    );
    // Backfill writes the rollups as of now...
    let _ = request_ok(&mut stdin, &mut reader, "5", "revenue.backfill", json!({}));

    // ...then a new approval lands in the current month with no rollup write.
    let today = Utc::now().date_naive();
    let today_key = format!("{:04}-{:02}", today.year(), today.month());
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.bulkStamp",
        json!({
            "teacherId": t1,
            "date": format!("{:04}-{:02}-01", today.year(), today.month()),
            "studentIds": [s1],
            "status": "approved",
        }),
    );

    let attendance = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "analytics.attendance.open",
        json!({}),
    );
    assert_eq!(
        attendance.get("source").and_then(|v| v.as_str()),
        Some("rollup")
    );
    assert_eq!(
        attendance.get("currentMonthLive").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(point_value(&attendance, &today_key, "approvedCount"), Some(1.0));
}
