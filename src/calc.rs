use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

use crate::cache::{load_student, StudentStatusCache};

/// Half-up currency rounding used for due amounts:
/// `Int(100*x + 0.5) / 100`
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => 30,
    }
}

pub fn month_key(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

pub fn parse_month_key(raw: &str) -> Result<(i32, u32), CalcError> {
    let t = raw.trim();
    let Some((y, m)) = t.split_once('-') else {
        return Err(CalcError::new("bad_params", "month must be YYYY-MM"));
    };
    if y.len() != 4 {
        return Err(CalcError::new("bad_params", "month must be YYYY-MM"));
    }
    let year = y
        .parse::<i32>()
        .map_err(|_| CalcError::new("bad_params", "month year must be numeric"))?;
    let month = m
        .parse::<u32>()
        .map_err(|_| CalcError::new("bad_params", "month must be YYYY-MM"))?;
    if !(1..=12).contains(&month) {
        return Err(CalcError::new(
            "bad_params",
            "month must be between 01 and 12",
        ));
    }
    Ok((year, month))
}

/// Months from `start` through `end`, inclusive, as YYYY-MM keys.
pub fn month_keys_between(start: (i32, u32), end: (i32, u32)) -> Vec<String> {
    let mut out = Vec::new();
    let (mut year, mut month) = start;
    while (year, month) <= end {
        out.push(month_key(year, month));
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    out
}

/// The platform epoch is the August that starts the current school year:
/// August of this year from August onward, otherwise August of the prior
/// year. An explicit override from configuration wins.
pub fn platform_epoch(today: (i32, u32), override_epoch: Option<(i32, u32)>) -> (i32, u32) {
    if let Some(e) = override_epoch {
        return e;
    }
    let (year, month) = today;
    if month >= 8 {
        (year, 8)
    } else {
        (year - 1, 8)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

fn query_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

fn update_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_update_failed", e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DueStatus {
    Unpaid,
    Paid,
}

impl DueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DueStatus::Unpaid => "unpaid",
            DueStatus::Paid => "paid",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unpaid" => Some(DueStatus::Unpaid),
            "paid" => Some(DueStatus::Paid),
            _ => None,
        }
    }
}

/// A due entry as stored. Older workspaces recorded a bare amount per month;
/// those rows have no status value and are normalized at the read boundary
/// before any business logic touches them.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredDue {
    Legacy(f64),
    Structured {
        due: f64,
        approved_days: Option<i64>,
        daily_rate: Option<f64>,
        status: String,
        payment_date: Option<String>,
        amount_paid: Option<f64>,
        last_calculated: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueEntry {
    pub due: f64,
    pub approved_days: i64,
    pub daily_rate: f64,
    pub status: DueStatus,
    pub payment_date: Option<String>,
    pub amount_paid: Option<f64>,
    pub last_calculated: Option<String>,
}

impl StoredDue {
    pub fn normalize(self) -> DueEntry {
        match self {
            StoredDue::Legacy(due) => DueEntry {
                due,
                approved_days: 0,
                daily_rate: 0.0,
                status: DueStatus::Unpaid,
                payment_date: None,
                amount_paid: None,
                last_calculated: None,
            },
            StoredDue::Structured {
                due,
                approved_days,
                daily_rate,
                status,
                payment_date,
                amount_paid,
                last_calculated,
            } => DueEntry {
                due,
                approved_days: approved_days.unwrap_or(0),
                daily_rate: daily_rate.unwrap_or(0.0),
                status: DueStatus::parse(&status).unwrap_or(DueStatus::Unpaid),
                payment_date,
                amount_paid,
                last_calculated,
            },
        }
    }
}

fn due_from_columns(r: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<StoredDue> {
    let due: f64 = r.get(base)?;
    let status: Option<String> = r.get(base + 3)?;
    Ok(match status {
        None => StoredDue::Legacy(due),
        Some(status) => StoredDue::Structured {
            due,
            approved_days: r.get(base + 1)?,
            daily_rate: r.get(base + 2)?,
            status,
            payment_date: r.get(base + 4)?,
            amount_paid: r.get(base + 5)?,
            last_calculated: r.get(base + 6)?,
        },
    })
}

pub fn read_due_row(
    conn: &Connection,
    student_id: &str,
    month_key: &str,
) -> Result<Option<StoredDue>, CalcError> {
    conn.query_row(
        "SELECT due, approved_days, daily_rate, status, payment_date, amount_paid, last_calculated
         FROM monthly_dues
         WHERE student_id = ? AND month_key = ?",
        (student_id, month_key),
        |r| due_from_columns(r, 0),
    )
    .optional()
    .map_err(query_err)
}

pub fn read_all_due_rows(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<(String, StoredDue)>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT month_key, due, approved_days, daily_rate, status, payment_date, amount_paid, last_calculated
             FROM monthly_dues
             WHERE student_id = ?
             ORDER BY month_key",
        )
        .map_err(query_err)?;
    stmt.query_map([student_id], |r| {
        let key: String = r.get(0)?;
        let stored = due_from_columns(r, 1)?;
        Ok((key, stored))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_err)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DueCalculation {
    pub approved_days: i64,
    pub daily_rate: f64,
    pub due: f64,
}

/// The due amount is a pure function of the approved-day count, the monthly
/// fee and the month length. Only the final amount is rounded; the daily
/// rate is kept at full precision.
pub fn compute_due(approved_days: i64, monthly_fee: f64, days_in_month: u32) -> DueCalculation {
    let daily_rate = if days_in_month > 0 {
        monthly_fee / days_in_month as f64
    } else {
        0.0
    };
    DueCalculation {
        approved_days,
        daily_rate,
        due: round_off_2_decimals(approved_days as f64 * daily_rate),
    }
}

pub const RECALC_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalcFailure {
    pub student_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalcOutcome {
    pub month_key: String,
    pub total: usize,
    pub processed: usize,
    pub skipped_inactive: Vec<String>,
    pub failed: Vec<RecalcFailure>,
}

struct RecalcTarget {
    id: String,
    monthly_fee: f64,
}

/// Recompute one student's due for one month, preserving the sticky payment
/// fields. The read of the existing row and the write of the recomputed one
/// happen in a single transaction, so a recorded payment can never be lost
/// to an interleaved recalculation.
pub fn recalculate_student_month(
    conn: &Connection,
    student_id: &str,
    monthly_fee: f64,
    year: i32,
    month: u32,
    now: &str,
) -> Result<DueEntry, CalcError> {
    let approved_days: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM attendance
             WHERE student_id = ? AND year = ? AND month = ? AND status = 'approved'",
            (student_id, year, month),
            |r| r.get(0),
        )
        .map_err(query_err)?;
    let calcd = compute_due(approved_days, monthly_fee, days_in_month(year, month));
    let key = month_key(year, month);

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;
    let sticky = read_due_row(&tx, student_id, &key)?.map(StoredDue::normalize);
    let (status, payment_date, amount_paid) = match &sticky {
        Some(e) => (e.status, e.payment_date.clone(), e.amount_paid),
        None => (DueStatus::Unpaid, None, None),
    };
    tx.execute(
        "INSERT INTO monthly_dues(student_id, month_key, due, approved_days, daily_rate,
                                  status, payment_date, amount_paid, last_calculated)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, month_key) DO UPDATE SET
           due = excluded.due,
           approved_days = excluded.approved_days,
           daily_rate = excluded.daily_rate,
           status = excluded.status,
           payment_date = excluded.payment_date,
           amount_paid = excluded.amount_paid,
           last_calculated = excluded.last_calculated",
        (
            student_id,
            &key,
            calcd.due,
            calcd.approved_days,
            calcd.daily_rate,
            status.as_str(),
            &payment_date,
            amount_paid,
            now,
        ),
    )
    .map_err(update_err)?;
    tx.commit()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;

    Ok(DueEntry {
        due: calcd.due,
        approved_days: calcd.approved_days,
        daily_rate: calcd.daily_rate,
        status,
        payment_date,
        amount_paid,
        last_calculated: Some(now.to_string()),
    })
}

/// Recalculate dues for a month. With no explicit ids every active student
/// is processed and discontinued students are skipped; explicitly targeted
/// ids are processed even when discontinued. Students are walked in
/// fixed-size batches and per-student failures never abort the rest of the
/// run.
pub fn recalculate_fees(
    conn: &Connection,
    cache: &mut StudentStatusCache,
    student_ids: Option<&[String]>,
    year: i32,
    month: u32,
    now: &str,
) -> Result<RecalcOutcome, CalcError> {
    let key = month_key(year, month);
    let mut targets: Vec<RecalcTarget> = Vec::new();
    let mut skipped_inactive: Vec<String> = Vec::new();
    let mut failed: Vec<RecalcFailure> = Vec::new();

    match student_ids {
        Some(ids) => {
            for id in ids {
                match load_student(conn, cache, id) {
                    Ok(Some(s)) => {
                        if !s.active {
                            debug!("including discontinued student {} by explicit request", id);
                        }
                        targets.push(RecalcTarget {
                            id: id.clone(),
                            monthly_fee: s.monthly_fee,
                        });
                    }
                    Ok(None) => failed.push(RecalcFailure {
                        student_id: id.clone(),
                        error: "student not found".to_string(),
                    }),
                    Err(e) => failed.push(RecalcFailure {
                        student_id: id.clone(),
                        error: e.to_string(),
                    }),
                }
            }
        }
        None => {
            let mut stmt = conn
                .prepare(
                    "SELECT id, monthly_fee, active FROM users
                     WHERE role = 'student'
                     ORDER BY username",
                )
                .map_err(query_err)?;
            let rows = stmt
                .query_map([], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, f64>(1)?,
                        r.get::<_, i64>(2)? != 0,
                    ))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(query_err)?;
            for (id, monthly_fee, active) in rows {
                if active {
                    targets.push(RecalcTarget { id, monthly_fee });
                } else {
                    info!("skipping discontinued student {} in fee recalculation", id);
                    skipped_inactive.push(id);
                }
            }
        }
    }

    let total = targets.len() + failed.len();
    let mut processed = 0usize;
    for batch in targets.chunks(RECALC_BATCH_SIZE) {
        for t in batch {
            match recalculate_student_month(conn, &t.id, t.monthly_fee, year, month, now) {
                Ok(_) => processed += 1,
                Err(e) => {
                    warn!(
                        "fee recalculation failed for student {}: {}",
                        t.id, e.message
                    );
                    failed.push(RecalcFailure {
                        student_id: t.id.clone(),
                        error: e.message.clone(),
                    });
                }
            }
        }
        info!(
            "fee recalculation {}: {}/{}",
            key,
            processed + failed.len(),
            total
        );
    }

    Ok(RecalcOutcome {
        month_key: key,
        total,
        processed,
        skipped_inactive,
        failed,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthRevenue {
    pub month_key: String,
    pub revenue: f64,
    pub teachers_updated: usize,
}

/// Full recompute of one month's revenue: sum what was actually paid across
/// all active students whose due for the month is marked paid, then write
/// the platform rollup and mirror the value into every teacher's monthly
/// summary. The mirror assumes a single-teacher platform but writes all
/// teacher rows; individual mirror failures are logged and skipped.
pub fn aggregate_month_revenue(
    conn: &Connection,
    month_key: &str,
    now: &str,
) -> Result<MonthRevenue, CalcError> {
    let revenue: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(COALESCE(d.amount_paid, d.due)), 0)
             FROM monthly_dues d
             JOIN users u ON u.id = d.student_id
             WHERE d.month_key = ? AND d.status = 'paid'
               AND u.role = 'student' AND u.active = 1",
            [month_key],
            |r| r.get(0),
        )
        .map_err(query_err)?;

    conn.execute(
        "INSERT INTO platform_monthly_revenue(month_key, revenue, updated_at)
         VALUES(?, ?, ?)
         ON CONFLICT(month_key) DO UPDATE SET
           revenue = excluded.revenue,
           updated_at = excluded.updated_at",
        (month_key, revenue, now),
    )
    .map_err(update_err)?;

    let mut stmt = conn
        .prepare("SELECT id FROM users WHERE role = 'teacher'")
        .map_err(query_err)?;
    let teacher_ids = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;

    let mut teachers_updated = 0usize;
    for tid in &teacher_ids {
        let res = conn.execute(
            "INSERT INTO teacher_monthly_summaries(teacher_id, month_key, revenue, updated_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(teacher_id, month_key) DO UPDATE SET
               revenue = excluded.revenue,
               updated_at = excluded.updated_at",
            (tid, month_key, revenue, now),
        );
        match res {
            Ok(_) => teachers_updated += 1,
            Err(e) => warn!("failed to write monthly summary for teacher {}: {}", tid, e),
        }
    }

    Ok(MonthRevenue {
        month_key: month_key.to_string(),
        revenue,
        teachers_updated,
    })
}

/// Full recompute of one month's approved-attendance count into the
/// platform attendance rollup.
pub fn aggregate_month_attendance(
    conn: &Connection,
    month_key: &str,
    now: &str,
) -> Result<i64, CalcError> {
    let (year, month) = parse_month_key(month_key)?;
    let approved_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM attendance
             WHERE year = ? AND month = ? AND status = 'approved'",
            (year, month),
            |r| r.get(0),
        )
        .map_err(query_err)?;
    conn.execute(
        "INSERT INTO platform_monthly_attendance(month_key, approved_count, updated_at)
         VALUES(?, ?, ?)
         ON CONFLICT(month_key) DO UPDATE SET
           approved_count = excluded.approved_count,
           updated_at = excluded.updated_at",
        (month_key, approved_count, now),
    )
    .map_err(update_err)?;
    Ok(approved_count)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillOutcome {
    pub months: Vec<String>,
    pub failed: Vec<String>,
}

/// One-time backfill: recompute revenue and attendance rollups for every
/// month observed across all students' due maps. Best-effort per month.
pub fn backfill_platform_rollups(
    conn: &Connection,
    now: &str,
) -> Result<BackfillOutcome, CalcError> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT month_key FROM monthly_dues ORDER BY month_key")
        .map_err(query_err)?;
    let keys = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;

    let mut months = Vec::new();
    let mut failed = Vec::new();
    for key in keys {
        let revenue = aggregate_month_revenue(conn, &key, now);
        let attendance = aggregate_month_attendance(conn, &key, now);
        match (revenue, attendance) {
            (Ok(_), Ok(_)) => months.push(key),
            (r, a) => {
                for e in [r.err(), a.err()].into_iter().flatten() {
                    warn!("rollup backfill failed for {}: {}", key, e.message);
                }
                failed.push(key);
            }
        }
    }
    info!(
        "rollup backfill complete: {} months, {} failed",
        months.len(),
        failed.len()
    );
    Ok(BackfillOutcome { months, failed })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenuePoint {
    pub month_key: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSeries {
    pub source: &'static str,
    pub points: Vec<RevenuePoint>,
}

/// Monthly revenue series from the platform epoch to the current month.
/// Prefers the platform rollups; when none exist, falls back to a scan of
/// every teacher's monthly summaries, keeping the freshest value per month.
/// Fallback values are merged non-destructively and never replace rollup
/// data.
pub fn compute_revenue_series(
    conn: &Connection,
    epoch: (i32, u32),
    today: (i32, u32),
) -> Result<RevenueSeries, CalcError> {
    let keys = month_keys_between(epoch, today);
    let (Some(first), Some(last)) = (keys.first(), keys.last()) else {
        return Ok(RevenueSeries {
            source: "rollup",
            points: Vec::new(),
        });
    };

    let mut stmt = conn
        .prepare(
            "SELECT month_key, revenue FROM platform_monthly_revenue
             WHERE month_key BETWEEN ? AND ?",
        )
        .map_err(query_err)?;
    let mut by_month: HashMap<String, f64> = stmt
        .query_map((first, last), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(query_err)?;

    let mut source = "rollup";
    if by_month.is_empty() {
        source = "teacher_summaries";
        let mut stmt = conn
            .prepare(
                "SELECT month_key, revenue, updated_at FROM teacher_monthly_summaries
                 WHERE month_key BETWEEN ? AND ?",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map((first, last), |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, f64>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)?;
        let mut freshest: HashMap<String, (f64, String)> = HashMap::new();
        for (key, revenue, updated_at) in rows {
            match freshest.get(&key) {
                Some((_, seen)) if *seen >= updated_at => {}
                _ => {
                    freshest.insert(key, (revenue, updated_at));
                }
            }
        }
        for (key, (revenue, _)) in freshest {
            by_month.entry(key).or_insert(revenue);
        }
    }

    let points = keys
        .iter()
        .map(|k| RevenuePoint {
            month_key: k.clone(),
            revenue: *by_month.get(k).unwrap_or(&0.0),
        })
        .collect();
    Ok(RevenueSeries { source, points })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendancePoint {
    pub month_key: String,
    pub approved_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSeries {
    pub source: &'static str,
    pub points: Vec<AttendancePoint>,
}

fn raw_attendance_by_month(
    conn: &Connection,
    first: &str,
    last: &str,
) -> Result<HashMap<String, i64>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT substr(date, 1, 7) AS mk, COUNT(*)
             FROM attendance
             WHERE status = 'approved' AND substr(date, 1, 7) BETWEEN ? AND ?
             GROUP BY mk",
        )
        .map_err(query_err)?;
    stmt.query_map((first, last), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
    })
    .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
    .map_err(query_err)
}

/// Monthly approved-attendance series. Rollup documents are written lazily,
/// so the reader tolerates their absence: it falls back to direct
/// aggregation over raw records in the current epoch window, then the prior
/// epoch, then an unrestricted scan of the most recent 500 approved
/// records. The current calendar month is always recomputed from raw
/// records and overrides whatever the rollup says.
pub fn compute_attendance_series(
    conn: &Connection,
    epoch: (i32, u32),
    today: (i32, u32),
) -> Result<AttendanceSeries, CalcError> {
    let mut keys = month_keys_between(epoch, today);
    let (Some(first), Some(last)) = (keys.first().cloned(), keys.last().cloned()) else {
        return Ok(AttendanceSeries {
            source: "rollup",
            points: Vec::new(),
        });
    };

    let mut stmt = conn
        .prepare(
            "SELECT month_key, approved_count FROM platform_monthly_attendance
             WHERE month_key BETWEEN ? AND ?",
        )
        .map_err(query_err)?;
    let mut by_month: HashMap<String, i64> = stmt
        .query_map((&first, &last), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(query_err)?;

    let mut source = "rollup";
    if by_month.is_empty() {
        source = "raw_current_epoch";
        by_month = raw_attendance_by_month(conn, &first, &last)?;
        if by_month.is_empty() {
            let prior = month_keys_between((epoch.0 - 1, epoch.1), (epoch.0, epoch.1 - 1));
            if let (Some(pf), Some(pl)) = (prior.first(), prior.last()) {
                let prior_by_month = raw_attendance_by_month(conn, pf, pl)?;
                if !prior_by_month.is_empty() {
                    source = "raw_prior_epoch";
                    by_month = prior_by_month;
                    keys = prior;
                }
            }
        }
        if by_month.is_empty() {
            source = "raw_recent";
            let mut stmt = conn
                .prepare(
                    "SELECT date FROM attendance
                     WHERE status = 'approved'
                     ORDER BY date DESC LIMIT 500",
                )
                .map_err(query_err)?;
            let dates = stmt
                .query_map([], |r| r.get::<_, String>(0))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(query_err)?;
            for date in dates {
                if date.len() >= 7 {
                    *by_month.entry(date[..7].to_string()).or_insert(0) += 1;
                }
            }
            let mut observed: Vec<String> = by_month.keys().cloned().collect();
            observed.sort();
            keys = observed;
        }
    }

    // Freshness over the rollup's write cadence: the current month's bucket
    // comes straight from raw records on every call.
    let current_key = month_key(today.0, today.1);
    let live: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM attendance
             WHERE year = ? AND month = ? AND status = 'approved'",
            (today.0, today.1),
            |r| r.get(0),
        )
        .map_err(query_err)?;
    if !keys.contains(&current_key) {
        keys.push(current_key.clone());
    }
    by_month.insert(current_key, live);

    let points = keys
        .iter()
        .map(|k| AttendancePoint {
            month_key: k.clone(),
            approved_count: *by_month.get(k).unwrap_or(&0),
        })
        .collect();
    Ok(AttendanceSeries { source, points })
}
