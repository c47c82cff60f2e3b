use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "feebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            email TEXT,
            role TEXT NOT NULL,
            monthly_fee REAL NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            month INTEGER NOT NULL,
            year INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            approved_by TEXT,
            approved_at TEXT,
            UNIQUE(student_id, date),
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_year_month ON attendance(year, month)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_status ON attendance(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS monthly_dues(
            student_id TEXT NOT NULL,
            month_key TEXT NOT NULL,
            due REAL NOT NULL,
            approved_days INTEGER,
            daily_rate REAL,
            status TEXT,
            payment_date TEXT,
            amount_paid REAL,
            last_calculated TEXT,
            PRIMARY KEY(student_id, month_key),
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_monthly_dues_month ON monthly_dues(month_key)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS platform_monthly_revenue(
            month_key TEXT PRIMARY KEY,
            revenue REAL NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS platform_monthly_attendance(
            month_key TEXT PRIMARY KEY,
            approved_count INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_monthly_summaries(
            teacher_id TEXT NOT NULL,
            month_key TEXT NOT NULL,
            revenue REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(teacher_id, month_key),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;

    // Workspaces created before the review workflow have no approver columns.
    ensure_attendance_review_columns(&conn)?;
    // Workspaces created before structured dues stored a bare amount per
    // month. The added columns stay NULL on old rows; readers normalize them.
    ensure_dues_structured_columns(&conn)?;

    Ok(conn)
}

fn ensure_attendance_review_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "attendance", "approved_by")? {
        conn.execute("ALTER TABLE attendance ADD COLUMN approved_by TEXT", [])?;
    }
    if !table_has_column(conn, "attendance", "approved_at")? {
        conn.execute("ALTER TABLE attendance ADD COLUMN approved_at TEXT", [])?;
    }
    Ok(())
}

fn ensure_dues_structured_columns(conn: &Connection) -> anyhow::Result<()> {
    for (column, decl) in [
        ("approved_days", "INTEGER"),
        ("daily_rate", "REAL"),
        ("status", "TEXT"),
        ("payment_date", "TEXT"),
        ("amount_paid", "REAL"),
        ("last_calculated", "TEXT"),
    ] {
        if !table_has_column(conn, "monthly_dues", column)? {
            conn.execute(
                &format!("ALTER TABLE monthly_dues ADD COLUMN {} {}", column, decl),
                [],
            )?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::{read_due_row, StoredDue};

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn open_db_is_idempotent() {
        let ws = temp_workspace("feebook-db-open");
        drop(open_db(&ws).expect("first open"));
        drop(open_db(&ws).expect("second open"));
    }

    #[test]
    fn legacy_due_rows_gain_columns_and_normalize() {
        let ws = temp_workspace("feebook-db-legacy");
        {
            // An old-format workspace: dues carry only a bare amount.
            let conn = Connection::open(ws.join(DB_FILE)).expect("open raw");
            conn.execute(
                "CREATE TABLE monthly_dues(
                    student_id TEXT NOT NULL,
                    month_key TEXT NOT NULL,
                    due REAL NOT NULL,
                    PRIMARY KEY(student_id, month_key)
                )",
                [],
            )
            .expect("create legacy table");
            conn.execute(
                "INSERT INTO monthly_dues(student_id, month_key, due) VALUES('s1', '2025-06', 450.5)",
                [],
            )
            .expect("insert legacy row");
        }

        let conn = open_db(&ws).expect("open migrates");
        let stored = read_due_row(&conn, "s1", "2025-06")
            .expect("read")
            .expect("row exists");
        assert_eq!(stored, StoredDue::Legacy(450.5));
        let entry = stored.normalize();
        assert_eq!(entry.due, 450.5);
        assert_eq!(entry.status.as_str(), "unpaid");
    }
}
