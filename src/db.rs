use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "school.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            roll TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_marks(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            subject_name TEXT NOT NULL,
            obtained TEXT NOT NULL,
            max_marks REAL NOT NULL,
            pass_mark REAL NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, term, subject_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_marks_student ON subject_marks(student_id, term, sort_order)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_marks_class ON subject_marks(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            employee_no TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_rules(
            id TEXT PRIMARY KEY,
            rule_name TEXT NOT NULL,
            rule_type TEXT NOT NULL,
            condition_text TEXT,
            deduction_type TEXT NOT NULL,
            deduction_value REAL NOT NULL,
            grace_minutes INTEGER NOT NULL DEFAULT 0,
            max_late_count INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS biometric_attendance(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            date TEXT NOT NULL,
            check_in TEXT,
            check_out TEXT,
            status TEXT NOT NULL,
            late_minutes INTEGER NOT NULL DEFAULT 0,
            early_minutes INTEGER NOT NULL DEFAULT 0,
            manual_override INTEGER NOT NULL DEFAULT 0,
            override_amount REAL NOT NULL DEFAULT 0,
            override_reason TEXT,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            UNIQUE(teacher_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_biometric_attendance_teacher ON biometric_attendance(teacher_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS salary_configs(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            basic_monthly REAL NOT NULL,
            per_day REAL NOT NULL,
            effective_from TEXT NOT NULL,
            effective_to TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_salary_configs_teacher ON salary_configs(teacher_id, effective_from)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS salary_calculations(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            month INTEGER NOT NULL,
            year INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            basic_salary REAL NOT NULL,
            per_day_salary REAL NOT NULL,
            total_working_days INTEGER NOT NULL,
            present_days INTEGER NOT NULL,
            absent_days INTEGER NOT NULL,
            half_days INTEGER NOT NULL,
            late_days INTEGER NOT NULL,
            total_deductions REAL NOT NULL,
            net_salary REAL NOT NULL,
            approved INTEGER NOT NULL DEFAULT 0,
            approved_at TEXT,
            details_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            UNIQUE(teacher_id, month, year, version)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_salary_calculations_period ON salary_calculations(teacher_id, year, month)",
        [],
    )?;

    // Workspaces created before manual overrides and calculation versioning
    // existed need the extra columns added in place.
    ensure_attendance_override_columns(&conn)?;
    ensure_salary_calculations_version(&conn)?;

    Ok(conn)
}

fn ensure_attendance_override_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "biometric_attendance", "manual_override")? {
        conn.execute(
            "ALTER TABLE biometric_attendance ADD COLUMN manual_override INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !table_has_column(conn, "biometric_attendance", "override_amount")? {
        conn.execute(
            "ALTER TABLE biometric_attendance ADD COLUMN override_amount REAL NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !table_has_column(conn, "biometric_attendance", "override_reason")? {
        conn.execute(
            "ALTER TABLE biometric_attendance ADD COLUMN override_reason TEXT",
            [],
        )?;
    }
    Ok(())
}

fn ensure_salary_calculations_version(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "salary_calculations", "version")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE salary_calculations ADD COLUMN version INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
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
