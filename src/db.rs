use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("edupro.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            section TEXT,
            guardian_name TEXT,
            email TEXT,
            phone TEXT,
            sort_order INTEGER NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    // Workspaces written before contact fields landed lack these columns.
    ensure_students_contact_columns(&conn)?;
    ensure_students_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_sort ON students(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            subject_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(subject_id, student_id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_items(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            name TEXT NOT NULL,
            score REAL NOT NULL,
            total REAL NOT NULL,
            weight REAL NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_items_sheet ON grade_items(subject_id, student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_items_student ON grade_items(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            subject_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(subject_id, student_id, date),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_day ON attendance_records(subject_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS calendar_events(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_calendar_events_date ON calendar_events(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_notes(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            content TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_notes_student ON student_notes(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            amount REAL NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS manual_transactions(
            id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            description TEXT NOT NULL,
            amount REAL NOT NULL,
            kind TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS finance_events(
            id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            action TEXT NOT NULL,
            details TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_contact_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "guardian_name")? {
        conn.execute("ALTER TABLE students ADD COLUMN guardian_name TEXT", [])?;
    }
    if !table_has_column(conn, "students", "email")? {
        conn.execute("ALTER TABLE students ADD COLUMN email TEXT", [])?;
    }
    if !table_has_column(conn, "students", "phone")? {
        conn.execute("ALTER TABLE students ADD COLUMN phone TEXT", [])?;
    }
    Ok(())
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
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

/// Read a JSON document from the settings table. `None` when the key was
/// never written.
pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, &text),
    )?;
    Ok(())
}
