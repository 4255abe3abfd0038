use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "rollcall.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Idempotent schema creation. Split out of `open_db` so unit tests can run
/// against an in-memory connection.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL DEFAULT 'student'
        )",
        [],
    )?;

    // The three identity stores are deliberately loosely linked: account_id
    // is a back-reference, not an enforced foreign key. Profiles can outlive
    // their account row and imports are never tied to either.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrolled_profiles(
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL UNIQUE,
            roll_number TEXT,
            department TEXT,
            attendance_goal INTEGER NOT NULL DEFAULT 75
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrolled_profiles_account ON enrolled_profiles(account_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS imported_students(
            id TEXT PRIMARY KEY,
            roll_number TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT,
            discipline TEXT NOT NULL DEFAULT 'Not Specified',
            program TEXT NOT NULL DEFAULT 'B.tech',
            semester INTEGER NOT NULL DEFAULT 4,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_imported_students_email ON imported_students(email)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_imported_students_name ON imported_students(name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            faculty_id TEXT,
            FOREIGN KEY(faculty_id) REFERENCES faculty(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS imported_student_courses(
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            PRIMARY KEY(student_id, course_id),
            FOREIGN KEY(student_id) REFERENCES imported_students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_imported_student_courses_course ON imported_student_courses(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            date TEXT NOT NULL,
            topic TEXT,
            faculty_id TEXT,
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(course_id, date),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sessions_course ON attendance_sessions(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sessions_date ON attendance_sessions(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_marks(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            identity_ref TEXT NOT NULL,
            identity_variant TEXT NOT NULL,
            status TEXT NOT NULL,
            remarks TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0,
            UNIQUE(session_id, identity_ref),
            FOREIGN KEY(session_id) REFERENCES attendance_sessions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_marks_session ON attendance_marks(session_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_marks_identity ON attendance_marks(identity_ref)",
        [],
    )?;

    // Workspaces created before the email column on imported_students existed
    // need the column added before the resolver's email re-targeting works.
    ensure_imported_students_email(conn)?;
    ensure_sessions_topic(conn)?;

    Ok(())
}

fn ensure_imported_students_email(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "imported_students", "email")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE imported_students ADD COLUMN email TEXT", [])?;
    Ok(())
}

fn ensure_sessions_topic(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance_sessions", "topic")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE attendance_sessions ADD COLUMN topic TEXT", [])?;
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
