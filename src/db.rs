use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("campus.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS clients(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            FOREIGN KEY(client_id) REFERENCES clients(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_terms_client ON terms(client_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            idn INTEGER NOT NULL,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            is_admin INTEGER NOT NULL DEFAULT 0,
            is_instructor INTEGER NOT NULL DEFAULT 0,
            is_student INTEGER NOT NULL DEFAULT 1,
            credits REAL,
            price REAL,
            created_at TEXT,
            UNIQUE(client_id, idn),
            FOREIGN KEY(client_id) REFERENCES clients(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_client ON users(client_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_client_idn ON users(client_id, idn)",
        [],
    )?;

    // Existing workspaces may predate the billing columns. Add if needed.
    ensure_users_billing_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            user_id TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_user ON attendance(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            user_id TEXT NOT NULL,
            assignment TEXT NOT NULL,
            score REAL NOT NULL,
            PRIMARY KEY(user_id, assignment),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_user ON grades(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            name TEXT NOT NULL,
            term_id TEXT,
            days TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY(client_id) REFERENCES clients(id),
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_client ON courses(client_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_term ON courses(term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_weights(
            course_id TEXT NOT NULL,
            assignment TEXT NOT NULL,
            checkpoint INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(course_id, assignment),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_weights_course ON grade_weights(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS registrations(
            course_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            PRIMARY KEY(course_id, user_id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_course ON registrations(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_user ON registrations(user_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_users_billing_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "users", "credits")? {
        conn.execute("ALTER TABLE users ADD COLUMN credits REAL", [])?;
    }
    if !table_has_column(conn, "users", "price")? {
        conn.execute("ALTER TABLE users ADD COLUMN price REAL", [])?;
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
