use rusqlite::Connection;
use std::path::{Path, PathBuf};

pub const DB_FILE: &str = "gradebook.sqlite3";
/// Settings key holding `{path, exportedAt, dbSha256}` of the newest backup.
pub const LAST_BACKUP_KEY: &str = "backup.last";

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(db_path(workspace))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            authority TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            schema_version INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            course TEXT NOT NULL,
            teacher TEXT,
            created_at INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            schema_version INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classrooms_teacher ON classrooms(teacher)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classroom_students(
            classroom_id TEXT NOT NULL,
            pubkey TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(classroom_id, pubkey),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classroom_students_pubkey ON classroom_students(pubkey)",
        [],
    )?;

    // No percentage column: it is always derived from grade/max_grade.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_wallet TEXT NOT NULL,
            teacher_wallet TEXT NOT NULL,
            assignment_name TEXT NOT NULL,
            grade INTEGER NOT NULL,
            max_grade INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            schema_version INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_wallet)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_teacher ON grades(teacher_wallet)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quarantine(
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            record_key TEXT,
            payload TEXT NOT NULL,
            reason TEXT NOT NULL,
            quarantined_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Workspaces created before user accounts could be deactivated lack is_active.
    ensure_column(conn, "users", "is_active", "INTEGER NOT NULL DEFAULT 1")?;
    ensure_column(conn, "classrooms", "is_active", "INTEGER NOT NULL DEFAULT 1")?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let mut stmt = conn.prepare("SELECT value_json FROM settings WHERE key = ?")?;
    let mut rows = stmt.query([key])?;
    match rows.next()? {
        Some(row) => {
            let text: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&text)?))
        }
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> anyhow::Result<()> {
    if table_has_column(conn, table, column)? {
        return Ok(());
    }
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
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
