use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("nbforms.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT,
            password_hash TEXT,
            api_key TEXT,
            oauth_required INTEGER
        )",
        [],
    )?;
    // api_key is nullable and SQLite unique indexes permit any number of NULLs,
    // so uniqueness only applies once a key has been assigned.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_api_key ON users(api_key)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notebooks(
            id TEXT PRIMARY KEY,
            identifier TEXT NOT NULL UNIQUE,
            attendance_open INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS responses(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            notebook_id TEXT NOT NULL,
            identifier TEXT NOT NULL,
            response TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            locked INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(notebook_id) REFERENCES notebooks(id),
            UNIQUE(user_id, notebook_id, identifier)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_notebook ON responses(notebook_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_notebook_identifier
         ON responses(notebook_id, identifier)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_submissions(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            notebook_id TEXT NOT NULL,
            submitted TEXT NOT NULL,
            was_open INTEGER,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(notebook_id) REFERENCES notebooks(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_user ON attendance_submissions(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_notebook ON attendance_submissions(notebook_id)",
        [],
    )?;

    Ok(())
}
