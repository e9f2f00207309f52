use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use uuid::Uuid;

use crate::identity;

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub api_key: Option<String>,
    pub oauth_required: bool,
}

impl User {
    /// Display label used by exports: email when present, else username.
    pub fn label(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone)]
pub struct Notebook {
    pub id: String,
    pub identifier: String,
    pub attendance_open: bool,
}

#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub id: String,
    pub user_id: String,
    pub notebook_id: String,
    pub identifier: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub locked: bool,
}

#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub id: String,
    pub user_id: String,
    pub notebook_id: String,
    pub submitted: DateTime<Utc>,
    pub was_open: Option<bool>,
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp in db: {}", s))?
        .with_timezone(&Utc))
}

fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        api_key: row.get(4)?,
        oauth_required: row.get::<_, Option<bool>>(5)?.unwrap_or(false),
    })
}

const USER_COLS: &str = "id, username, email, password_hash, api_key, oauth_required";

pub fn find_user_by_username(conn: &Connection, username: &str) -> anyhow::Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE username = ?", USER_COLS);
    Ok(conn
        .query_row(&sql, [username], user_from_row)
        .optional()?)
}

pub fn find_user_by_api_key(conn: &Connection, api_key: &str) -> anyhow::Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE api_key = ?", USER_COLS);
    Ok(conn.query_row(&sql, [api_key], user_from_row).optional()?)
}

/// Find or lazily create the user for `username`. Atomic under the unique
/// index: concurrent callers race on the insert and both read back one row.
pub fn get_or_create_user(conn: &Connection, username: &str) -> anyhow::Result<User> {
    conn.execute(
        "INSERT INTO users(id, username) VALUES(?, ?) ON CONFLICT(username) DO NOTHING",
        (Uuid::new_v4().to_string(), username),
    )?;
    find_user_by_username(conn, username)?
        .ok_or_else(|| anyhow::anyhow!("user row missing after insert: {}", username))
}

/// Insert a user with a password hash already set. Returns false when the
/// username is taken (no row written).
pub fn insert_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "INSERT INTO users(id, username, password_hash) VALUES(?, ?, ?)
         ON CONFLICT(username) DO NOTHING",
        (Uuid::new_v4().to_string(), username, password_hash),
    )?;
    Ok(changed == 1)
}

pub fn set_password_hash(conn: &Connection, user_id: &str, hash: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE users SET password_hash = ? WHERE id = ?",
        (hash, user_id),
    )?;
    Ok(())
}

/// Assign a fresh API key to the user. Uniqueness is enforced by the index on
/// users.api_key; a collision (vanishingly unlikely with 256-bit keys) is
/// retried up to the identity module's bound.
pub fn rotate_api_key(conn: &Connection, user_id: &str) -> anyhow::Result<String> {
    for _ in 0..identity::KEY_RETRY_LIMIT {
        let key = identity::new_api_key();
        match conn.execute("UPDATE users SET api_key = ? WHERE id = ?", (&key, user_id)) {
            Ok(_) => return Ok(key),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(identity::IdentityError::KeySpaceExhausted.into())
}

pub fn list_users(conn: &Connection) -> anyhow::Result<Vec<User>> {
    let sql = format!("SELECT {} FROM users ORDER BY username", USER_COLS);
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map([], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

/// Map of user id to export label for every known user.
pub fn user_labels(conn: &Connection) -> anyhow::Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT id, username, email FROM users")?;
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let username: String = r.get(1)?;
            let email: Option<String> = r.get(2)?;
            Ok((id, email.unwrap_or(username)))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

fn notebook_from_row(row: &rusqlite::Row) -> rusqlite::Result<Notebook> {
    Ok(Notebook {
        id: row.get(0)?,
        identifier: row.get(1)?,
        attendance_open: row.get(2)?,
    })
}

pub fn find_notebook(conn: &Connection, identifier: &str) -> anyhow::Result<Option<Notebook>> {
    Ok(conn
        .query_row(
            "SELECT id, identifier, attendance_open FROM notebooks WHERE identifier = ?",
            [identifier],
            notebook_from_row,
        )
        .optional()?)
}

pub fn get_or_create_notebook(conn: &Connection, identifier: &str) -> anyhow::Result<Notebook> {
    conn.execute(
        "INSERT INTO notebooks(id, identifier) VALUES(?, ?) ON CONFLICT(identifier) DO NOTHING",
        (Uuid::new_v4().to_string(), identifier),
    )?;
    find_notebook(conn, identifier)?
        .ok_or_else(|| anyhow::anyhow!("notebook row missing after insert: {}", identifier))
}

pub fn set_attendance_open(conn: &Connection, notebook_id: &str, open: bool) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE notebooks SET attendance_open = ? WHERE id = ?",
        (open, notebook_id),
    )?;
    Ok(())
}

pub fn list_notebooks(conn: &Connection) -> anyhow::Result<Vec<Notebook>> {
    let mut stmt = conn
        .prepare("SELECT id, identifier, attendance_open FROM notebooks ORDER BY identifier")?;
    let notebooks = stmt
        .query_map([], notebook_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(notebooks)
}

/// Write a user's response to one question. A single conflict-resolving
/// insert, so concurrent submissions for the same (user, notebook,
/// identifier) key can never create duplicate rows. The locked flag is left
/// alone on update.
pub fn upsert_response(
    conn: &Connection,
    user_id: &str,
    notebook_id: &str,
    identifier: &str,
    response: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<ResponseRecord> {
    conn.execute(
        "INSERT INTO responses(id, user_id, notebook_id, identifier, response, timestamp)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id, notebook_id, identifier) DO UPDATE SET
           response = excluded.response,
           timestamp = excluded.timestamp",
        (
            Uuid::new_v4().to_string(),
            user_id,
            notebook_id,
            identifier,
            response,
            now.to_rfc3339(),
        ),
    )?;
    let (id, response, timestamp, locked) = conn.query_row(
        "SELECT id, response, timestamp, locked FROM responses
         WHERE user_id = ? AND notebook_id = ? AND identifier = ?",
        (user_id, notebook_id, identifier),
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, bool>(3)?,
            ))
        },
    )?;
    Ok(ResponseRecord {
        id,
        user_id: user_id.to_string(),
        notebook_id: notebook_id.to_string(),
        identifier: identifier.to_string(),
        response,
        timestamp: parse_ts(&timestamp)?,
        locked,
    })
}

/// Keep only the identifiers with no locked response row under the notebook.
/// The predicate is notebook-wide: one locked row from any user suppresses
/// the identifier for everyone. Identifiers with no rows at all survive.
/// Input order is preserved.
pub fn locked_filter(
    conn: &Connection,
    notebook_id: &str,
    identifiers: &[String],
) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT 1 FROM responses
         WHERE notebook_id = ? AND identifier = ? AND locked = 1
         LIMIT 1",
    )?;
    let mut out = Vec::with_capacity(identifiers.len());
    for identifier in identifiers {
        let locked: Option<i64> = stmt
            .query_row((notebook_id, identifier), |r| r.get(0))
            .optional()?;
        if locked.is_none() {
            out.push(identifier.clone());
        }
    }
    Ok(out)
}

/// Flip the locked flag on every response row for the notebook+identifier.
/// Returns the number of rows touched.
pub fn set_question_locked(
    conn: &Connection,
    notebook_id: &str,
    identifier: &str,
    locked: bool,
) -> anyhow::Result<usize> {
    let changed = conn.execute(
        "UPDATE responses SET locked = ? WHERE notebook_id = ? AND identifier = ?",
        (locked, notebook_id, identifier),
    )?;
    Ok(changed)
}

/// Every distinct question identifier recorded under the notebook, sorted.
pub fn all_notebook_identifiers(
    conn: &Connection,
    notebook_id: &str,
) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT identifier FROM responses WHERE notebook_id = ? ORDER BY identifier",
    )?;
    let identifiers = stmt
        .query_map([notebook_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(identifiers)
}

/// Append one attendance check-in, snapshotting the notebook's open flag at
/// submission time. Records are never updated after this.
pub fn record_attendance(
    conn: &Connection,
    user_id: &str,
    notebook_id: &str,
    now: DateTime<Utc>,
    was_open: bool,
) -> anyhow::Result<AttendanceRecord> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attendance_submissions(id, user_id, notebook_id, submitted, was_open)
         VALUES(?, ?, ?, ?, ?)",
        (&id, user_id, notebook_id, now.to_rfc3339(), was_open),
    )?;
    Ok(AttendanceRecord {
        id,
        user_id: user_id.to_string(),
        notebook_id: notebook_id.to_string(),
        submitted: now,
        was_open: Some(was_open),
    })
}

/// All attendance records for the notebook in storage (insertion) order.
pub fn load_attendance(
    conn: &Connection,
    notebook_id: &str,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, notebook_id, submitted, was_open
         FROM attendance_submissions
         WHERE notebook_id = ?
         ORDER BY rowid",
    )?;
    let raw = stmt
        .query_map([notebook_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<bool>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut records = Vec::with_capacity(raw.len());
    for (id, user_id, nb_id, submitted, was_open) in raw {
        records.push(AttendanceRecord {
            id,
            user_id,
            notebook_id: nb_id,
            submitted: parse_ts(&submitted)?,
            was_open,
        });
    }
    Ok(records)
}

pub fn clear_all(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("DELETE FROM responses", [])?;
    conn.execute("DELETE FROM attendance_submissions", [])?;
    Ok(())
}

pub fn clear_user(conn: &Connection, user_id: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM responses WHERE user_id = ?", [user_id])?;
    conn.execute(
        "DELETE FROM attendance_submissions WHERE user_id = ?",
        [user_id],
    )?;
    Ok(())
}

pub fn clear_notebook(conn: &Connection, notebook_id: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM responses WHERE notebook_id = ?", [notebook_id])?;
    conn.execute(
        "DELETE FROM attendance_submissions WHERE notebook_id = ?",
        [notebook_id],
    )?;
    Ok(())
}
