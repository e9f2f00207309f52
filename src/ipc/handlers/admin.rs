use rusqlite::Connection;
use serde_json::json;

use crate::identity;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{existing_notebook, required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::store;

/// Bulk-create users with pre-set passwords (roster seeding). All-or-nothing:
/// a duplicate username rolls the whole batch back.
fn users_seed(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(items) = params.get("users").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing users"));
    };
    let mut credentials: Vec<(String, String)> = Vec::with_capacity(items.len());
    for item in items {
        let (Some(username), Some(password)) = (
            item.get("username").and_then(|v| v.as_str()),
            item.get("password").and_then(|v| v.as_str()),
        ) else {
            return Err(HandlerErr::bad_params(format!(
                "user entry needs username and password: {}",
                item
            )));
        };
        credentials.push((username.to_string(), password.to_string()));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (username, password) in &credentials {
        let hash = identity::hash_password(password)
            .map_err(|e| HandlerErr::new("hash_failed", e.to_string()))?;
        let inserted = store::insert_user(&tx, username, &hash)
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        if !inserted {
            // Dropping the transaction rolls back prior inserts.
            return Err(HandlerErr::new(
                "duplicate_username",
                format!("username already exists: {}", username),
            ));
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "created": credentials.len() }))
}

fn clear_scope(conn: &Connection, f: impl FnOnce(&Connection) -> anyhow::Result<()>) -> Result<serde_json::Value, HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    f(&tx).map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn clear_all(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    clear_scope(conn, store::clear_all)
}

fn clear_user(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let username = required_str(params, "username")?;
    let user = store::find_user_by_username(conn, &username)
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::not_found(format!("no such user: {}", username)))?;
    clear_scope(conn, |c| store::clear_user(c, &user.id))
}

fn clear_notebook(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let notebook = existing_notebook(conn, params)?;
    clear_scope(conn, |c| store::clear_notebook(c, &notebook.id))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.seed" => Some(with_conn(state, req, users_seed)),
        "clear.all" => Some(with_conn(state, req, clear_all)),
        "clear.user" => Some(with_conn(state, req, clear_user)),
        "clear.notebook" => Some(with_conn(state, req, clear_notebook)),
        _ => None,
    }
}
