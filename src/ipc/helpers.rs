use rusqlite::Connection;

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Notebook, User};

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn optional_bool(params: &serde_json::Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// Run a handler against the selected workspace's connection, mapping the
/// no-workspace case and handler failures into the error envelope.
pub fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

/// Resolve the caller's API key to a user. Fails before any storage
/// mutation; handlers call this first.
pub fn api_key_user(conn: &Connection, params: &serde_json::Value) -> Result<User, HandlerErr> {
    let api_key = required_str(params, "apiKey")?;
    store::find_user_by_api_key(conn, &api_key)
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::new("invalid_api_key", "no user for that API key"))
}

/// Look up an existing notebook by its identifier param.
pub fn existing_notebook(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<Notebook, HandlerErr> {
    let identifier = required_str(params, "notebook")?;
    store::find_notebook(conn, &identifier)
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::not_found(format!("no such notebook: {}", identifier)))
}
