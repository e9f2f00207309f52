use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{api_key_user, existing_notebook, required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::store;

/// Batch submission of question responses. The caller is authenticated and
/// every item validated before anything is written; the writes then run in
/// one transaction so a mid-batch failure leaves prior state untouched.
fn responses_submit(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(items_json) = params.get("responses").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing responses"));
    };
    if items_json.is_empty() {
        return Err(HandlerErr::bad_params("responses must be non-empty"));
    }
    let mut items: Vec<(String, String)> = Vec::with_capacity(items_json.len());
    for item in items_json {
        let Some(identifier) = item.get("identifier").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::bad_params(format!(
                "response missing identifier: {}",
                item
            )));
        };
        let response = item
            .get("response")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        items.push((identifier.to_string(), response));
    }

    let user = api_key_user(conn, params)?;
    let notebook_name = required_str(params, "notebook")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let notebook = store::get_or_create_notebook(&tx, &notebook_name).map_err(HandlerErr::db)?;
    let now = Utc::now();
    for (identifier, response) in &items {
        store::upsert_response(&tx, &user.id, &notebook.id, identifier, response, now)
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "count": items.len() }))
}

/// Administrative lock toggle. The flag lives on response rows but the
/// operation is notebook-wide per identifier, matching how the lock filter
/// reads it.
fn questions_set_locked(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let notebook = existing_notebook(conn, params)?;
    let identifier = required_str(params, "identifier")?;
    let Some(locked) = params.get("locked").and_then(|v| v.as_bool()) else {
        return Err(HandlerErr::bad_params("missing locked"));
    };
    let rows = store::set_question_locked(conn, &notebook.id, &identifier, locked)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "responses.submit" => Some(with_conn(state, req, responses_submit)),
        "questions.setLocked" => Some(with_conn(state, req, questions_set_locked)),
        _ => None,
    }
}
