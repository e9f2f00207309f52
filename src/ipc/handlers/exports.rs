use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{existing_notebook, optional_bool, optional_str, required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::pivot::{self, IdentityMode, PivotError};
use crate::render::{self, Table};
use crate::store;

fn questions_param(params: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    let Some(raw) = params.get("questions") else {
        return Ok(Vec::new());
    };
    let Some(array) = raw.as_array() else {
        return Err(HandlerErr::bad_params("questions must be an array"));
    };
    array
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| HandlerErr::bad_params("questions must be strings"))
        })
        .collect()
}

fn identity_param(params: &serde_json::Value) -> Result<IdentityMode, HandlerErr> {
    let raw = optional_str(params, "identity").unwrap_or_else(|| "none".to_string());
    IdentityMode::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "identity must be none, hash, or plain (got {})",
            raw
        ))
    })
}

fn pivot_table(conn: &Connection, params: &serde_json::Value) -> Result<Table, HandlerErr> {
    let notebook = existing_notebook(conn, params)?;
    let questions = questions_param(params)?;
    let identity_mode = identity_param(params)?;
    let override_locks = optional_bool(params, "overrideLocks", false);
    pivot::to_2d_array(conn, &notebook.id, &questions, identity_mode, override_locks).map_err(
        |e| match e {
            PivotError::EmptyQuestionSet => HandlerErr::new("empty_question_set", e.to_string()),
            PivotError::Storage(inner) => HandlerErr::db(inner),
        },
    )
}

fn responses_export(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let table = pivot_table(conn, params)?;
    Ok(json!({ "rows": table }))
}

fn responses_export_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let out = required_str(params, "out")?;
    let table = pivot_table(conn, params)?;
    std::fs::write(&out, render::to_csv(&table))
        .map_err(|e| HandlerErr::new("write_failed", e.to_string()))?;
    Ok(json!({ "path": out, "rows": table.len() }))
}

fn reports_users(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let users = store::list_users(conn).map_err(HandlerErr::db)?;
    let rows: Vec<serde_json::Value> = users
        .iter()
        .map(|u| {
            json!({
                "id": u.id,
                "username": u.username,
                "email": u.email,
                "oauthRequired": u.oauth_required,
                "hasApiKey": u.api_key.is_some()
            })
        })
        .collect();
    Ok(json!({ "users": rows }))
}

fn reports_notebooks(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let notebooks = store::list_notebooks(conn).map_err(HandlerErr::db)?;
    let rows: Vec<serde_json::Value> = notebooks
        .iter()
        .map(|nb| {
            json!({
                "id": nb.id,
                "identifier": nb.identifier,
                "attendanceOpen": nb.attendance_open
            })
        })
        .collect();
    Ok(json!({ "notebooks": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "responses.export" => Some(with_conn(state, req, responses_export)),
        "responses.exportCsv" => Some(with_conn(state, req, responses_export_csv)),
        "reports.users" => Some(with_conn(state, req, reports_users)),
        "reports.notebooks" => Some(with_conn(state, req, reports_notebooks)),
        _ => None,
    }
}
