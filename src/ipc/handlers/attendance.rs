use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

use crate::attendance;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{api_key_user, existing_notebook, optional_bool, required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::render::{self, Table};
use crate::store;

/// Record one check-in, snapshotting the notebook's attendance-open flag at
/// this moment. Later flips of the flag never rewrite the record.
fn attendance_check_in(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user = api_key_user(conn, params)?;
    let notebook_name = required_str(params, "notebook")?;
    let notebook = store::get_or_create_notebook(conn, &notebook_name).map_err(HandlerErr::db)?;
    let record = store::record_attendance(
        conn,
        &user.id,
        &notebook.id,
        Utc::now(),
        notebook.attendance_open,
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({
        "wasOpen": notebook.attendance_open,
        "submitted": record.submitted.to_rfc3339()
    }))
}

fn attendance_set_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(open) = params.get("open").and_then(|v| v.as_bool()) else {
        return Err(HandlerErr::bad_params("missing open"));
    };
    let notebook = if optional_bool(params, "create", false) {
        let identifier = required_str(params, "notebook")?;
        store::get_or_create_notebook(conn, &identifier).map_err(HandlerErr::db)?
    } else {
        existing_notebook(conn, params)?
    };
    store::set_attendance_open(conn, &notebook.id, open)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({
        "notebook": notebook.identifier,
        "attendanceOpen": open
    }))
}

fn attendance_table(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<Table, HandlerErr> {
    let notebook = existing_notebook(conn, params)?;
    let collapse = optional_bool(params, "collapse", true);
    let records = store::load_attendance(conn, &notebook.id).map_err(HandlerErr::db)?;
    let labels = store::user_labels(conn).map_err(HandlerErr::db)?;
    Ok(attendance::to_2d_array(&records, &labels, collapse))
}

fn attendance_export(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let table = attendance_table(conn, params)?;
    Ok(json!({ "rows": table }))
}

fn attendance_export_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let out = required_str(params, "out")?;
    let table = attendance_table(conn, params)?;
    std::fs::write(&out, render::to_csv(&table))
        .map_err(|e| HandlerErr::new("write_failed", e.to_string()))?;
    Ok(json!({ "path": out, "rows": table.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.checkIn" => Some(with_conn(state, req, attendance_check_in)),
        "attendance.setOpen" => Some(with_conn(state, req, attendance_set_open)),
        "attendance.export" => Some(with_conn(state, req, attendance_export)),
        "attendance.exportCsv" => Some(with_conn(state, req, attendance_export_csv)),
        _ => None,
    }
}
