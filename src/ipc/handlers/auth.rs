use rusqlite::Connection;
use serde_json::json;

use crate::identity;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn rotate_key(conn: &Connection, user_id: &str) -> Result<String, HandlerErr> {
    store::rotate_api_key(conn, user_id).map_err(|e| {
        if matches!(
            e.downcast_ref::<identity::IdentityError>(),
            Some(identity::IdentityError::KeySpaceExhausted)
        ) {
            HandlerErr::new("key_space_exhausted", e.to_string())
        } else {
            HandlerErr::db(e)
        }
    })
}

/// Password login. An unknown username creates the user and sets the
/// password; a known user without a password gets one set (seeded accounts
/// excluded, they already carry a hash). Success always rotates the API key.
fn auth_login(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let username = required_str(params, "username")?;
    let password = required_str(params, "password")?;
    if username.trim().is_empty() || password.is_empty() {
        return Err(HandlerErr::bad_params(
            "username and password must be non-empty",
        ));
    }

    let user = store::get_or_create_user(conn, &username).map_err(HandlerErr::db)?;
    if user.oauth_required {
        return Err(HandlerErr::new(
            "invalid_credentials",
            "account requires OAuth login",
        ));
    }

    match user.password_hash.as_deref() {
        None => {
            let hash = identity::hash_password(&password)
                .map_err(|e| HandlerErr::new("hash_failed", e.to_string()))?;
            store::set_password_hash(conn, &user.id, &hash).map_err(HandlerErr::db)?;
        }
        Some(hash) if identity::verify_password(&password, hash) => {}
        Some(_) => {
            return Err(HandlerErr::new(
                "invalid_credentials",
                "invalid username or password",
            ));
        }
    }

    let api_key = rotate_key(conn, &user.id)?;
    Ok(json!({ "apiKey": api_key }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(with_conn(state, req, auth_login)),
        _ => None,
    }
}
