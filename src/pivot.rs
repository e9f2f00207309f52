use rusqlite::{params_from_iter, types::Value, Connection};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

use crate::identity;
use crate::render::Table;
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    None,
    Hash,
    Plain,
}

impl IdentityMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "hash" => Some(Self::Hash),
            "plain" => Some(Self::Plain),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PivotError {
    #[error("no questions remain after lock filtering")]
    EmptyQuestionSet,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Pivot the notebook's responses into a wide table: one row per user, one
/// column per question identifier.
///
/// An empty `identifiers` slice means "every question recorded under the
/// notebook". Unless `override_locks` is set, identifiers with any locked
/// response row are dropped first; if nothing survives the export fails
/// rather than producing a silently empty table. Column order is always
/// lexicographic over the surviving identifiers, regardless of request
/// order. Row order over users is first appearance in storage.
pub fn to_2d_array(
    conn: &Connection,
    notebook_id: &str,
    identifiers: &[String],
    identity_mode: IdentityMode,
    override_locks: bool,
) -> Result<Table, PivotError> {
    let requested = if identifiers.is_empty() {
        store::all_notebook_identifiers(conn, notebook_id)?
    } else {
        identifiers.to_vec()
    };

    let surviving = if override_locks {
        requested
    } else {
        store::locked_filter(conn, notebook_id, &requested)?
    };

    // Sorted and deduplicated: each identifier yields exactly one column.
    let columns: Vec<String> = surviving.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    if columns.is_empty() {
        return Err(PivotError::EmptyQuestionSet);
    }

    let mut header: Vec<Option<String>> = Vec::with_capacity(columns.len() + 1);
    if identity_mode != IdentityMode::None {
        header.push(Some("user".to_string()));
    }
    header.extend(columns.iter().cloned().map(Some));
    let mut rows: Table = vec![header];

    let placeholders = vec!["?"; columns.len()].join(", ");
    let mut params: Vec<Value> = Vec::with_capacity(columns.len() + 1);
    params.push(Value::from(notebook_id.to_string()));
    params.extend(columns.iter().map(|c| Value::from(c.clone())));

    // Distinct users with at least one matching response, by first appearance.
    let users_sql = format!(
        "SELECT user_id FROM responses
         WHERE notebook_id = ? AND identifier IN ({})
         GROUP BY user_id
         ORDER BY MIN(rowid)",
        placeholders
    );
    let mut stmt = conn.prepare(&users_sql).map_err(anyhow::Error::from)?;
    let user_ids = stmt
        .query_map(params_from_iter(params.iter().cloned()), |r| {
            r.get::<_, String>(0)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(anyhow::Error::from)?;

    // (user, identifier) -> response text. The store's unique index forbids
    // duplicate keys; if one somehow slipped in, the later row wins.
    let cells_sql = format!(
        "SELECT user_id, identifier, response FROM responses
         WHERE notebook_id = ? AND identifier IN ({})",
        placeholders
    );
    let mut stmt = conn.prepare(&cells_sql).map_err(anyhow::Error::from)?;
    let cells = stmt
        .query_map(params_from_iter(params.into_iter()), |r| {
            Ok((
                (r.get::<_, String>(0)?, r.get::<_, String>(1)?),
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(anyhow::Error::from)?;

    let mut identity_stmt = conn
        .prepare("SELECT username, email FROM users WHERE id = ?")
        .map_err(anyhow::Error::from)?;
    for user_id in user_ids {
        let mut row: Vec<Option<String>> = Vec::with_capacity(columns.len() + 1);
        if identity_mode != IdentityMode::None {
            let (username, email) = identity_stmt
                .query_row([&user_id], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
                })
                .map_err(anyhow::Error::from)?;
            let cell = match identity_mode {
                IdentityMode::Hash => identity::anonymize(&username),
                _ => email.unwrap_or(username),
            };
            row.push(Some(cell));
        }
        for column in &columns {
            row.push(cells.get(&(user_id.clone(), column.clone())).cloned());
        }
        rows.push(row);
    }

    Ok(rows)
}
