use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};

use crate::auth::Principal;
use crate::ipc::error::{query_err, HandlerErr};
use crate::ipc::types::{AppState, Request};

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn str_param(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Trimmed string that must not be empty.
pub fn text_param(req: &Request, key: &str) -> Result<String, HandlerErr> {
    let v = str_param(req, key)?.trim().to_string();
    if v.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(v)
}

pub fn opt_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

pub fn opt_bool(req: &Request, key: &str) -> Option<bool> {
    req.params.get(key).and_then(|v| v.as_bool())
}

pub fn principal(req: &Request) -> Result<&Principal, HandlerErr> {
    req.principal
        .as_ref()
        .ok_or_else(|| HandlerErr::new("unauthenticated", "login required"))
}

pub fn check_max_len(key: &str, value: &str, max: usize) -> Result<(), HandlerErr> {
    if value.chars().count() > max {
        return Err(HandlerErr::bad_params(format!(
            "{} must be at most {} characters",
            key, max
        )));
    }
    Ok(())
}

/// Search/filter clause for a registered list screen, prefixed with
/// `WHERE` when non-empty.
pub fn list_where(
    state: &AppState,
    entity: &str,
    req: &Request,
) -> Result<(String, Vec<Value>), HandlerErr> {
    let Some(admin) = state.registry.get(entity) else {
        return Err(HandlerErr::new(
            "not_implemented",
            format!("entity not registered: {}", entity),
        ));
    };
    let q = req.params.get("q").and_then(|v| v.as_str());
    let (clause, binds) = admin
        .where_clause(q, req.params.get("filters"))
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    if clause.is_empty() {
        Ok((String::new(), binds))
    } else {
        Ok((format!("WHERE {}", clause), binds))
    }
}

pub fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn
        .query_row(&sql, [id], |r| r.get(0))
        .optional()
        .map_err(query_err)?;
    Ok(found.is_some())
}

pub fn ensure_exists(conn: &Connection, table: &str, id: &str, what: &str) -> Result<(), HandlerErr> {
    if exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(what).with_details(serde_json::json!({ "id": id })))
    }
}

/// Runs `f` in a transaction; any error rolls everything back.
pub fn in_tx<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, HandlerErr>,
) -> Result<T, HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let scoped: &Connection = &tx;
    let out = f(scoped)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(out)
}

pub fn cascade_err(e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("db_delete_failed", format!("{e:#}"))
}

pub fn columns(state: &AppState, entity: &str) -> serde_json::Value {
    state
        .registry
        .get(entity)
        .map(|a| serde_json::json!(a.list_display))
        .unwrap_or_else(|| serde_json::json!([]))
}
