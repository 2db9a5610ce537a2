use crate::db;
use crate::ipc::error::{query_err, respond, HandlerErr, HandlerResult};
use crate::ipc::params::str_param;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

/// True until the workspace has at least one active staff account; the
/// shell then points the operator at `schoold create-admin`.
pub fn needs_admin(conn: &Connection) -> Result<bool, HandlerErr> {
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM users
             WHERE is_active = 1 AND (is_staff = 1 OR is_superuser = 1)",
            [],
            |r| r.get(0),
        )
        .map_err(query_err)?;
    Ok(n == 0)
}

fn health(state: &mut AppState, _req: &Request) -> HandlerResult {
    let needs = match state.db.as_ref() {
        Some(conn) => Some(needs_admin(conn)?),
        None => None,
    };
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "sessionTtlHours": state.config.session_ttl.num_hours(),
        "needsAdmin": needs,
    }))
}

fn workspace_select(state: &mut AppState, req: &Request) -> HandlerResult {
    let path = PathBuf::from(str_param(req, "path")?);
    let conn = db::open_db(&path).map_err(|e| {
        tracing::warn!(workspace = %path.display(), error = %e, "workspace open failed");
        HandlerErr::new("db_open_failed", format!("{e:#}"))
    })?;
    let needs = needs_admin(&conn)?;
    tracing::info!(workspace = %path.display(), "workspace opened");
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    Ok(json!({
        "workspacePath": path.to_string_lossy(),
        "databaseFile": path.join(db::DB_FILE_NAME).to_string_lossy(),
        "needsAdmin": needs,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => health(state, req),
        "workspace.select" => workspace_select(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
