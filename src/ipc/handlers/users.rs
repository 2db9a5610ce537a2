use crate::auth::{self, NewUser};
use crate::cascade;
use crate::ipc::error::{query_err, respond, write_err, HandlerErr, HandlerResult};
use crate::ipc::params::{
    cascade_err, columns, ensure_exists, in_tx, list_where, opt_bool, opt_str, principal,
    require_db, str_param, text_param,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::params_from_iter;
use serde_json::json;

fn list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let (clause, binds) = list_where(state, "users", req)?;
    let sql = format!(
        "SELECT u.id, u.username, u.first_name, u.last_name, u.email,
           u.is_staff, u.is_superuser, u.is_active, s.id
         FROM users u
         LEFT JOIN students s ON s.user_id = u.id
         {}
         ORDER BY u.username",
        clause
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let users = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let username: String = r.get(1)?;
            let first_name: String = r.get(2)?;
            let last_name: String = r.get(3)?;
            let email: String = r.get(4)?;
            let is_staff: i64 = r.get(5)?;
            let is_superuser: i64 = r.get(6)?;
            let is_active: i64 = r.get(7)?;
            let student_id: Option<String> = r.get(8)?;
            Ok(json!({
                "id": id,
                "username": username,
                "firstName": first_name,
                "lastName": last_name,
                "email": email,
                "isStaff": is_staff != 0,
                "isSuperuser": is_superuser != 0,
                "isActive": is_active != 0,
                "studentId": student_id,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "users": users, "columns": columns(state, "users") }))
}

/// Staff accounts. Student accounts are made through `students.create`.
fn create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let username = text_param(req, "username")?;
    let password = str_param(req, "password")?;
    if password.is_empty() {
        return Err(HandlerErr::bad_params("password must not be empty"));
    }
    let new_user = NewUser {
        username: username.clone(),
        password,
        first_name: opt_str(&req.params, "firstName").unwrap_or_default(),
        last_name: opt_str(&req.params, "lastName").unwrap_or_default(),
        email: opt_str(&req.params, "email").unwrap_or_default(),
        is_staff: opt_bool(req, "isStaff").unwrap_or(true),
        is_superuser: opt_bool(req, "isSuperuser").unwrap_or(false),
    };
    let user_id =
        auth::create_user(conn, &new_user).map_err(write_err("db_insert_failed", "users"))?;
    tracing::info!(username = %username, "user created");
    Ok(json!({ "userId": user_id, "username": username }))
}

fn set_password(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let user_id = str_param(req, "userId")?;
    let password = str_param(req, "password")?;
    if password.is_empty() {
        return Err(HandlerErr::bad_params("password must not be empty"));
    }
    let n = auth::set_password(conn, &user_id, &password)
        .map_err(write_err("db_update_failed", "users"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("user"));
    }
    // Existing logins of that account end with the old password.
    conn.execute("DELETE FROM sessions WHERE user_id = ?", [&user_id])
        .map_err(write_err("db_delete_failed", "sessions"))?;
    Ok(json!({ "ok": true }))
}

fn set_active(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let user_id = str_param(req, "userId")?;
    let Some(active) = opt_bool(req, "isActive") else {
        return Err(HandlerErr::bad_params("missing/invalid isActive"));
    };
    if principal(req)?.user_id == user_id {
        return Err(HandlerErr::bad_params("cannot change the account in use"));
    }
    in_tx(conn, |tx| {
        let n = tx
            .execute(
                "UPDATE users SET is_active = ? WHERE id = ?",
                (active as i64, &user_id),
            )
            .map_err(write_err("db_update_failed", "users"))?;
        if n == 0 {
            return Err(HandlerErr::not_found("user"));
        }
        if !active {
            tx.execute("DELETE FROM sessions WHERE user_id = ?", [&user_id])
                .map_err(write_err("db_delete_failed", "sessions"))?;
        }
        Ok(())
    })?;
    tracing::info!(user_id = %user_id, active, "account status changed");
    Ok(json!({ "userId": user_id, "isActive": active }))
}

fn delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let user_id = str_param(req, "userId")?;
    if principal(req)?.user_id == user_id {
        return Err(HandlerErr::bad_params("cannot delete the account in use"));
    }
    ensure_exists(conn, "users", &user_id, "user")?;
    in_tx(conn, |tx| cascade::delete_user(tx, &user_id).map_err(cascade_err))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "users.list" => list(state, req),
        "users.create" => create(state, req),
        "users.setPassword" => set_password(state, req),
        "users.setActive" => set_active(state, req),
        "users.delete" => delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
