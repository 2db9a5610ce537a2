use crate::auth;
use crate::ipc::error::{query_err, respond, HandlerErr, HandlerResult};
use crate::ipc::guard::ADMIN_LOGIN_PATH;
use crate::ipc::params::{principal, require_db, str_param};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const STAFF_HOME: &str = "/dashboard/";
const STUDENT_HOME: &str = "/";

fn login(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let username = str_param(req, "username")?;
    let password = str_param(req, "password")?;

    let Some(who) = auth::authenticate(conn, username.trim(), &password).map_err(query_err)? else {
        tracing::warn!(username = %username, "login failed");
        return Err(HandlerErr::new(
            "invalid_credentials",
            "Please enter a correct username and password.",
        ));
    };
    let token = auth::create_session(conn, &who.user_id)
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    let redirect = if who.is_admin() {
        STAFF_HOME
    } else {
        STUDENT_HOME
    };
    tracing::info!(username = %who.username, role = who.role(), "login");

    Ok(json!({
        "session": token,
        "role": who.role(),
        "redirect": redirect,
        "user": who,
    }))
}

fn logout(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let ended = match req.session.as_deref() {
        Some(token) => auth::delete_session(conn, token)
            .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?,
        None => false,
    };
    Ok(json!({ "loggedOut": ended, "redirect": ADMIN_LOGIN_PATH }))
}

fn whoami(_state: &mut AppState, req: &Request) -> HandlerResult {
    let who = principal(req)?;
    Ok(json!({ "user": who, "role": who.role() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.login" => login(state, req),
        "auth.logout" => logout(state, req),
        "auth.whoami" => whoami(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
