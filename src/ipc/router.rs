use serde_json::json;

use super::guard::{self, Guard, Verdict};
use super::handlers;
use super::types::{AppState, Request};
use crate::auth;
use crate::ipc::error::err;

const ROUTES: &[(&str, Guard)] = &[
    ("health", Guard::Public),
    ("workspace.select", Guard::Bootstrap),
    ("auth.login", Guard::Public),
    ("auth.logout", Guard::Public),
    ("auth.whoami", Guard::Authenticated),
    ("admin.registry", Guard::AdminRequired),
    ("dashboard", Guard::AdminRequired),
    ("demo.seed", Guard::AdminRequired),
    ("classes.list", Guard::AdminRequired),
    ("classes.create", Guard::AdminRequired),
    ("classes.update", Guard::AdminRequired),
    ("classes.delete", Guard::AdminRequired),
    ("classes.setSubjects", Guard::AdminRequired),
    ("divisions.list", Guard::AdminRequired),
    ("divisions.create", Guard::AdminRequired),
    ("divisions.update", Guard::AdminRequired),
    ("divisions.delete", Guard::AdminRequired),
    ("classDivisions.list", Guard::AdminRequired),
    ("classDivisions.create", Guard::AdminRequired),
    ("classDivisions.delete", Guard::AdminRequired),
    ("subjects.list", Guard::AdminRequired),
    ("subjects.create", Guard::AdminRequired),
    ("subjects.update", Guard::AdminRequired),
    ("subjects.delete", Guard::AdminRequired),
    ("divisionSubjects.list", Guard::AdminRequired),
    ("divisionSubjects.create", Guard::AdminRequired),
    ("divisionSubjects.delete", Guard::AdminRequired),
    ("students.list", Guard::AdminRequired),
    ("students.get", Guard::AdminRequired),
    ("students.create", Guard::AdminRequired),
    ("students.update", Guard::AdminRequired),
    ("students.delete", Guard::AdminRequired),
    ("students.eligibleSubjects", Guard::AdminRequired),
    ("users.list", Guard::AdminRequired),
    ("users.create", Guard::AdminRequired),
    ("users.setPassword", Guard::AdminRequired),
    ("users.setActive", Guard::AdminRequired),
    ("users.delete", Guard::AdminRequired),
    ("exams.list", Guard::AdminRequired),
    ("exams.create", Guard::AdminRequired),
    ("exams.update", Guard::AdminRequired),
    ("exams.delete", Guard::AdminRequired),
    ("marks.list", Guard::AdminRequired),
    ("marks.create", Guard::AdminRequired),
    ("marks.update", Guard::AdminRequired),
    ("marks.delete", Guard::AdminRequired),
    ("marks.importCsv", Guard::AdminRequired),
    ("marks.bulk.start", Guard::AdminRequired),
    ("marks.bulk.form", Guard::AdminRequired),
    ("marks.bulk.submit", Guard::AdminRequired),
    ("results.forStudent", Guard::AdminRequired),
    ("student.profile.get", Guard::StudentRequired),
    ("student.profile.update", Guard::StudentRequired),
    ("student.results", Guard::StudentRequired),
    ("student.dashboard", Guard::StudentRequired),
];

pub fn guard_for(method: &str) -> Option<Guard> {
    ROUTES
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, g)| *g)
}

pub fn handle_request(state: &mut AppState, mut req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "request");

    let Some(route_guard) = guard_for(&req.method) else {
        return err(
            &req.id,
            "not_implemented",
            format!("unknown method: {}", req.method),
            None,
        );
    };

    let principal = match (state.db.as_ref(), req.session.as_deref()) {
        (Some(conn), Some(token)) => {
            match auth::resolve_session(conn, token, state.config.session_ttl) {
                Ok(p) => p,
                Err(e) => return err(&req.id, "db_query_failed", format!("{e:#}"), None),
            }
        }
        _ => None,
    };

    let route_guard = match (route_guard, state.db.as_ref()) {
        (Guard::Bootstrap, Some(conn)) => match handlers::core::needs_admin(conn) {
            Ok(needs) => guard::effective(route_guard, !needs),
            Err(e) => return e.response(&req.id),
        },
        (g, _) => guard::effective(g, false),
    };

    match guard::evaluate(route_guard, principal) {
        Verdict::Allow(p) => req.principal = p,
        Verdict::Redirect(to) => {
            tracing::info!(method = %req.method, redirect = to, "login required");
            return err(
                &req.id,
                "unauthenticated",
                "login required",
                Some(json!({ "redirect": to })),
            );
        }
        Verdict::Forbidden(msg) => {
            tracing::warn!(method = %req.method, "forbidden");
            return err(&req.id, "forbidden", msg, None);
        }
    }

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::session::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::admin::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::classes::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::divisions::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::subjects::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::users::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::exams::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::marks::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::bulk::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::portal::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("no handler for method: {}", req.method),
        None,
    )
}
