//! Student-facing pages. Every method acts on the logged-in student's own
//! record only.

use crate::ipc::error::{respond, HandlerErr, HandlerResult};
use crate::ipc::handlers::admin::student_results;
use crate::ipc::handlers::students::{apply_patch, load_student};
use crate::ipc::params::{principal, require_db};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const SELF_EDITABLE: &[&str] = &["phoneNumber", "address", "alternateEmail", "profilePhoto"];

fn profile_not_found() -> HandlerErr {
    HandlerErr::new("profile_not_found", "Student profile not found.")
        .with_details(json!({ "redirect": "/" }))
}

fn own_student_id(req: &Request) -> Result<String, HandlerErr> {
    principal(req)?.student_id.clone().ok_or_else(profile_not_found)
}

fn profile_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let student_id = own_student_id(req)?;
    let student = load_student(conn, &student_id)?.ok_or_else(profile_not_found)?;
    Ok(json!({ "student": student, "editable": SELF_EDITABLE }))
}

fn profile_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let student_id = own_student_id(req)?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    if load_student(conn, &student_id)?.is_none() {
        return Err(profile_not_found());
    }
    let changed = apply_patch(conn, &student_id, patch, SELF_EDITABLE)?;
    let student = load_student(conn, &student_id)?.ok_or_else(profile_not_found)?;
    tracing::info!(student_id = %student_id, fields = changed.len(), "profile updated");
    Ok(json!({
        "student": student,
        "changed": changed,
        "message": "Profile updated successfully.",
    }))
}

fn results(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let student_id = own_student_id(req)?;
    if load_student(conn, &student_id)?.is_none() {
        return Err(profile_not_found());
    }
    student_results(conn, &student_id)
}

fn dashboard(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let student_id = own_student_id(req)?;
    let student = load_student(conn, &student_id)?.ok_or_else(profile_not_found)?;
    let summary = crate::results::latest_exam_summary(conn, &student_id)
        .map_err(crate::ipc::error::query_err)?;
    Ok(json!({ "student": student, "latest": summary }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "student.profile.get" => profile_get(state, req),
        "student.profile.update" => profile_update(state, req),
        "student.results" => results(state, req),
        "student.dashboard" => dashboard(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
