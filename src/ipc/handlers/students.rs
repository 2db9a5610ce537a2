use crate::auth::{self, NewUser};
use crate::cascade;
use crate::eligibility;
use crate::ipc::error::{query_err, respond, write_err, HandlerErr, HandlerResult};
use crate::ipc::params::{
    cascade_err, check_max_len, columns, ensure_exists, in_tx, list_where, opt_str, require_db,
    str_param, text_param,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const ROLL_NUMBER_MAX: usize = 20;
const ID_NUMBER_MAX: usize = 20;
pub const PHONE_MAX: usize = 15;

const STUDENT_SELECT: &str = "SELECT s.id, u.id, u.username, u.first_name, u.last_name, u.email,
           s.roll_number, s.id_number, s.class_division_id, c.name || d.name,
           s.phone_number, s.address, s.alternate_email, s.profile_photo, s.updated_at
         FROM students s
         JOIN users u ON u.id = s.user_id
         LEFT JOIN class_divisions cd ON cd.id = s.class_division_id
         LEFT JOIN school_classes c ON c.id = cd.class_id
         LEFT JOIN divisions d ON d.id = cd.division_id";

pub fn display_name(username: &str, first: &str, last: &str) -> String {
    let full = format!("{} {}", first.trim(), last.trim()).trim().to_string();
    if full.is_empty() {
        username.to_string()
    } else {
        full
    }
}

fn student_row_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = r.get(0)?;
    let user_id: String = r.get(1)?;
    let username: String = r.get(2)?;
    let first_name: String = r.get(3)?;
    let last_name: String = r.get(4)?;
    let email: String = r.get(5)?;
    let roll_number: String = r.get(6)?;
    let id_number: String = r.get(7)?;
    let class_division_id: Option<String> = r.get(8)?;
    let class_division: Option<String> = r.get(9)?;
    let name = display_name(&username, &first_name, &last_name);
    let label = match &class_division {
        Some(cd) => format!("{} - {}", name, cd),
        None => format!("{} - None", name),
    };
    Ok(json!({
        "id": id,
        "userId": user_id,
        "username": username,
        "firstName": first_name,
        "lastName": last_name,
        "email": email,
        "name": name,
        "label": label,
        "rollNumber": roll_number,
        "idNumber": id_number,
        "classDivisionId": class_division_id,
        "classDivision": class_division,
        "phoneNumber": r.get::<_, Option<String>>(10)?,
        "address": r.get::<_, Option<String>>(11)?,
        "alternateEmail": r.get::<_, Option<String>>(12)?,
        "profilePhoto": r.get::<_, Option<String>>(13)?,
        "updatedAt": r.get::<_, Option<String>>(14)?,
    }))
}

pub fn load_student(conn: &Connection, student_id: &str) -> Result<Option<serde_json::Value>, HandlerErr> {
    let sql = format!("{} WHERE s.id = ?", STUDENT_SELECT);
    conn.query_row(&sql, [student_id], student_row_json)
        .optional()
        .map_err(query_err)
}

/// Minimal sanity check; the address only needs one `@` between non-empty
/// parts.
pub fn valid_email(s: &str) -> bool {
    let mut parts = s.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && !domain.is_empty() && !s.contains(char::is_whitespace)
        }
        _ => false,
    }
}

fn list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let (clause, binds) = list_where(state, "students", req)?;
    let sql = format!(
        "{} {} ORDER BY c.name, d.name, s.roll_number, u.username",
        STUDENT_SELECT, clause
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let students = stmt
        .query_map(params_from_iter(binds), student_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "students": students, "columns": columns(state, "students") }))
}

fn get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let student_id = str_param(req, "studentId")?;
    let Some(student) = load_student(conn, &student_id)? else {
        return Err(HandlerErr::not_found("student"));
    };
    let subjects = eligibility::eligible_subjects(conn, &student_id).map_err(query_err)?;
    Ok(json!({ "student": student, "eligibleSubjects": subjects }))
}

fn eligible_subjects(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let student_id = str_param(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let placement = eligibility::student_placement(conn, &student_id).map_err(query_err)?;
    let (source, subjects) = match &placement {
        Some(p) => (
            eligibility::subject_source(&p.class_name),
            eligibility::subjects_for_placement(conn, p).map_err(query_err)?,
        ),
        None => (eligibility::SubjectSource::None, Vec::new()),
    };
    Ok(json!({
        "studentId": student_id,
        "source": source,
        "grade": placement.as_ref().and_then(|p| eligibility::parse_grade(&p.class_name)),
        "subjects": subjects,
    }))
}

fn check_division(conn: &Connection, class_division_id: &Option<String>) -> Result<(), HandlerErr> {
    if let Some(cd) = class_division_id {
        ensure_exists(conn, "class_divisions", cd, "class division")?;
    }
    Ok(())
}

/// Creates the login account and the student row together; a failure on
/// either leaves neither behind.
fn create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let username = text_param(req, "username")?;
    let password = str_param(req, "password")?;
    if password.is_empty() {
        return Err(HandlerErr::bad_params("password must not be empty"));
    }
    let roll_number = text_param(req, "rollNumber")?;
    check_max_len("rollNumber", &roll_number, ROLL_NUMBER_MAX)?;
    let id_number = text_param(req, "idNumber")?;
    check_max_len("idNumber", &id_number, ID_NUMBER_MAX)?;
    let class_division_id = opt_str(&req.params, "classDivisionId").filter(|s| !s.is_empty());
    check_division(conn, &class_division_id)?;
    let email = opt_str(&req.params, "email").unwrap_or_default();
    if !email.is_empty() && !valid_email(&email) {
        return Err(HandlerErr::bad_params("Enter a valid email address.")
            .with_details(json!({ "field": "email" })));
    }

    let new_user = NewUser {
        username: username.clone(),
        password,
        first_name: opt_str(&req.params, "firstName").unwrap_or_default(),
        last_name: opt_str(&req.params, "lastName").unwrap_or_default(),
        email,
        is_staff: false,
        is_superuser: false,
    };

    let student_id = Uuid::new_v4().to_string();
    let user_id = in_tx(conn, |tx| {
        let user_id =
            auth::create_user(tx, &new_user).map_err(write_err("db_insert_failed", "users"))?;
        tx.execute(
            "INSERT INTO students(id, user_id, roll_number, class_division_id, id_number, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &student_id,
                &user_id,
                &roll_number,
                &class_division_id,
                &id_number,
                crate::db::now_stamp(),
            ),
        )
        .map_err(write_err("db_insert_failed", "students"))?;
        Ok(user_id)
    })?;
    tracing::info!(student_id = %student_id, username = %username, "student created");

    Ok(json!({ "studentId": student_id, "userId": user_id }))
}

/// Applies a student/account patch. Shared with the student portal, which
/// passes only the personal-detail keys.
pub fn apply_patch(
    conn: &Connection,
    student_id: &str,
    patch: &serde_json::Map<String, serde_json::Value>,
    allowed: &[&str],
) -> Result<Vec<String>, HandlerErr> {
    let mut student_sets: Vec<(&'static str, Option<String>)> = Vec::new();
    let mut user_sets: Vec<(&'static str, String)> = Vec::new();
    let mut changed = Vec::new();

    for (key, value) in patch {
        if !allowed.contains(&key.as_str()) {
            return Err(HandlerErr::bad_params(format!("field not editable: {}", key)));
        }
        let text = match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            _ => return Err(HandlerErr::bad_params(format!("{} must be a string or null", key))),
        };
        let blank_to_none = text.clone().filter(|s| !s.is_empty());
        match key.as_str() {
            "rollNumber" | "idNumber" => {
                let Some(v) = blank_to_none else {
                    return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
                };
                check_max_len(key, &v, ROLL_NUMBER_MAX.max(ID_NUMBER_MAX))?;
                let col = if key == "rollNumber" { "roll_number" } else { "id_number" };
                student_sets.push((col, Some(v)));
            }
            "classDivisionId" => {
                check_division(conn, &blank_to_none)?;
                student_sets.push(("class_division_id", blank_to_none));
            }
            "phoneNumber" => {
                if let Some(v) = &blank_to_none {
                    check_max_len(key, v, PHONE_MAX)?;
                }
                student_sets.push(("phone_number", blank_to_none));
            }
            "address" => student_sets.push(("address", blank_to_none)),
            "alternateEmail" => {
                if let Some(v) = &blank_to_none {
                    if !valid_email(v) {
                        return Err(HandlerErr::bad_params("Enter a valid email address.")
                            .with_details(json!({ "field": key })));
                    }
                }
                student_sets.push(("alternate_email", blank_to_none));
            }
            "profilePhoto" => student_sets.push(("profile_photo", blank_to_none)),
            "firstName" => user_sets.push(("first_name", text.unwrap_or_default())),
            "lastName" => user_sets.push(("last_name", text.unwrap_or_default())),
            "email" => {
                let v = text.unwrap_or_default();
                if !v.is_empty() && !valid_email(&v) {
                    return Err(HandlerErr::bad_params("Enter a valid email address.")
                        .with_details(json!({ "field": key })));
                }
                user_sets.push(("email", v));
            }
            other => return Err(HandlerErr::bad_params(format!("unknown field: {}", other))),
        }
        changed.push(key.clone());
    }

    let user_id: Option<String> = conn
        .query_row("SELECT user_id FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_err)?;
    let Some(user_id) = user_id else {
        return Err(HandlerErr::not_found("student"));
    };

    if changed.is_empty() {
        return Ok(changed);
    }

    // One statement per table so unique constraints only see the final row.
    let mut student_binds: Vec<Value> = student_sets
        .iter()
        .map(|(_, v)| v.clone().map(Value::Text).unwrap_or(Value::Null))
        .collect();
    let mut student_cols: Vec<String> = student_sets
        .iter()
        .map(|(col, _)| format!("{} = ?", col))
        .collect();
    student_cols.push("updated_at = ?".to_string());
    student_binds.push(Value::Text(crate::db::now_stamp()));
    student_binds.push(Value::Text(student_id.to_string()));

    in_tx(conn, |tx| {
        let sql = format!("UPDATE students SET {} WHERE id = ?", student_cols.join(", "));
        tx.execute(&sql, params_from_iter(&student_binds))
            .map_err(write_err("db_update_failed", "students"))?;
        if !user_sets.is_empty() {
            let cols = user_sets
                .iter()
                .map(|(col, _)| format!("{} = ?", col))
                .collect::<Vec<_>>()
                .join(", ");
            let mut binds: Vec<Value> =
                user_sets.iter().map(|(_, v)| Value::Text(v.clone())).collect();
            binds.push(Value::Text(user_id.clone()));
            let sql = format!("UPDATE users SET {} WHERE id = ?", cols);
            tx.execute(&sql, params_from_iter(&binds))
                .map_err(write_err("db_update_failed", "users"))?;
        }
        Ok(())
    })?;
    Ok(changed)
}

const ADMIN_EDITABLE: &[&str] = &[
    "rollNumber",
    "idNumber",
    "classDivisionId",
    "phoneNumber",
    "address",
    "alternateEmail",
    "profilePhoto",
    "firstName",
    "lastName",
    "email",
];

fn update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let student_id = str_param(req, "studentId")?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let changed = apply_patch(conn, &student_id, patch, ADMIN_EDITABLE)?;
    Ok(json!({ "studentId": student_id, "changed": changed }))
}

fn delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let student_id = str_param(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    in_tx(conn, |tx| {
        cascade::delete_student(tx, &student_id).map_err(cascade_err)
    })?;
    tracing::info!(student_id = %student_id, "student deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => list(state, req),
        "students.get" => get(state, req),
        "students.create" => create(state, req),
        "students.update" => update(state, req),
        "students.delete" => delete(state, req),
        "students.eligibleSubjects" => eligible_subjects(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_check() {
        assert!(valid_email("a@b.org"));
        assert!(!valid_email("a@@b"));
        assert!(!valid_email("@b"));
        assert!(!valid_email("a b@c"));
        assert!(!valid_email("plain"));
    }

    #[test]
    fn display_name_falls_back_to_username() {
        assert_eq!(display_name("kid", "", " "), "kid");
        assert_eq!(display_name("kid", "Test", "Student"), "Test Student");
        assert_eq!(display_name("kid", "Test", ""), "Test");
    }
}
