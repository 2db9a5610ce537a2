use crate::bulk::BulkForm;
use crate::eligibility;
use crate::ipc::error::{query_err, respond, HandlerErr, HandlerResult};
use crate::ipc::handlers::marks::upsert_mark;
use crate::ipc::handlers::students::display_name;
use crate::ipc::params::{ensure_exists, in_tx, require_db, str_param};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

fn start(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = require_db(state)?;

    let mut stmt = conn
        .prepare(
            "SELECT s.id, u.username, u.first_name, u.last_name, s.roll_number, c.name || d.name
             FROM students s
             JOIN users u ON u.id = s.user_id
             LEFT JOIN class_divisions cd ON cd.id = s.class_division_id
             LEFT JOIN school_classes c ON c.id = cd.class_id
             LEFT JOIN divisions d ON d.id = cd.division_id
             ORDER BY c.name, d.name, s.roll_number, u.username",
        )
        .map_err(query_err)?;
    let students = stmt
        .query_map([], |r| {
            let username: String = r.get(1)?;
            let first: String = r.get(2)?;
            let last: String = r.get(3)?;
            let class_division: Option<String> = r.get(5)?;
            let name = display_name(&username, &first, &last);
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": name,
                "rollNumber": r.get::<_, String>(4)?,
                "classDivision": class_division,
                "label": format!("{} - {}", name, class_division.as_deref().unwrap_or("None")),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;

    let mut stmt = conn
        .prepare("SELECT id, name, date, academic_year FROM exams ORDER BY date DESC, rowid DESC")
        .map_err(query_err)?;
    let exams = stmt
        .query_map([], |r| {
            let name: String = r.get(1)?;
            let year: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": name,
                "date": r.get::<_, String>(2)?,
                "academicYear": year,
                "label": format!("{} ({})", name, year),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;

    Ok(json!({ "students": students, "exams": exams }))
}

fn existing_scores(
    conn: &Connection,
    student_id: &str,
    exam_id: &str,
) -> Result<HashMap<String, f64>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT subject_id, marks_obtained FROM marks WHERE student_id = ? AND exam_id = ?")
        .map_err(query_err)?;
    let rows = stmt
        .query_map((student_id, exam_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(query_err)?;
    Ok(rows)
}

/// Loads the student/exam pair and builds the form fresh for this request.
fn load_form(conn: &Connection, req: &Request) -> Result<(String, String, BulkForm), HandlerErr> {
    let student_id = str_param(req, "studentId")?;
    let exam_id = str_param(req, "examId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    ensure_exists(conn, "exams", &exam_id, "exam")?;
    let subjects = eligibility::eligible_subjects(conn, &student_id).map_err(query_err)?;
    let existing = existing_scores(conn, &student_id, &exam_id)?;
    let form = BulkForm::build(&subjects, &existing);
    Ok((student_id, exam_id, form))
}

fn form(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let (student_id, exam_id, form) = load_form(conn, req)?;
    let fields: serde_json::Map<String, serde_json::Value> = form
        .descriptors()
        .into_iter()
        .map(|d| (d.subject_id.clone(), json!(d)))
        .collect();
    Ok(json!({
        "studentId": student_id,
        "examId": exam_id,
        "order": form.descriptors().iter().map(|d| d.subject_id.as_str()).collect::<Vec<_>>(),
        "fields": fields,
        "empty": form.is_empty(),
    }))
}

fn submit(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let (student_id, exam_id, form) = load_form(conn, req)?;
    let empty = serde_json::Map::new();
    let submitted = match req.params.get("marks") {
        None | Some(serde_json::Value::Null) => &empty,
        Some(serde_json::Value::Object(m)) => m,
        Some(_) => return Err(HandlerErr::bad_params("marks must be an object")),
    };

    let cleaned = form.clean(submitted).map_err(|errors| {
        HandlerErr::new("invalid_form", "Please correct the errors below.")
            .with_details(json!({ "fieldErrors": errors }))
    })?;

    let (created, updated) = in_tx(conn, |tx| {
        let mut created = 0usize;
        let mut updated = 0usize;
        for (subject_id, score) in &cleaned.scores {
            if upsert_mark(tx, &student_id, subject_id, &exam_id, *score)? {
                created += 1;
            } else {
                updated += 1;
            }
        }
        Ok((created, updated))
    })?;

    tracing::info!(
        student_id = %student_id,
        exam_id = %exam_id,
        created,
        updated,
        "bulk marks saved"
    );
    Ok(json!({
        "created": created,
        "updated": updated,
        "blank": cleaned.blank,
        "ignored": cleaned.ignored,
        "message": "Marks saved successfully.",
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "marks.bulk.start" => start(state, req),
        "marks.bulk.form" => form(state, req),
        "marks.bulk.submit" => submit(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
