use crate::demo;
use crate::ipc::error::{query_err, respond, HandlerErr, HandlerResult};
use crate::ipc::handlers::students::load_student;
use crate::ipc::params::{require_db, str_param};
use crate::ipc::types::{AppState, Request};
use crate::results;
use rusqlite::Connection;
use serde_json::json;

fn registry(state: &mut AppState, _req: &Request) -> HandlerResult {
    Ok(json!({ "entities": state.registry.entities() }))
}

fn count(conn: &Connection, table: &str) -> Result<i64, HandlerErr> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        .map_err(query_err)
}

fn dashboard(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let mut counts = serde_json::Map::new();
    for (key, table) in [
        ("classes", "school_classes"),
        ("divisions", "divisions"),
        ("classDivisions", "class_divisions"),
        ("subjects", "subjects"),
        ("students", "students"),
        ("exams", "exams"),
        ("marks", "marks"),
    ] {
        counts.insert(key.to_string(), json!(count(conn, table)?));
    }

    let latest = results::latest_exam(conn).map_err(query_err)?;
    let (overall, by_division) = match &latest {
        Some(exam) => {
            let avg: Option<f64> = conn
                .query_row(
                    "SELECT AVG(marks_obtained) FROM marks WHERE exam_id = ?",
                    [&exam.id],
                    |r| r.get(0),
                )
                .map_err(query_err)?;
            let divisions = results::division_averages(conn, &exam.id).map_err(query_err)?;
            (avg.map(results::round_2_decimals), divisions)
        }
        None => (None, Vec::new()),
    };

    Ok(json!({
        "counts": counts,
        "latestExam": latest,
        "latestExamAverage": overall,
        "divisionAverages": by_division,
    }))
}

fn seed_demo(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let summary =
        demo::seed(conn).map_err(|e| HandlerErr::new("db_insert_failed", format!("{e:#}")))?;
    Ok(json!(summary))
}

/// Exam-grouped results plus the latest exam summary for one student.
pub fn student_results(conn: &Connection, student_id: &str) -> HandlerResult {
    let rows = results::load_student_marks(conn, student_id).map_err(query_err)?;
    let groups = results::group_by_exam(rows);
    let latest = results::latest_exam_summary(conn, student_id).map_err(query_err)?;
    Ok(json!({ "exams": groups, "latest": latest }))
}

fn for_student(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let student_id = str_param(req, "studentId")?;
    let Some(student) = load_student(conn, &student_id)? else {
        return Err(HandlerErr::not_found("student").with_details(json!({ "id": student_id })));
    };
    let mut out = student_results(conn, &student_id)?;
    out["student"] = student;
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "admin.registry" => registry(state, req),
        "dashboard" => dashboard(state, req),
        "demo.seed" => seed_demo(state, req),
        "results.forStudent" => for_student(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
