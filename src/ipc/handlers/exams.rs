use crate::cascade;
use crate::ipc::error::{query_err, respond, write_err, HandlerErr, HandlerResult};
use crate::ipc::params::{
    cascade_err, check_max_len, columns, ensure_exists, in_tx, list_where, opt_str, require_db,
    str_param, text_param,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::params_from_iter;
use serde_json::json;
use uuid::Uuid;

const EXAM_NAME_MAX: usize = 100;
const ACADEMIC_YEAR_MAX: usize = 9;

pub fn parse_exam_date(raw: &str) -> Result<String, HandlerErr> {
    chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| {
            HandlerErr::bad_params("date must be YYYY-MM-DD").with_details(json!({ "date": raw }))
        })
}

fn list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let (clause, binds) = list_where(state, "exams", req)?;
    let sql = format!(
        "SELECT e.id, e.name, e.date, e.academic_year,
           (SELECT COUNT(*) FROM marks m WHERE m.exam_id = e.id)
         FROM exams e
         {}
         ORDER BY e.date DESC, e.name",
        clause
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let exams = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let date: String = r.get(2)?;
            let academic_year: String = r.get(3)?;
            let mark_count: i64 = r.get(4)?;
            Ok(json!({
                "id": id,
                "label": format!("{} ({})", name, academic_year),
                "name": name,
                "date": date,
                "academicYear": academic_year,
                "markCount": mark_count,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "exams": exams, "columns": columns(state, "exams") }))
}

fn create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let name = text_param(req, "name")?;
    check_max_len("name", &name, EXAM_NAME_MAX)?;
    let date = parse_exam_date(&str_param(req, "date")?)?;
    let academic_year = text_param(req, "academicYear")?;
    check_max_len("academicYear", &academic_year, ACADEMIC_YEAR_MAX)?;

    let exam_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(id, name, date, academic_year) VALUES(?, ?, ?, ?)",
        (&exam_id, &name, &date, &academic_year),
    )
    .map_err(write_err("db_insert_failed", "exams"))?;
    tracing::info!(exam_id = %exam_id, name = %name, "exam created");
    Ok(json!({ "examId": exam_id, "name": name, "date": date, "academicYear": academic_year }))
}

fn update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let exam_id = str_param(req, "examId")?;
    ensure_exists(conn, "exams", &exam_id, "exam")?;

    let mut sets: Vec<(&'static str, String)> = Vec::new();
    if let Some(name) = opt_str(&req.params, "name") {
        if name.is_empty() {
            return Err(HandlerErr::bad_params("name must not be empty"));
        }
        check_max_len("name", &name, EXAM_NAME_MAX)?;
        sets.push(("name", name));
    }
    if let Some(date) = opt_str(&req.params, "date") {
        sets.push(("date", parse_exam_date(&date)?));
    }
    if let Some(year) = opt_str(&req.params, "academicYear") {
        if year.is_empty() {
            return Err(HandlerErr::bad_params("academicYear must not be empty"));
        }
        check_max_len("academicYear", &year, ACADEMIC_YEAR_MAX)?;
        sets.push(("academic_year", year));
    }

    in_tx(conn, |tx| {
        for (col, v) in &sets {
            let sql = format!("UPDATE exams SET {} = ? WHERE id = ?", col);
            tx.execute(&sql, (v, &exam_id))
                .map_err(write_err("db_update_failed", "exams"))?;
        }
        Ok(())
    })?;
    Ok(json!({ "examId": exam_id }))
}

fn delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let exam_id = str_param(req, "examId")?;
    ensure_exists(conn, "exams", &exam_id, "exam")?;
    in_tx(conn, |tx| cascade::delete_exam(tx, &exam_id).map_err(cascade_err))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "exams.list" => list(state, req),
        "exams.create" => create(state, req),
        "exams.update" => update(state, req),
        "exams.delete" => delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exam_dates_are_normalized() {
        assert_eq!(parse_exam_date(" 2025-06-01 ").expect("date"), "2025-06-01");
        assert!(parse_exam_date("01/06/2025").is_err());
        assert!(parse_exam_date("2025-02-30").is_err());
    }
}
