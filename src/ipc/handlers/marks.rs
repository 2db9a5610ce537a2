use crate::eligibility;
use crate::exchange::{self, ExportRow};
use crate::ipc::error::{query_err, respond, write_err, HandlerErr, HandlerResult};
use crate::ipc::handlers::students::display_name;
use crate::ipc::params::{columns, ensure_exists, in_tx, list_where, require_db, str_param};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

fn score_param(req: &Request) -> Result<f64, HandlerErr> {
    let Some(v) = req.params.get("marksObtained").and_then(|v| v.as_f64()) else {
        return Err(HandlerErr::bad_params("missing/invalid marksObtained"));
    };
    if !v.is_finite() || v < 0.0 {
        return Err(HandlerErr::bad_params("negative marks are not allowed")
            .with_details(json!({ "value": v })));
    }
    Ok(v)
}

/// Inserts or updates the mark for (student, subject, exam). Returns true
/// when a new row was created.
pub fn upsert_mark(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    exam_id: &str,
    score: f64,
) -> Result<bool, HandlerErr> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM marks WHERE student_id = ? AND subject_id = ? AND exam_id = ?",
            (student_id, subject_id, exam_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_err)?;
    let mark_id = existing.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    conn.execute(
        "INSERT INTO marks(id, student_id, subject_id, exam_id, marks_obtained, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, exam_id) DO UPDATE SET
           marks_obtained = excluded.marks_obtained,
           updated_at = excluded.updated_at",
        (
            &mark_id,
            student_id,
            subject_id,
            exam_id,
            score,
            crate::db::now_stamp(),
        ),
    )
    .map_err(write_err("db_insert_failed", "marks"))?;
    Ok(existing.is_none())
}

fn eligibility_warning(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    if eligibility::is_eligible(conn, student_id, subject_id).map_err(query_err)? {
        return Ok(None);
    }
    Ok(Some(json!({
        "code": "subject_not_eligible",
        "message": "subject is not applicable to the student's class division",
        "studentId": student_id,
        "subjectId": subject_id,
    })))
}

const MARK_SELECT: &str = "SELECT m.id, m.student_id, u.username, u.first_name, u.last_name,
           s.roll_number, m.subject_id, sub.name, m.exam_id, e.name, e.academic_year,
           m.marks_obtained
         FROM marks m
         JOIN students s ON s.id = m.student_id
         JOIN users u ON u.id = s.user_id
         JOIN subjects sub ON sub.id = m.subject_id
         JOIN exams e ON e.id = m.exam_id";

struct MarkListRow {
    id: String,
    student_id: String,
    student: String,
    roll_number: String,
    subject_id: String,
    subject: String,
    exam_id: String,
    exam: String,
    academic_year: String,
    marks_obtained: f64,
}

fn list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let (clause, binds) = list_where(state, "marks", req)?;
    let sql = format!(
        "{} {} ORDER BY e.date DESC, e.name, u.username, sub.name",
        MARK_SELECT, clause
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            let username: String = r.get(2)?;
            let first: String = r.get(3)?;
            let last: String = r.get(4)?;
            Ok(MarkListRow {
                id: r.get(0)?,
                student_id: r.get(1)?,
                student: display_name(&username, &first, &last),
                roll_number: r.get(5)?,
                subject_id: r.get(6)?,
                subject: r.get(7)?,
                exam_id: r.get(8)?,
                exam: r.get(9)?,
                academic_year: r.get(10)?,
                marks_obtained: r.get(11)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;

    let format = req
        .params
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("json");
    match format {
        "json" => {
            let marks = rows
                .iter()
                .map(|m| {
                    json!({
                        "id": m.id,
                        "studentId": m.student_id,
                        "student": m.student,
                        "rollNumber": m.roll_number,
                        "subjectId": m.subject_id,
                        "subject": m.subject,
                        "examId": m.exam_id,
                        "exam": format!("{} ({})", m.exam, m.academic_year),
                        "marksObtained": m.marks_obtained,
                    })
                })
                .collect::<Vec<_>>();
            Ok(json!({ "marks": marks, "columns": columns(state, "marks") }))
        }
        "csv" => {
            let export: Vec<ExportRow> = rows
                .into_iter()
                .map(|m| ExportRow {
                    student: m.student,
                    exam: m.exam,
                    subject: m.subject,
                    marks: m.marks_obtained,
                })
                .collect();
            let csv = exchange::marks_csv(&export);
            let out_path = req.params.get("outPath").and_then(|v| v.as_str());
            if let Some(p) = out_path {
                let path = PathBuf::from(p);
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
                }
                std::fs::write(&path, &csv)
                    .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
                tracing::info!(path = %path.display(), rows = export.len(), "marks exported");
            }
            Ok(json!({
                "filename": "marks.csv",
                "contentType": "text/csv",
                "rowsExported": export.len(),
                "csv": csv,
                "path": out_path,
            }))
        }
        other => Err(HandlerErr::bad_params("format must be json or csv")
            .with_details(json!({ "format": other }))),
    }
}

fn create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let student_id = str_param(req, "studentId")?;
    let subject_id = str_param(req, "subjectId")?;
    let exam_id = str_param(req, "examId")?;
    let score = score_param(req)?;
    ensure_exists(conn, "students", &student_id, "student")?;
    ensure_exists(conn, "subjects", &subject_id, "subject")?;
    ensure_exists(conn, "exams", &exam_id, "exam")?;

    let mark_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO marks(id, student_id, subject_id, exam_id, marks_obtained, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &mark_id,
            &student_id,
            &subject_id,
            &exam_id,
            score,
            crate::db::now_stamp(),
        ),
    )
    .map_err(write_err("db_insert_failed", "marks"))?;

    let warnings: Vec<serde_json::Value> = eligibility_warning(conn, &student_id, &subject_id)?
        .into_iter()
        .collect();
    if !warnings.is_empty() {
        tracing::warn!(student_id = %student_id, subject_id = %subject_id, "mark for ineligible subject");
    }
    Ok(json!({ "markId": mark_id, "warnings": warnings }))
}

fn update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let mark_id = str_param(req, "markId")?;
    let score = score_param(req)?;
    let n = conn
        .execute(
            "UPDATE marks SET marks_obtained = ?, updated_at = ? WHERE id = ?",
            (score, crate::db::now_stamp(), &mark_id),
        )
        .map_err(write_err("db_update_failed", "marks"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("mark"));
    }
    Ok(json!({ "markId": mark_id, "marksObtained": score }))
}

fn delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let mark_id = str_param(req, "markId")?;
    let n = conn
        .execute("DELETE FROM marks WHERE id = ?", [&mark_id])
        .map_err(write_err("db_delete_failed", "marks"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("mark"));
    }
    Ok(json!({ "ok": true }))
}

fn find_student(conn: &Connection, key: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT s.id FROM students s JOIN users u ON u.id = s.user_id
         WHERE u.username = ?1
         UNION ALL
         SELECT s.id FROM students s WHERE s.id_number = ?1
         LIMIT 1",
        [key],
        |r| r.get(0),
    )
    .optional()
    .map_err(query_err)
}

fn get_or_create_exam(
    conn: &Connection,
    name: &str,
    date: Option<chrono::NaiveDate>,
    academic_year: Option<&str>,
) -> Result<(String, bool), HandlerErr> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM exams WHERE name = ? ORDER BY date DESC, rowid DESC LIMIT 1",
            [name],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_err)?;
    if let Some(id) = existing {
        return Ok((id, false));
    }
    let day = date.unwrap_or_else(|| chrono::Local::now().date_naive());
    let year = academic_year
        .map(|s| s.to_string())
        .unwrap_or_else(|| exchange::academic_year_for(day));
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(id, name, date, academic_year) VALUES(?, ?, ?, ?)",
        (&id, name, day.format("%Y-%m-%d").to_string(), &year),
    )
    .map_err(write_err("db_insert_failed", "exams"))?;
    Ok((id, true))
}

fn get_or_create_subject(
    conn: &Connection,
    name: &str,
    class_id: Option<&str>,
) -> Result<(String, bool), HandlerErr> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM subjects WHERE name = ? AND class_id IS ? ORDER BY rowid LIMIT 1",
            (name, class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_err)?;
    if let Some(id) = existing {
        return Ok((id, false));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, class_id) VALUES(?, ?, ?)",
        (&id, name, class_id),
    )
    .map_err(write_err("db_insert_failed", "subjects"))?;
    Ok((id, true))
}

/// Row-by-row upsert from a Student/Exam/Subject/Marks sheet. Students must
/// already exist; exams and subjects are created by name when missing.
fn import_csv(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let text = match (
        req.params.get("text").and_then(|v| v.as_str()),
        req.params.get("path").and_then(|v| v.as_str()),
    ) {
        (Some(t), _) => t.to_string(),
        (None, Some(p)) => std::fs::read_to_string(p).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": p }))
        })?,
        (None, None) => return Err(HandlerErr::bad_params("missing text or path")),
    };
    let parsed = exchange::parse_import(&text)
        .map_err(|e| HandlerErr::bad_params(format!("{e:#}")))?;

    let summary = in_tx(conn, |tx| {
        let mut warnings = parsed.warnings.clone();
        let mut created = 0usize;
        let mut updated = 0usize;
        let mut exams_created = 0usize;
        let mut subjects_created = 0usize;

        for row in &parsed.rows {
            let Some(student_id) = find_student(tx, &row.student)? else {
                warnings.push(json!({
                    "line": row.line_no,
                    "code": "unknown_student",
                    "message": "no student with that username or id number",
                    "value": row.student,
                }));
                continue;
            };
            let placement = eligibility::student_placement(tx, &student_id).map_err(query_err)?;
            let (exam_id, exam_new) = get_or_create_exam(
                tx,
                &row.exam,
                row.date,
                row.academic_year.as_deref(),
            )?;
            let (subject_id, subject_new) = get_or_create_subject(
                tx,
                &row.subject,
                placement.as_ref().map(|p| p.class_id.as_str()),
            )?;
            exams_created += exam_new as usize;
            subjects_created += subject_new as usize;

            if upsert_mark(tx, &student_id, &subject_id, &exam_id, row.marks)? {
                created += 1;
            } else {
                updated += 1;
            }
            if let Some(mut w) = eligibility_warning(tx, &student_id, &subject_id)? {
                w["line"] = json!(row.line_no);
                warnings.push(w);
            }
        }

        Ok(json!({
            "rowsTotal": parsed.total,
            "created": created,
            "updated": updated,
            "examsCreated": exams_created,
            "subjectsCreated": subjects_created,
            "warnings": warnings,
        }))
    })?;
    tracing::info!(rows = parsed.total, "marks imported");
    Ok(summary)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "marks.list" => list(state, req),
        "marks.create" => create(state, req),
        "marks.update" => update(state, req),
        "marks.delete" => delete(state, req),
        "marks.importCsv" => import_csv(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
