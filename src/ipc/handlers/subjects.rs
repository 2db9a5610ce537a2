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

const SUBJECT_NAME_MAX: usize = 100;

fn list_subjects(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let (clause, binds) = list_where(state, "subjects", req)?;
    let sql = format!(
        "SELECT sub.id, sub.name, c.id, c.name
         FROM subjects sub
         LEFT JOIN school_classes c ON c.id = sub.class_id
         {}
         ORDER BY sub.name, c.name",
        clause
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let subjects = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let class_id: Option<String> = r.get(2)?;
            let class_name: Option<String> = r.get(3)?;
            let label = match &class_name {
                Some(c) => format!("{} ({})", name, c),
                None => name.clone(),
            };
            Ok(json!({
                "id": id,
                "name": name,
                "classId": class_id,
                "className": class_name,
                "label": label,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "subjects": subjects, "columns": columns(state, "subjects") }))
}

/// A class-scoped subject also joins that class's own subject set.
fn create_subject(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let name = text_param(req, "name")?;
    check_max_len("name", &name, SUBJECT_NAME_MAX)?;
    let class_id = opt_str(&req.params, "classId").filter(|s| !s.is_empty());
    if let Some(cid) = &class_id {
        ensure_exists(conn, "school_classes", cid, "class")?;
    }

    let subject_id = Uuid::new_v4().to_string();
    in_tx(conn, |tx| {
        tx.execute(
            "INSERT INTO subjects(id, name, class_id) VALUES(?, ?, ?)",
            (&subject_id, &name, &class_id),
        )
        .map_err(write_err("db_insert_failed", "subjects"))?;
        if let Some(cid) = &class_id {
            tx.execute(
                "INSERT OR IGNORE INTO class_subjects(class_id, subject_id) VALUES(?, ?)",
                (cid, &subject_id),
            )
            .map_err(write_err("db_insert_failed", "class_subjects"))?;
        }
        Ok(())
    })?;
    Ok(json!({ "subjectId": subject_id, "name": name, "classId": class_id }))
}

fn update_subject(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let subject_id = str_param(req, "subjectId")?;
    ensure_exists(conn, "subjects", &subject_id, "subject")?;
    let name = opt_str(&req.params, "name");
    if let Some(n) = &name {
        if n.is_empty() {
            return Err(HandlerErr::bad_params("name must not be empty"));
        }
        check_max_len("name", n, SUBJECT_NAME_MAX)?;
    }
    // classId: null clears the scope, absent leaves it unchanged.
    let class_change: Option<Option<String>> = match req.params.get("classId") {
        None => None,
        Some(serde_json::Value::Null) => Some(None),
        Some(v) => match v.as_str() {
            Some(s) => {
                ensure_exists(conn, "school_classes", s, "class")?;
                Some(Some(s.to_string()))
            }
            None => return Err(HandlerErr::bad_params("classId must be a string or null")),
        },
    };

    in_tx(conn, |tx| {
        if let Some(n) = &name {
            tx.execute(
                "UPDATE subjects SET name = ? WHERE id = ?",
                (n, &subject_id),
            )
            .map_err(write_err("db_update_failed", "subjects"))?;
        }
        if let Some(cid) = &class_change {
            let previous: Option<String> = tx
                .query_row("SELECT class_id FROM subjects WHERE id = ?", [&subject_id], |r| {
                    r.get(0)
                })
                .map_err(query_err)?;
            tx.execute(
                "UPDATE subjects SET class_id = ? WHERE id = ?",
                (cid, &subject_id),
            )
            .map_err(write_err("db_update_failed", "subjects"))?;
            // The class subject set follows the scope.
            if previous != *cid {
                if let Some(old) = &previous {
                    tx.execute(
                        "DELETE FROM class_subjects WHERE class_id = ? AND subject_id = ?",
                        (old, &subject_id),
                    )
                    .map_err(write_err("db_delete_failed", "class_subjects"))?;
                }
                if let Some(new) = cid {
                    tx.execute(
                        "INSERT OR IGNORE INTO class_subjects(class_id, subject_id) VALUES(?, ?)",
                        (new, &subject_id),
                    )
                    .map_err(write_err("db_insert_failed", "class_subjects"))?;
                }
            }
        }
        Ok(())
    })?;
    Ok(json!({ "subjectId": subject_id }))
}

fn delete_subject(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let subject_id = str_param(req, "subjectId")?;
    ensure_exists(conn, "subjects", &subject_id, "subject")?;
    in_tx(conn, |tx| {
        cascade::delete_subject(tx, &subject_id).map_err(cascade_err)
    })?;
    Ok(json!({ "ok": true }))
}

fn list_division_subjects(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let (clause, binds) = list_where(state, "divisionSubjects", req)?;
    let sql = format!(
        "SELECT ds.id, sub.id, sub.name, cd.id, c.name || d.name
         FROM division_subjects ds
         JOIN subjects sub ON sub.id = ds.subject_id
         JOIN class_divisions cd ON cd.id = ds.class_division_id
         JOIN school_classes c ON c.id = cd.class_id
         JOIN divisions d ON d.id = cd.division_id
         {}
         ORDER BY c.name, d.name, sub.name",
        clause
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let subject_id: String = r.get(1)?;
            let subject_name: String = r.get(2)?;
            let class_division_id: String = r.get(3)?;
            let class_division: String = r.get(4)?;
            Ok(json!({
                "id": id,
                "subjectId": subject_id,
                "subjectName": subject_name,
                "classDivisionId": class_division_id,
                "classDivision": class_division,
                "label": format!("{} - {}", subject_name, class_division),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "divisionSubjects": rows, "columns": columns(state, "divisionSubjects") }))
}

fn create_division_subject(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let subject_id = str_param(req, "subjectId")?;
    let class_division_id = str_param(req, "classDivisionId")?;
    ensure_exists(conn, "subjects", &subject_id, "subject")?;
    ensure_exists(conn, "class_divisions", &class_division_id, "class division")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO division_subjects(id, subject_id, class_division_id) VALUES(?, ?, ?)",
        (&id, &subject_id, &class_division_id),
    )
    .map_err(write_err("db_insert_failed", "division_subjects"))?;
    Ok(json!({ "divisionSubjectId": id }))
}

fn delete_division_subject(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let id = str_param(req, "divisionSubjectId")?;
    let n = conn
        .execute("DELETE FROM division_subjects WHERE id = ?", [&id])
        .map_err(write_err("db_delete_failed", "division_subjects"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("division subject"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "subjects.list" => list_subjects(state, req),
        "subjects.create" => create_subject(state, req),
        "subjects.update" => update_subject(state, req),
        "subjects.delete" => delete_subject(state, req),
        "divisionSubjects.list" => list_division_subjects(state, req),
        "divisionSubjects.create" => create_division_subject(state, req),
        "divisionSubjects.delete" => delete_division_subject(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
