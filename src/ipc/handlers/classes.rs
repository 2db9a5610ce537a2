use crate::cascade;
use crate::ipc::error::{query_err, respond, write_err, HandlerErr, HandlerResult};
use crate::ipc::params::{
    cascade_err, columns, ensure_exists, in_tx, list_where, require_db, str_param, text_param,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::params_from_iter;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

const CLASS_NAME_MAX: usize = 20;

fn subject_ids_param(req: &Request) -> Result<Option<Vec<String>>, HandlerErr> {
    let Some(v) = req.params.get("subjectIds") else {
        return Ok(None);
    };
    let Some(arr) = v.as_array() else {
        return Err(HandlerErr::bad_params("subjectIds must be an array"));
    };
    let mut ids = Vec::with_capacity(arr.len());
    for item in arr {
        match item.as_str() {
            Some(s) => ids.push(s.to_string()),
            None => return Err(HandlerErr::bad_params("subjectIds must contain strings")),
        }
    }
    ids.sort();
    ids.dedup();
    Ok(Some(ids))
}

fn replace_class_subjects(
    conn: &rusqlite::Connection,
    class_id: &str,
    subject_ids: &[String],
) -> Result<(), HandlerErr> {
    for sid in subject_ids {
        ensure_exists(conn, "subjects", sid, "subject")?;
    }
    conn.execute("DELETE FROM class_subjects WHERE class_id = ?", [class_id])
        .map_err(write_err("db_delete_failed", "class_subjects"))?;
    for sid in subject_ids {
        conn.execute(
            "INSERT INTO class_subjects(class_id, subject_id) VALUES(?, ?)",
            (class_id, sid),
        )
        .map_err(write_err("db_insert_failed", "class_subjects"))?;
    }
    Ok(())
}

fn list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let (clause, binds) = list_where(state, "classes", req)?;

    let mut subjects_by_class: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT cs.class_id, sub.id, sub.name
             FROM class_subjects cs JOIN subjects sub ON sub.id = cs.subject_id
             ORDER BY sub.name",
        )
        .map_err(query_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    for (class_id, id, name) in rows {
        subjects_by_class
            .entry(class_id)
            .or_default()
            .push(json!({ "id": id, "name": name }));
    }

    let sql = format!(
        "SELECT c.id, c.name,
           (SELECT COUNT(*) FROM class_divisions cd WHERE cd.class_id = c.id) AS division_count
         FROM school_classes c
         {}
         ORDER BY c.name",
        clause
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let classes = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let division_count: i64 = r.get(2)?;
            Ok((id, name, division_count))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?
        .into_iter()
        .map(|(id, name, division_count)| {
            let subjects = subjects_by_class.remove(&id).unwrap_or_default();
            json!({
                "id": id,
                "name": name,
                "divisionCount": division_count,
                "subjects": subjects,
            })
        })
        .collect::<Vec<_>>();

    Ok(json!({ "classes": classes, "columns": columns(state, "classes") }))
}

fn create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let name = text_param(req, "name")?;
    crate::ipc::params::check_max_len("name", &name, CLASS_NAME_MAX)?;
    let subject_ids = subject_ids_param(req)?;

    let class_id = Uuid::new_v4().to_string();
    in_tx(conn, |tx| {
        tx.execute(
            "INSERT INTO school_classes(id, name) VALUES(?, ?)",
            (&class_id, &name),
        )
        .map_err(write_err("db_insert_failed", "school_classes"))?;
        if let Some(ids) = &subject_ids {
            replace_class_subjects(tx, &class_id, ids)?;
        }
        Ok(())
    })?;
    tracing::info!(class_id = %class_id, name = %name, "class created");

    Ok(json!({ "classId": class_id, "name": name }))
}

fn update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let class_id = str_param(req, "classId")?;
    let name = text_param(req, "name")?;
    crate::ipc::params::check_max_len("name", &name, CLASS_NAME_MAX)?;
    let n = conn
        .execute(
            "UPDATE school_classes SET name = ? WHERE id = ?",
            (&name, &class_id),
        )
        .map_err(write_err("db_update_failed", "school_classes"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("class"));
    }
    Ok(json!({ "classId": class_id, "name": name }))
}

fn set_subjects(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let class_id = str_param(req, "classId")?;
    ensure_exists(conn, "school_classes", &class_id, "class")?;
    let Some(subject_ids) = subject_ids_param(req)? else {
        return Err(HandlerErr::bad_params("missing subjectIds"));
    };
    in_tx(conn, |tx| replace_class_subjects(tx, &class_id, &subject_ids))?;
    Ok(json!({ "classId": class_id, "subjectIds": subject_ids }))
}

fn delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let class_id = str_param(req, "classId")?;
    ensure_exists(conn, "school_classes", &class_id, "class")?;
    in_tx(conn, |tx| {
        cascade::delete_class(tx, &class_id).map_err(cascade_err)
    })?;
    tracing::info!(class_id = %class_id, "class deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.list" => list(state, req),
        "classes.create" => create(state, req),
        "classes.update" => update(state, req),
        "classes.setSubjects" => set_subjects(state, req),
        "classes.delete" => delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
