use crate::cascade;
use crate::ipc::error::{query_err, respond, write_err, HandlerErr, HandlerResult};
use crate::ipc::params::{
    cascade_err, check_max_len, columns, ensure_exists, in_tx, list_where, require_db, str_param,
    text_param,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::params_from_iter;
use serde_json::json;
use uuid::Uuid;

const DIVISION_NAME_MAX: usize = 2;

fn list_divisions(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let (clause, binds) = list_where(state, "divisions", req)?;
    let sql = format!(
        "SELECT d.id, d.name FROM divisions d {} ORDER BY d.name",
        clause
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let divisions = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "divisions": divisions, "columns": columns(state, "divisions") }))
}

fn create_division(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let name = text_param(req, "name")?;
    check_max_len("name", &name, DIVISION_NAME_MAX)?;
    let division_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO divisions(id, name) VALUES(?, ?)",
        (&division_id, &name),
    )
    .map_err(write_err("db_insert_failed", "divisions"))?;
    Ok(json!({ "divisionId": division_id, "name": name }))
}

fn update_division(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let division_id = str_param(req, "divisionId")?;
    let name = text_param(req, "name")?;
    check_max_len("name", &name, DIVISION_NAME_MAX)?;
    let n = conn
        .execute(
            "UPDATE divisions SET name = ? WHERE id = ?",
            (&name, &division_id),
        )
        .map_err(write_err("db_update_failed", "divisions"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("division"));
    }
    Ok(json!({ "divisionId": division_id, "name": name }))
}

fn delete_division(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let division_id = str_param(req, "divisionId")?;
    ensure_exists(conn, "divisions", &division_id, "division")?;
    in_tx(conn, |tx| {
        cascade::delete_division(tx, &division_id).map_err(cascade_err)
    })?;
    Ok(json!({ "ok": true }))
}

fn list_class_divisions(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let (clause, binds) = list_where(state, "classDivisions", req)?;
    let sql = format!(
        "SELECT cd.id, c.id, c.name, d.id, d.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_division_id = cd.id)
         FROM class_divisions cd
         JOIN school_classes c ON c.id = cd.class_id
         JOIN divisions d ON d.id = cd.division_id
         {}
         ORDER BY c.name, d.name",
        clause
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: String = r.get(0)?;
            let class_id: String = r.get(1)?;
            let class_name: String = r.get(2)?;
            let division_id: String = r.get(3)?;
            let division_name: String = r.get(4)?;
            let student_count: i64 = r.get(5)?;
            Ok(json!({
                "id": id,
                "classId": class_id,
                "className": class_name,
                "divisionId": division_id,
                "divisionName": division_name,
                "label": format!("{}{}", class_name, division_name),
                "studentCount": student_count,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
    Ok(json!({ "classDivisions": rows, "columns": columns(state, "classDivisions") }))
}

fn create_class_division(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let class_id = str_param(req, "classId")?;
    let division_id = str_param(req, "divisionId")?;
    ensure_exists(conn, "school_classes", &class_id, "class")?;
    ensure_exists(conn, "divisions", &division_id, "division")?;
    let class_division_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO class_divisions(id, class_id, division_id) VALUES(?, ?, ?)",
        (&class_division_id, &class_id, &division_id),
    )
    .map_err(write_err("db_insert_failed", "class_divisions"))?;
    Ok(json!({ "classDivisionId": class_division_id }))
}

fn delete_class_division(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state)?;
    let class_division_id = str_param(req, "classDivisionId")?;
    ensure_exists(conn, "class_divisions", &class_division_id, "class division")?;
    in_tx(conn, |tx| {
        cascade::delete_class_division(tx, &class_division_id).map_err(cascade_err)
    })?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "divisions.list" => list_divisions(state, req),
        "divisions.create" => create_division(state, req),
        "divisions.update" => update_division(state, req),
        "divisions.delete" => delete_division(state, req),
        "classDivisions.list" => list_class_divisions(state, req),
        "classDivisions.create" => create_class_division(state, req),
        "classDivisions.delete" => delete_class_division(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
