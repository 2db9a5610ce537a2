use crate::auth::{self, NewUser};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoSummary {
    pub class_id: String,
    pub class_division_id: String,
    pub student_id: String,
    pub exam_id: String,
    pub subject_ids: Vec<String>,
    pub username: String,
}

fn get_or_create(
    conn: &Connection,
    select_sql: &str,
    select_params: &[&dyn rusqlite::ToSql],
    insert: impl FnOnce(&str) -> rusqlite::Result<usize>,
) -> anyhow::Result<String> {
    let existing: Option<String> = conn
        .query_row(select_sql, select_params, |r| r.get(0))
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    insert(&id)?;
    Ok(id)
}

/// Class 10th with Math/Science/English, division A, one student and one
/// exam. Running it again reuses every existing row.
pub fn seed(conn: &Connection) -> anyhow::Result<DemoSummary> {
    let tx = conn.unchecked_transaction()?;

    let class_id = get_or_create(
        &tx,
        "SELECT id FROM school_classes WHERE name = ? ORDER BY rowid LIMIT 1",
        &[&"10th"],
        |id| tx.execute("INSERT INTO school_classes(id, name) VALUES(?, '10th')", [id]),
    )?;

    let mut subject_ids = Vec::new();
    for name in ["Math", "Science", "English"] {
        let subject_id = get_or_create(
            &tx,
            "SELECT id FROM subjects WHERE name = ? AND class_id = ? ORDER BY rowid LIMIT 1",
            &[&name, &class_id],
            |id| {
                tx.execute(
                    "INSERT INTO subjects(id, name, class_id) VALUES(?, ?, ?)",
                    (id, name, &class_id),
                )
            },
        )?;
        subject_ids.push(subject_id);
    }
    tx.execute("DELETE FROM class_subjects WHERE class_id = ?", [&class_id])?;
    for subject_id in &subject_ids {
        tx.execute(
            "INSERT INTO class_subjects(class_id, subject_id) VALUES(?, ?)",
            (&class_id, subject_id),
        )?;
    }

    let division_id = get_or_create(
        &tx,
        "SELECT id FROM divisions WHERE name = ? ORDER BY rowid LIMIT 1",
        &[&"A"],
        |id| tx.execute("INSERT INTO divisions(id, name) VALUES(?, 'A')", [id]),
    )?;
    let class_division_id = get_or_create(
        &tx,
        "SELECT id FROM class_divisions WHERE class_id = ? AND division_id = ?",
        &[&class_id, &division_id],
        |id| {
            tx.execute(
                "INSERT INTO class_divisions(id, class_id, division_id) VALUES(?, ?, ?)",
                (id, &class_id, &division_id),
            )
        },
    )?;

    let username = "student1".to_string();
    let existing_user: Option<String> = tx
        .query_row("SELECT id FROM users WHERE username = ?", [&username], |r| {
            r.get(0)
        })
        .optional()?;
    let user_id = match existing_user {
        Some(id) => id,
        None => auth::create_user(
            &tx,
            &NewUser {
                username: username.clone(),
                password: username.clone(),
                first_name: "Test".to_string(),
                last_name: "Student".to_string(),
                ..NewUser::default()
            },
        )?,
    };

    let student_id = get_or_create(
        &tx,
        "SELECT id FROM students WHERE user_id = ?",
        &[&user_id],
        |id| {
            tx.execute(
                "INSERT INTO students(id, user_id, roll_number, class_division_id, id_number, updated_at)
                 VALUES(?, ?, '1', ?, 'S1001', ?)",
                (id, &user_id, &class_division_id, crate::db::now_stamp()),
            )
        },
    )?;

    let exam_id = get_or_create(
        &tx,
        "SELECT id FROM exams WHERE name = ? AND academic_year = ? AND date = ?",
        &[&"Midterm", &"2024-2025", &"2025-06-01"],
        |id| {
            tx.execute(
                "INSERT INTO exams(id, name, date, academic_year) VALUES(?, 'Midterm', '2025-06-01', '2024-2025')",
                [id],
            )
        },
    )?;

    tx.commit()?;
    tracing::info!(class_id = %class_id, student_id = %student_id, "demo data ready");

    Ok(DemoSummary {
        class_id,
        class_division_id,
        student_id,
        exam_id,
        subject_ids,
        username,
    })
}
