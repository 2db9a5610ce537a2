//! Dependent-row deletes. There is no ON DELETE CASCADE in the schema, so
//! every delete goes through here, inside the caller's transaction.

use anyhow::Context;
use rusqlite::Connection;

fn ids_where(conn: &Connection, sql: &str, key: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([key], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn exec(conn: &Connection, table: &str, sql: &str, key: &str) -> anyhow::Result<usize> {
    conn.execute(sql, [key])
        .with_context(|| format!("delete from {} failed", table))
}

pub fn delete_subject(conn: &Connection, subject_id: &str) -> anyhow::Result<()> {
    exec(conn, "marks", "DELETE FROM marks WHERE subject_id = ?", subject_id)?;
    exec(
        conn,
        "division_subjects",
        "DELETE FROM division_subjects WHERE subject_id = ?",
        subject_id,
    )?;
    exec(
        conn,
        "class_subjects",
        "DELETE FROM class_subjects WHERE subject_id = ?",
        subject_id,
    )?;
    exec(conn, "subjects", "DELETE FROM subjects WHERE id = ?", subject_id)?;
    Ok(())
}

/// Students of the section stay, with no section.
pub fn delete_class_division(conn: &Connection, class_division_id: &str) -> anyhow::Result<()> {
    exec(
        conn,
        "division_subjects",
        "DELETE FROM division_subjects WHERE class_division_id = ?",
        class_division_id,
    )?;
    conn.execute(
        "UPDATE students SET class_division_id = NULL WHERE class_division_id = ?",
        [class_division_id],
    )
    .context("detach students failed")?;
    exec(
        conn,
        "class_divisions",
        "DELETE FROM class_divisions WHERE id = ?",
        class_division_id,
    )?;
    Ok(())
}

pub fn delete_division(conn: &Connection, division_id: &str) -> anyhow::Result<()> {
    for cd in ids_where(
        conn,
        "SELECT id FROM class_divisions WHERE division_id = ?",
        division_id,
    )? {
        delete_class_division(conn, &cd)?;
    }
    exec(conn, "divisions", "DELETE FROM divisions WHERE id = ?", division_id)?;
    Ok(())
}

pub fn delete_class(conn: &Connection, class_id: &str) -> anyhow::Result<()> {
    for subject_id in ids_where(conn, "SELECT id FROM subjects WHERE class_id = ?", class_id)? {
        delete_subject(conn, &subject_id)?;
    }
    exec(
        conn,
        "class_subjects",
        "DELETE FROM class_subjects WHERE class_id = ?",
        class_id,
    )?;
    for cd in ids_where(
        conn,
        "SELECT id FROM class_divisions WHERE class_id = ?",
        class_id,
    )? {
        delete_class_division(conn, &cd)?;
    }
    exec(conn, "school_classes", "DELETE FROM school_classes WHERE id = ?", class_id)?;
    Ok(())
}

pub fn delete_exam(conn: &Connection, exam_id: &str) -> anyhow::Result<()> {
    exec(conn, "marks", "DELETE FROM marks WHERE exam_id = ?", exam_id)?;
    exec(conn, "exams", "DELETE FROM exams WHERE id = ?", exam_id)?;
    Ok(())
}

fn delete_student_row(conn: &Connection, student_id: &str) -> anyhow::Result<()> {
    exec(conn, "marks", "DELETE FROM marks WHERE student_id = ?", student_id)?;
    exec(conn, "students", "DELETE FROM students WHERE id = ?", student_id)?;
    Ok(())
}

/// Removes the login account along with everything hanging off it.
pub fn delete_user(conn: &Connection, user_id: &str) -> anyhow::Result<()> {
    for student_id in ids_where(conn, "SELECT id FROM students WHERE user_id = ?", user_id)? {
        delete_student_row(conn, &student_id)?;
    }
    exec(conn, "sessions", "DELETE FROM sessions WHERE user_id = ?", user_id)?;
    exec(conn, "users", "DELETE FROM users WHERE id = ?", user_id)?;
    Ok(())
}

/// Students are created together with their account, so both go.
pub fn delete_student(conn: &Connection, student_id: &str) -> anyhow::Result<()> {
    let users = ids_where(conn, "SELECT user_id FROM students WHERE id = ?", student_id)?;
    match users.first() {
        Some(user_id) => delete_user(conn, user_id),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .expect("count")
    }

    fn seed(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO school_classes(id, name) VALUES('c1', '11th');
             INSERT INTO divisions(id, name) VALUES('d1', 'A');
             INSERT INTO class_divisions(id, class_id, division_id) VALUES('cd1', 'c1', 'd1');
             INSERT INTO subjects(id, name, class_id) VALUES('phy', 'Physics', 'c1');
             INSERT INTO class_subjects(class_id, subject_id) VALUES('c1', 'phy');
             INSERT INTO division_subjects(id, subject_id, class_division_id) VALUES('ds1', 'phy', 'cd1');
             INSERT INTO users(id, username, password_hash, created_at) VALUES('u1', 'kid', 'x', 'now');
             INSERT INTO sessions(token, user_id, created_at) VALUES('t1', 'u1', 'now');
             INSERT INTO students(id, user_id, roll_number, class_division_id, id_number)
               VALUES('s1', 'u1', '1', 'cd1', 'S1');
             INSERT INTO exams(id, name, date, academic_year) VALUES('e1', 'Final', '2025-03-01', '2024-2025');
             INSERT INTO marks(id, student_id, subject_id, exam_id, marks_obtained) VALUES('m1', 's1', 'phy', 'e1', 70);",
        )
        .expect("seed");
    }

    #[test]
    fn deleting_a_division_detaches_students() {
        let conn = db::open_memory();
        seed(&conn);
        delete_division(&conn, "d1").expect("delete");
        assert_eq!(count(&conn, "class_divisions"), 0);
        assert_eq!(count(&conn, "division_subjects"), 0);
        assert_eq!(count(&conn, "students"), 1);
        assert_eq!(count(&conn, "marks"), 1);
        let cd: Option<String> = conn
            .query_row("SELECT class_division_id FROM students", [], |r| r.get(0))
            .expect("student");
        assert!(cd.is_none());
    }

    #[test]
    fn deleting_a_class_removes_its_subjects_and_marks() {
        let conn = db::open_memory();
        seed(&conn);
        delete_class(&conn, "c1").expect("delete");
        assert_eq!(count(&conn, "school_classes"), 0);
        assert_eq!(count(&conn, "subjects"), 0);
        assert_eq!(count(&conn, "marks"), 0);
        assert_eq!(count(&conn, "divisions"), 1);
    }

    #[test]
    fn deleting_a_student_removes_account_and_sessions() {
        let conn = db::open_memory();
        seed(&conn);
        delete_student(&conn, "s1").expect("delete");
        assert_eq!(count(&conn, "students"), 0);
        assert_eq!(count(&conn, "users"), 0);
        assert_eq!(count(&conn, "sessions"), 0);
        assert_eq!(count(&conn, "marks"), 0);
        assert_eq!(count(&conn, "exams"), 1);
    }
}
