//! Which subjects a student can be marked in.
//!
//! Lower grades take the subject set owned by their class. Senior grades
//! (11th/12th) choose subjects per section, so the set comes from the
//! division-subject links of the student's class division instead.

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectSource {
    ClassSubjects,
    DivisionSubjects,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Placement {
    pub class_id: String,
    pub class_name: String,
    pub class_division_id: String,
}

/// Numeric grade taken from the digits of a free-text class label.
///
/// "10th" -> 10, "Class 10B" -> 10, "Nursery" -> None.
pub fn parse_grade(class_name: &str) -> Option<u32> {
    let digits: String = class_name.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u32>().ok()
}

pub fn subject_source(class_name: &str) -> SubjectSource {
    let grade = parse_grade(class_name);
    if let Some(g) = grade {
        if (1..=10).contains(&g) {
            return SubjectSource::ClassSubjects;
        }
    }
    let label = class_name.trim().to_ascii_lowercase();
    if label == "11th" || label == "12th" || matches!(grade, Some(11) | Some(12)) {
        return SubjectSource::DivisionSubjects;
    }
    SubjectSource::None
}

pub fn student_placement(conn: &Connection, student_id: &str) -> anyhow::Result<Option<Placement>> {
    let row = conn
        .query_row(
            "SELECT c.id, c.name, cd.id
             FROM students s
             JOIN class_divisions cd ON cd.id = s.class_division_id
             JOIN school_classes c ON c.id = cd.class_id
             WHERE s.id = ?",
            [student_id],
            |r| {
                Ok(Placement {
                    class_id: r.get(0)?,
                    class_name: r.get(1)?,
                    class_division_id: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Eligible subjects for a student, ordered by name. Students without a
/// class division get an empty set.
pub fn eligible_subjects(conn: &Connection, student_id: &str) -> anyhow::Result<Vec<SubjectRef>> {
    let Some(placement) = student_placement(conn, student_id)? else {
        return Ok(Vec::new());
    };
    subjects_for_placement(conn, &placement)
}

pub fn subjects_for_placement(
    conn: &Connection,
    placement: &Placement,
) -> anyhow::Result<Vec<SubjectRef>> {
    let (sql, key) = match subject_source(&placement.class_name) {
        SubjectSource::ClassSubjects => (
            "SELECT sub.id, sub.name
             FROM class_subjects cs
             JOIN subjects sub ON sub.id = cs.subject_id
             WHERE cs.class_id = ?
             ORDER BY sub.name, sub.id",
            placement.class_id.as_str(),
        ),
        SubjectSource::DivisionSubjects => (
            "SELECT sub.id, sub.name
             FROM division_subjects ds
             JOIN subjects sub ON sub.id = ds.subject_id
             WHERE ds.class_division_id = ?
             ORDER BY sub.name, sub.id",
            placement.class_division_id.as_str(),
        ),
        SubjectSource::None => return Ok(Vec::new()),
    };
    let mut stmt = conn.prepare(sql)?;
    let subjects = stmt
        .query_map([key], |r| {
            Ok(SubjectRef {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(subjects)
}

pub fn is_eligible(conn: &Connection, student_id: &str, subject_id: &str) -> anyhow::Result<bool> {
    Ok(eligible_subjects(conn, student_id)?
        .iter()
        .any(|s| s.id == subject_id))
}
