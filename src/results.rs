use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// Half-away-from-zero rounding to 2 decimals, as shown on dashboards.
pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn mean(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRef {
    pub id: String,
    pub name: String,
    pub date: String,
    pub academic_year: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkRow {
    pub exam: ExamRef,
    pub subject_id: String,
    pub subject_name: String,
    pub marks_obtained: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScore {
    pub subject_id: String,
    pub subject_name: String,
    pub marks_obtained: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamGroup {
    pub exam: ExamRef,
    pub marks: Vec<SubjectScore>,
    pub total: f64,
    pub count: usize,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestSummary {
    pub exam: ExamRef,
    pub average: f64,
    pub count: usize,
}

/// Groups marks by exam primary key. Two rows for the same exam always
/// land in one group even when their other exam fields were read apart.
/// Groups are newest exam first; marks inside a group by subject name.
pub fn group_by_exam(rows: Vec<MarkRow>) -> Vec<ExamGroup> {
    let mut groups: Vec<ExamGroup> = Vec::new();
    for row in rows {
        let score = SubjectScore {
            subject_id: row.subject_id,
            subject_name: row.subject_name,
            marks_obtained: row.marks_obtained,
        };
        match groups.iter_mut().find(|g| g.exam.id == row.exam.id) {
            Some(g) => g.marks.push(score),
            None => groups.push(ExamGroup {
                exam: row.exam,
                marks: vec![score],
                total: 0.0,
                count: 0,
                average: 0.0,
            }),
        }
    }

    for g in groups.iter_mut() {
        g.marks.sort_by(|a, b| {
            a.subject_name
                .cmp(&b.subject_name)
                .then_with(|| a.subject_id.cmp(&b.subject_id))
        });
        let scores: Vec<f64> = g.marks.iter().map(|m| m.marks_obtained).collect();
        g.total = round_2_decimals(scores.iter().sum());
        g.count = scores.len();
        g.average = mean(&scores).map(round_2_decimals).unwrap_or(0.0);
    }
    groups.sort_by(|a, b| {
        b.exam
            .date
            .cmp(&a.exam.date)
            .then_with(|| a.exam.name.cmp(&b.exam.name))
    });
    groups
}

pub fn load_student_marks(conn: &Connection, student_id: &str) -> anyhow::Result<Vec<MarkRow>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.name, e.date, e.academic_year, sub.id, sub.name, m.marks_obtained
         FROM marks m
         JOIN exams e ON e.id = m.exam_id
         JOIN subjects sub ON sub.id = m.subject_id
         WHERE m.student_id = ?",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok(MarkRow {
                exam: ExamRef {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    date: r.get(2)?,
                    academic_year: r.get(3)?,
                },
                subject_id: r.get(4)?,
                subject_name: r.get(5)?,
                marks_obtained: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Most recently dated exam across the school. Same-day exams resolve to
/// the one created last.
pub fn latest_exam(conn: &Connection) -> anyhow::Result<Option<ExamRef>> {
    let exam = conn
        .query_row(
            "SELECT id, name, date, academic_year FROM exams
             ORDER BY date DESC, rowid DESC
             LIMIT 1",
            [],
            |r| {
                Ok(ExamRef {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    date: r.get(2)?,
                    academic_year: r.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(exam)
}

pub fn exam_scores(conn: &Connection, student_id: &str, exam_id: &str) -> anyhow::Result<Vec<f64>> {
    let mut stmt =
        conn.prepare("SELECT marks_obtained FROM marks WHERE student_id = ? AND exam_id = ?")?;
    let scores = stmt
        .query_map((student_id, exam_id), |r| r.get::<_, f64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(scores)
}

/// Average of the student's marks on the latest exam. `None` when there is
/// no exam or the student has no marks on it.
pub fn latest_exam_summary(
    conn: &Connection,
    student_id: &str,
) -> anyhow::Result<Option<LatestSummary>> {
    let Some(exam) = latest_exam(conn)? else {
        return Ok(None);
    };
    let scores = exam_scores(conn, student_id, &exam.id)?;
    let Some(avg) = mean(&scores) else {
        return Ok(None);
    };
    Ok(Some(LatestSummary {
        exam,
        average: round_2_decimals(avg),
        count: scores.len(),
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DivisionAverage {
    pub class_division_id: String,
    pub label: String,
    pub average: f64,
    pub count: usize,
}

/// Per-section averages for one exam, used by the staff dashboard.
pub fn division_averages(conn: &Connection, exam_id: &str) -> anyhow::Result<Vec<DivisionAverage>> {
    let mut stmt = conn.prepare(
        "SELECT cd.id, c.name || d.name, AVG(m.marks_obtained), COUNT(m.id)
         FROM marks m
         JOIN students s ON s.id = m.student_id
         JOIN class_divisions cd ON cd.id = s.class_division_id
         JOIN school_classes c ON c.id = cd.class_id
         JOIN divisions d ON d.id = cd.division_id
         WHERE m.exam_id = ?
         GROUP BY cd.id
         ORDER BY c.name, d.name",
    )?;
    let rows = stmt
        .query_map([exam_id], |r| {
            let avg: f64 = r.get(2)?;
            let count: i64 = r.get(3)?;
            Ok(DivisionAverage {
                class_division_id: r.get(0)?,
                label: r.get(1)?,
                average: round_2_decimals(avg),
                count: count.max(0) as usize,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn exam(id: &str, name: &str, date: &str) -> ExamRef {
        ExamRef {
            id: id.to_string(),
            name: name.to_string(),
            date: date.to_string(),
            academic_year: "2024-2025".to_string(),
        }
    }

    fn row(e: &ExamRef, subject: &str, score: f64) -> MarkRow {
        MarkRow {
            exam: e.clone(),
            subject_id: subject.to_lowercase(),
            subject_name: subject.to_string(),
            marks_obtained: score,
        }
    }

    #[test]
    fn round_2_decimals_examples() {
        assert_eq!(round_2_decimals(85.0), 85.0);
        assert_eq!(round_2_decimals(66.666_666), 66.67);
        assert_eq!(round_2_decimals(70.125), 70.13);
    }

    #[test]
    fn groups_by_exam_id_not_name() {
        let mid = exam("e1", "Midterm", "2025-01-10");
        let fin = exam("e2", "Final", "2025-03-10");
        // Same display name, different exam row.
        let mid_next_year = exam("e3", "Midterm", "2026-01-10");
        let groups = group_by_exam(vec![
            row(&mid, "Science", 70.0),
            row(&fin, "Math", 90.0),
            row(&mid, "Math", 80.0),
            row(&mid_next_year, "Math", 60.0),
        ]);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].exam.id, "e3");
        assert_eq!(groups[1].exam.id, "e2");
        assert_eq!(groups[2].exam.id, "e1");
        let names: Vec<&str> = groups[2]
            .marks
            .iter()
            .map(|m| m.subject_name.as_str())
            .collect();
        assert_eq!(names, vec!["Math", "Science"]);
        assert_eq!(groups[2].total, 150.0);
        assert_eq!(groups[2].average, 75.0);
    }

    #[test]
    fn latest_summary_averages_latest_exam() {
        let conn = db::open_memory();
        conn.execute_batch(
            "INSERT INTO users(id, username, password_hash, created_at) VALUES('u1', 'kid', 'x', 'now');
             INSERT INTO students(id, user_id, roll_number, id_number) VALUES('s1', 'u1', '1', 'S1');
             INSERT INTO subjects(id, name) VALUES('math', 'Math');
             INSERT INTO subjects(id, name) VALUES('sci', 'Science');
             INSERT INTO exams(id, name, date, academic_year) VALUES('old', 'Unit 1', '2024-09-01', '2024-2025');
             INSERT INTO exams(id, name, date, academic_year) VALUES('new', 'Midterm', '2025-06-01', '2024-2025');
             INSERT INTO marks(id, student_id, subject_id, exam_id, marks_obtained) VALUES('m0', 's1', 'math', 'old', 10);
             INSERT INTO marks(id, student_id, subject_id, exam_id, marks_obtained) VALUES('m1', 's1', 'math', 'new', 80);
             INSERT INTO marks(id, student_id, subject_id, exam_id, marks_obtained) VALUES('m2', 's1', 'sci', 'new', 90);",
        )
        .expect("seed");
        let summary = latest_exam_summary(&conn, "s1")
            .expect("summary")
            .expect("has marks");
        assert_eq!(summary.exam.id, "new");
        assert_eq!(summary.average, 85.0);
        assert_eq!(summary.count, 2);
    }

    #[test]
    fn latest_summary_is_none_without_marks_on_latest() {
        let conn = db::open_memory();
        conn.execute_batch(
            "INSERT INTO users(id, username, password_hash, created_at) VALUES('u1', 'kid', 'x', 'now');
             INSERT INTO students(id, user_id, roll_number, id_number) VALUES('s1', 'u1', '1', 'S1');
             INSERT INTO subjects(id, name) VALUES('math', 'Math');
             INSERT INTO exams(id, name, date, academic_year) VALUES('old', 'Unit 1', '2024-09-01', '2024-2025');
             INSERT INTO exams(id, name, date, academic_year) VALUES('new', 'Midterm', '2025-06-01', '2024-2025');
             INSERT INTO marks(id, student_id, subject_id, exam_id, marks_obtained) VALUES('m0', 's1', 'math', 'old', 10);",
        )
        .expect("seed");
        assert!(latest_exam_summary(&conn, "s1").expect("summary").is_none());
    }
}
