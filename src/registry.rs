//! Admin entity registry, built once at startup.
//!
//! Each entry says what a list screen shows and which columns the `q`
//! search and the named filters apply to. The SQL expressions refer to the
//! table aliases used by the matching `*.list` handler.

use rusqlite::types::Value;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: &'static str,
    pub label: &'static str,
    #[serde(skip)]
    pub sql: &'static str,
}

const fn col(name: &'static str, label: &'static str, sql: &'static str) -> Column {
    Column { name, label, sql }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityAdmin {
    pub key: &'static str,
    pub title: &'static str,
    pub list_display: Vec<Column>,
    pub search_fields: Vec<Column>,
    pub list_filter: Vec<Column>,
    pub autocomplete_fields: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    UnknownFilter(String),
    BadValue(String),
}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterError::UnknownFilter(k) => write!(f, "unknown filter: {}", k),
            FilterError::BadValue(k) => write!(f, "filter {} must be a string", k),
        }
    }
}

/// Search terms match literally; `%` and `_` are not wildcards.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

impl EntityAdmin {
    fn plain(key: &'static str, title: &'static str, display: Vec<Column>) -> Self {
        EntityAdmin {
            key,
            title,
            list_display: display,
            search_fields: Vec::new(),
            list_filter: Vec::new(),
            autocomplete_fields: Vec::new(),
        }
    }

    /// WHERE fragment (without the keyword) and its bind values for a search
    /// term and a `{filterName: value}` object. Empty when nothing applies.
    pub fn where_clause(
        &self,
        q: Option<&str>,
        filters: Option<&serde_json::Value>,
    ) -> Result<(String, Vec<Value>), FilterError> {
        let mut parts: Vec<String> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();

        let term = q.map(str::trim).filter(|s| !s.is_empty());
        if let Some(term) = term {
            if !self.search_fields.is_empty() {
                let like = format!("%{}%", escape_like(&term.to_lowercase()));
                let ors = self
                    .search_fields
                    .iter()
                    .map(|c| format!("LOWER({}) LIKE ? ESCAPE '\\'", c.sql))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                parts.push(format!("({})", ors));
                for _ in &self.search_fields {
                    binds.push(Value::Text(like.clone()));
                }
            }
        }

        if let Some(obj) = filters.and_then(|v| v.as_object()) {
            for (key, value) in obj {
                let Some(column) = self.list_filter.iter().find(|c| c.name == key) else {
                    return Err(FilterError::UnknownFilter(key.clone()));
                };
                match value {
                    serde_json::Value::Null => continue,
                    serde_json::Value::String(s) => {
                        parts.push(format!("{} = ?", column.sql));
                        binds.push(Value::Text(s.clone()));
                    }
                    _ => return Err(FilterError::BadValue(key.clone())),
                }
            }
        }

        Ok((parts.join(" AND "), binds))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Registry {
    entities: Vec<EntityAdmin>,
}

impl Registry {
    pub fn standard() -> Self {
        let student = EntityAdmin {
            key: "students",
            title: "Students",
            list_display: vec![
                col("user", "User", "u.username"),
                col("rollNumber", "Roll number", "s.roll_number"),
                col("classDivision", "Class division", "c.name || d.name"),
                col("idNumber", "ID number", "s.id_number"),
            ],
            search_fields: vec![
                col("username", "Username", "u.username"),
                col("rollNumber", "Roll number", "s.roll_number"),
                col("idNumber", "ID number", "s.id_number"),
            ],
            list_filter: vec![col("classDivision", "Class division", "s.class_division_id")],
            autocomplete_fields: Vec::new(),
        };

        let subject = EntityAdmin {
            key: "subjects",
            title: "Subjects",
            list_display: vec![
                col("name", "Name", "sub.name"),
                col("class", "Class", "c.name"),
            ],
            search_fields: vec![col("name", "Name", "sub.name")],
            list_filter: vec![col("class", "Class", "sub.class_id")],
            autocomplete_fields: Vec::new(),
        };

        let exam = EntityAdmin {
            key: "exams",
            title: "Exams",
            list_display: vec![
                col("name", "Name", "e.name"),
                col("academicYear", "Academic year", "e.academic_year"),
                col("date", "Date", "e.date"),
            ],
            search_fields: vec![
                col("name", "Name", "e.name"),
                col("academicYear", "Academic year", "e.academic_year"),
            ],
            list_filter: vec![col("academicYear", "Academic year", "e.academic_year")],
            autocomplete_fields: Vec::new(),
        };

        let mark = EntityAdmin {
            key: "marks",
            title: "Marks",
            list_display: vec![
                col("student", "Student", "u.username"),
                col("subject", "Subject", "sub.name"),
                col("exam", "Exam", "e.name"),
                col("marksObtained", "Marks obtained", "m.marks_obtained"),
            ],
            search_fields: vec![
                col("username", "Username", "u.username"),
                col("rollNumber", "Roll number", "s.roll_number"),
                col("subject", "Subject", "sub.name"),
                col("exam", "Exam", "e.name"),
            ],
            list_filter: vec![
                col("exam", "Exam", "m.exam_id"),
                col("subject", "Subject", "m.subject_id"),
                col("student", "Student", "m.student_id"),
            ],
            autocomplete_fields: vec!["student", "subject", "exam"],
        };

        let mut class_division = EntityAdmin::plain(
            "classDivisions",
            "Class divisions",
            vec![col("label", "Class division", "c.name || d.name")],
        );
        class_division.list_filter = vec![col("class", "Class", "cd.class_id")];

        let mut division_subject = EntityAdmin::plain(
            "divisionSubjects",
            "Division subjects",
            vec![
                col("subject", "Subject", "sub.name"),
                col("classDivision", "Class division", "c.name || d.name"),
            ],
        );
        division_subject.list_filter = vec![col(
            "classDivision",
            "Class division",
            "ds.class_division_id",
        )];

        let user = EntityAdmin {
            key: "users",
            title: "Users",
            list_display: vec![
                col("username", "Username", "u.username"),
                col("email", "Email", "u.email"),
                col("isStaff", "Staff status", "u.is_staff"),
            ],
            search_fields: vec![
                col("username", "Username", "u.username"),
                col("firstName", "First name", "u.first_name"),
                col("lastName", "Last name", "u.last_name"),
                col("email", "Email", "u.email"),
            ],
            list_filter: Vec::new(),
            autocomplete_fields: Vec::new(),
        };

        Registry {
            entities: vec![
                EntityAdmin::plain("classes", "Classes", vec![col("name", "Name", "c.name")]),
                EntityAdmin::plain("divisions", "Divisions", vec![col("name", "Name", "d.name")]),
                class_division,
                subject,
                division_subject,
                student,
                exam,
                mark,
                user,
            ],
        }
    }

    pub fn get(&self, key: &str) -> Option<&EntityAdmin> {
        self.entities.iter().find(|e| e.key == key)
    }

    pub fn entities(&self) -> &[EntityAdmin] {
        &self.entities
    }
}
