//! CSV export and spreadsheet-style import of marks.

use serde_json::json;

pub const EXPORT_HEADER: [&str; 4] = ["Student", "Exam", "Subject", "Marks"];

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '"' {
            if in_quotes && chars.peek() == Some(&'"') {
                buf.push('"');
                chars.next();
                continue;
            }
            in_quotes = !in_quotes;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(std::mem::take(&mut buf));
            continue;
        }
        buf.push(ch);
    }
    out.push(buf);
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub student: String,
    pub exam: String,
    pub subject: String,
    pub marks: f64,
}

/// Whole numbers print without a trailing ".0"; other scores print as-is.
pub fn format_score(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

pub fn marks_csv(rows: &[ExportRow]) -> String {
    let mut out = String::new();
    out.push_str(&EXPORT_HEADER.join(","));
    out.push_str("\r\n");
    for r in rows {
        out.push_str(&format!(
            "{},{},{},{}\r\n",
            csv_quote(&r.student),
            csv_quote(&r.exam),
            csv_quote(&r.subject),
            format_score(r.marks)
        ));
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    pub line_no: usize,
    pub student: String,
    pub exam: String,
    pub subject: String,
    pub marks: f64,
    pub date: Option<chrono::NaiveDate>,
    pub academic_year: Option<String>,
}

#[derive(Debug, Default)]
struct ImportColumns {
    student: Option<usize>,
    exam: Option<usize>,
    subject: Option<usize>,
    marks: Option<usize>,
    date: Option<usize>,
    academic_year: Option<usize>,
}

fn header_key(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

fn import_columns(header: &[String]) -> ImportColumns {
    let mut cols = ImportColumns::default();
    for (i, h) in header.iter().enumerate() {
        match header_key(h).as_str() {
            "student" => cols.student = Some(i),
            "exam" => cols.exam = Some(i),
            "subject" => cols.subject = Some(i),
            "marks" | "marksobtained" => cols.marks = Some(i),
            "date" => cols.date = Some(i),
            "academicyear" => cols.academic_year = Some(i),
            _ => {}
        }
    }
    cols
}

#[derive(Debug)]
pub struct ParsedImport {
    pub rows: Vec<ImportRow>,
    pub warnings: Vec<serde_json::Value>,
    pub total: usize,
}

/// Parses an import sheet. The header must name Student, Exam, Subject and
/// Marks columns; rows that fail to parse become warnings.
pub fn parse_import(text: &str) -> anyhow::Result<ParsedImport> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let Some((_, header_line)) = lines.next() else {
        anyhow::bail!("import file is empty");
    };
    let cols = import_columns(&parse_csv_record(header_line));
    let (Some(student_col), Some(exam_col), Some(subject_col), Some(marks_col)) =
        (cols.student, cols.exam, cols.subject, cols.marks)
    else {
        anyhow::bail!("header must include Student, Exam, Subject and Marks columns");
    };

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    let mut total = 0usize;
    for (idx, raw_line) in lines {
        total += 1;
        let line_no = idx + 1;
        let fields = parse_csv_record(raw_line);
        let get = |i: usize| fields.get(i).map(|s| s.trim().to_string()).unwrap_or_default();
        let optional = |i: Option<usize>| i.map(get).filter(|s| !s.is_empty());

        let student = get(student_col);
        let exam = get(exam_col);
        let subject = get(subject_col);
        if student.is_empty() || exam.is_empty() || subject.is_empty() {
            warnings.push(json!({
                "line": line_no,
                "code": "missing_value",
                "message": "Student, Exam and Subject are required"
            }));
            continue;
        }
        let marks_raw = get(marks_col);
        let marks = match marks_raw.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => v,
            _ => {
                warnings.push(json!({
                    "line": line_no,
                    "code": "bad_marks",
                    "message": "Marks must be a non-negative number",
                    "value": marks_raw
                }));
                continue;
            }
        };
        let date = match optional(cols.date) {
            None => None,
            Some(raw) => match chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
                Ok(d) => Some(d),
                Err(_) => {
                    warnings.push(json!({
                        "line": line_no,
                        "code": "bad_date",
                        "message": "Date must be YYYY-MM-DD",
                        "value": raw
                    }));
                    continue;
                }
            },
        };
        rows.push(ImportRow {
            line_no,
            student,
            exam,
            subject,
            marks,
            date,
            academic_year: optional(cols.academic_year),
        });
    }

    Ok(ParsedImport {
        rows,
        warnings,
        total,
    })
}

/// Academic year label for a date: June onward belongs to the year that
/// starts then.
pub fn academic_year_for(date: chrono::NaiveDate) -> String {
    use chrono::Datelike;
    let y = date.year();
    if date.month() >= 6 {
        format!("{}-{}", y, y + 1)
    } else {
        format!("{}-{}", y - 1, y)
    }
}
