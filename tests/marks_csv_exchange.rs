mod common;

use common::{temp_dir, Sidecar};
use serde_json::json;

#[test]
fn export_writes_header_and_filtered_rows() {
    let (mut sc, ws) = Sidecar::with_admin("schoold-csv-export");
    let school = common::setup_school(&mut sc, "10th", &["Math", "Science"]);
    let _ = sc.ok(
        "marks.bulk.submit",
        json!({
            "studentId": school.student_id,
            "examId": school.exam_id,
            "marks": { school.subject_ids[0].as_str(): 88.5, school.subject_ids[1].as_str(): 90 },
        }),
    );

    let out_path = ws.join("exports").join("marks.csv");
    let out = sc.ok(
        "marks.list",
        json!({
            "format": "csv",
            "q": "math",
            "outPath": out_path.to_string_lossy(),
        }),
    );
    assert_eq!(out["rowsExported"], 1);
    let csv = out["csv"].as_str().expect("csv");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines, vec!["Student,Exam,Subject,Marks", "Asha Rao,Midterm,Math,88.5"]);
    let on_disk = std::fs::read_to_string(&out_path).expect("exported file");
    assert_eq!(on_disk, csv);

    let bad = sc.fail("marks.list", json!({ "format": "xlsx" }));
    assert_eq!(bad["code"], "bad_params");
}

#[test]
fn import_upserts_and_reports_row_problems() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-csv-import");
    let school = common::setup_school(&mut sc, "10th", &["Math"]);
    let _ = sc.ok(
        "marks.bulk.submit",
        json!({
            "studentId": school.student_id,
            "examId": school.exam_id,
            "marks": { school.subject_ids[0].as_str(): 50 },
        }),
    );

    let dir = temp_dir("schoold-csv-import-file");
    let path = dir.join("marks.csv");
    std::fs::write(
        &path,
        "Student,Exam,Subject,Marks,Date\n\
         kid,Midterm,Math,65,\n\
         S100,Final,Math,77,2026-03-10\n\
         ghost,Midterm,Math,40,\n\
         kid,Midterm,Math,lots,\n",
    )
    .expect("write import file");

    let out = sc.ok("marks.importCsv", json!({ "path": path.to_string_lossy() }));
    assert_eq!(out["rowsTotal"], 4);
    assert_eq!(out["updated"], 1);
    assert_eq!(out["created"], 1);
    assert_eq!(out["examsCreated"], 1);
    assert_eq!(out["subjectsCreated"], 0);
    let codes: Vec<&str> = out["warnings"]
        .as_array()
        .expect("warnings")
        .iter()
        .filter_map(|w| w["code"].as_str())
        .collect();
    assert!(codes.contains(&"unknown_student"));
    assert!(codes.contains(&"bad_marks"));

    let exams = sc.ok("exams.list", json!({ "q": "final" }));
    assert_eq!(exams["exams"][0]["academicYear"], "2025-2026");

    let results = sc.ok("results.forStudent", json!({ "studentId": school.student_id }));
    let midterm = results["exams"]
        .as_array()
        .expect("exams")
        .iter()
        .find(|g| g["exam"]["name"] == "Midterm")
        .cloned()
        .expect("midterm group");
    assert_eq!(midterm["marks"][0]["marksObtained"].as_f64(), Some(65.0));
}

#[test]
fn import_without_required_columns_is_rejected() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-csv-header");
    let err = sc.fail(
        "marks.importCsv",
        json!({ "text": "Name,Score\nkid,10\n" }),
    );
    assert_eq!(err["code"], "bad_params");
}

#[test]
fn bad_date_skips_only_that_row() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-csv-bad-date");
    let school = common::setup_school(&mut sc, "10th", &["Math"]);

    let out = sc.ok(
        "marks.importCsv",
        json!({
            "text": "Student,Exam,Subject,Marks,Date\n\
                     kid,Midterm,Math,65,\n\
                     kid,Final,Math,70,10/03/2026\n",
        }),
    );
    assert_eq!(out["rowsTotal"], 2);
    assert_eq!(out["created"], 1);
    assert_eq!(out["examsCreated"], 0);
    let warnings = out["warnings"].as_array().expect("warnings");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["code"], "bad_date");
    assert_eq!(warnings[0]["line"], 3);

    let marks = sc.ok("marks.list", json!({ "filters": { "student": school.student_id } }));
    let marks = marks["marks"].as_array().expect("marks");
    assert_eq!(marks.len(), 1);
    assert_eq!(marks[0]["examId"], json!(school.exam_id));
    let finals = sc.ok("exams.list", json!({ "q": "final" }));
    assert!(finals["exams"].as_array().expect("exams").is_empty());
}

#[test]
fn import_flags_subjects_outside_the_student_section() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-csv-eligibility");
    // 11th grade takes its subjects from the section, which has none yet.
    let _school = common::setup_school(&mut sc, "11th", &["Physics"]);

    let out = sc.ok(
        "marks.importCsv",
        json!({ "text": "Student,Exam,Subject,Marks\nkid,Midterm,Physics,58\n" }),
    );
    assert_eq!(out["created"], 1);
    assert_eq!(out["subjectsCreated"], 0);
    let warnings = out["warnings"].as_array().expect("warnings");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["code"], "subject_not_eligible");
    assert_eq!(warnings[0]["line"], 2);
}
