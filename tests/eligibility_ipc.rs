mod common;

use common::Sidecar;
use serde_json::json;

fn subject_names(v: &serde_json::Value) -> Vec<String> {
    v["subjects"]
        .as_array()
        .expect("subjects")
        .iter()
        .filter_map(|s| s["name"].as_str().map(|n| n.to_string()))
        .collect()
}

#[test]
fn lower_grades_use_class_subjects() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-elig-class");
    let school = common::setup_school(&mut sc, "Class 7", &["Math", "English"]);

    let out = sc.ok(
        "students.eligibleSubjects",
        json!({ "studentId": school.student_id }),
    );
    assert_eq!(out["source"], "class_subjects");
    assert_eq!(out["grade"], 7);
    assert_eq!(subject_names(&out), vec!["English", "Math"]);
}

#[test]
fn eleventh_grade_uses_division_subjects() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-elig-division");
    let school = common::setup_school(&mut sc, "11th", &["Physics", "History"]);

    // Class-linked subjects alone do not count for 11th/12th.
    let before = sc.ok(
        "students.eligibleSubjects",
        json!({ "studentId": school.student_id }),
    );
    assert_eq!(before["source"], "division_subjects");
    assert!(subject_names(&before).is_empty());

    let _ = sc.ok(
        "divisionSubjects.create",
        json!({ "subjectId": school.subject_ids[0], "classDivisionId": school.class_division_id }),
    );
    let after = sc.ok(
        "students.eligibleSubjects",
        json!({ "studentId": school.student_id }),
    );
    assert_eq!(subject_names(&after), vec!["Physics"]);

    let dup = sc.fail(
        "divisionSubjects.create",
        json!({ "subjectId": school.subject_ids[0], "classDivisionId": school.class_division_id }),
    );
    assert_eq!(dup["code"], "conflict");

    let form = sc.ok(
        "marks.bulk.form",
        json!({ "studentId": school.student_id, "examId": school.exam_id }),
    );
    assert_eq!(form["order"], json!([school.subject_ids[0]]));
}

#[test]
fn unparseable_class_names_have_no_subjects() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-elig-none");
    let school = common::setup_school(&mut sc, "Nursery", &["Drawing"]);

    let out = sc.ok(
        "students.eligibleSubjects",
        json!({ "studentId": school.student_id }),
    );
    assert_eq!(out["source"], "none");
    assert!(out["grade"].is_null());
    assert!(subject_names(&out).is_empty());

    let form = sc.ok(
        "marks.bulk.form",
        json!({ "studentId": school.student_id, "examId": school.exam_id }),
    );
    assert_eq!(form["empty"], true);
}

#[test]
fn direct_mark_entry_warns_on_ineligible_subject() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-elig-warning");
    let school = common::setup_school(&mut sc, "11th", &["Physics"]);

    let out = sc.ok(
        "marks.create",
        json!({
            "studentId": school.student_id,
            "subjectId": school.subject_ids[0],
            "examId": school.exam_id,
            "marksObtained": 55,
        }),
    );
    assert_eq!(out["warnings"][0]["code"], "subject_not_eligible");

    let dup = sc.fail(
        "marks.create",
        json!({
            "studentId": school.student_id,
            "subjectId": school.subject_ids[0],
            "examId": school.exam_id,
            "marksObtained": 60,
        }),
    );
    assert_eq!(dup["code"], "conflict");

    let negative = sc.fail(
        "marks.update",
        json!({ "markId": out["markId"], "marksObtained": -1 }),
    );
    assert_eq!(negative["code"], "bad_params");
}

#[test]
fn rescoping_a_subject_moves_it_between_classes() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-elig-rescope");
    let school = common::setup_school(&mut sc, "10th", &["Math", "English"]);

    let ninth = common::id_of(&sc.ok("classes.create", json!({ "name": "9th" })), "classId");
    let division = common::id_of(&sc.ok("divisions.create", json!({ "name": "B" })), "divisionId");
    let section = common::id_of(
        &sc.ok(
            "classDivisions.create",
            json!({ "classId": ninth, "divisionId": division }),
        ),
        "classDivisionId",
    );
    let ninth_student = common::id_of(
        &sc.ok(
            "students.create",
            json!({
                "username": "nine",
                "password": "nine-pass",
                "rollNumber": "1",
                "idNumber": "S900",
                "classDivisionId": section,
            }),
        ),
        "studentId",
    );

    let _ = sc.ok(
        "subjects.update",
        json!({ "subjectId": school.subject_ids[0], "classId": ninth }),
    );
    let tenth = sc.ok("students.eligibleSubjects", json!({ "studentId": school.student_id }));
    assert_eq!(subject_names(&tenth), vec!["English"]);
    let moved = sc.ok("students.eligibleSubjects", json!({ "studentId": ninth_student }));
    assert_eq!(subject_names(&moved), vec!["Math"]);

    let classes = sc.ok("classes.list", json!({}));
    let ninth_class = classes["classes"]
        .as_array()
        .expect("classes")
        .iter()
        .find(|c| c["name"] == "9th")
        .cloned()
        .expect("9th listed");
    assert_eq!(ninth_class["subjects"], json!([{ "id": school.subject_ids[0], "name": "Math" }]));

    // Clearing the scope drops the link without touching the other class.
    let _ = sc.ok(
        "subjects.update",
        json!({ "subjectId": school.subject_ids[0], "classId": null }),
    );
    let cleared = sc.ok("students.eligibleSubjects", json!({ "studentId": ninth_student }));
    assert!(subject_names(&cleared).is_empty());
    let tenth = sc.ok("students.eligibleSubjects", json!({ "studentId": school.student_id }));
    assert_eq!(subject_names(&tenth), vec!["English"]);
}
