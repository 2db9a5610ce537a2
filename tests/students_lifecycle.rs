mod common;

use common::Sidecar;
use serde_json::json;

fn count_users(sc: &mut Sidecar, q: &str) -> usize {
    sc.ok("users.list", json!({ "q": q }))["users"]
        .as_array()
        .map(|a| a.len())
        .unwrap_or(0)
}

#[test]
fn duplicate_id_number_leaves_no_orphan_account() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-students-atomic");
    let _school = common::setup_school(&mut sc, "10th", &["Math"]);

    let err = sc.fail(
        "students.create",
        json!({
            "username": "second",
            "password": "pw",
            "rollNumber": "2",
            "idNumber": "S100",
        }),
    );
    assert_eq!(err["code"], "conflict");
    assert_eq!(count_users(&mut sc, "second"), 0);

    let err = sc.fail(
        "students.create",
        json!({
            "username": "kid",
            "password": "pw",
            "rollNumber": "3",
            "idNumber": "S300",
        }),
    );
    assert_eq!(err["code"], "conflict");
}

#[test]
fn admin_update_validates_and_delete_removes_account() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-students-update");
    let school = common::setup_school(&mut sc, "10th", &["Math"]);

    let bad = sc.fail(
        "students.update",
        json!({ "studentId": school.student_id, "patch": { "phoneNumber": "1234567890123456" } }),
    );
    assert_eq!(bad["code"], "bad_params");

    let changed = sc.ok(
        "students.update",
        json!({
            "studentId": school.student_id,
            "patch": { "rollNumber": "7", "alternateEmail": "asha@example.org" },
        }),
    );
    assert_eq!(changed["changed"], json!(["alternateEmail", "rollNumber"]));
    let got = sc.ok("students.get", json!({ "studentId": school.student_id }));
    assert_eq!(got["student"]["rollNumber"], "7");
    assert_eq!(got["student"]["label"], "Asha Rao - 10thA");

    let _ = sc.ok(
        "marks.create",
        json!({
            "studentId": school.student_id,
            "subjectId": school.subject_ids[0],
            "examId": school.exam_id,
            "marksObtained": 70,
        }),
    );
    let _ = sc.ok("students.delete", json!({ "studentId": school.student_id }));
    assert_eq!(count_users(&mut sc, "kid"), 0);
    let marks = sc.ok("marks.list", json!({}));
    assert!(marks["marks"].as_array().expect("marks").is_empty());
}

#[test]
fn deleting_a_section_keeps_its_students() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-students-section");
    let school = common::setup_school(&mut sc, "10th", &["Math"]);

    let _ = sc.ok(
        "classDivisions.delete",
        json!({ "classDivisionId": school.class_division_id }),
    );
    let got = sc.ok("students.get", json!({ "studentId": school.student_id }));
    assert!(got["student"]["classDivisionId"].is_null());
    assert_eq!(got["student"]["label"], "Asha Rao - None");
    assert!(got["eligibleSubjects"].as_array().expect("subjects").is_empty());

    let _ = sc.ok("classes.delete", json!({ "classId": school.class_id }));
    let subjects = sc.ok("subjects.list", json!({}));
    assert!(subjects["subjects"].as_array().expect("subjects").is_empty());
}

#[test]
fn moving_section_and_roll_together_lands_cleanly() {
    let (mut sc, _ws) = Sidecar::with_admin("schoold-students-move");
    let school = common::setup_school(&mut sc, "10th", &["Math"]);

    let division_b = common::id_of(&sc.ok("divisions.create", json!({ "name": "B" })), "divisionId");
    let section_b = common::id_of(
        &sc.ok(
            "classDivisions.create",
            json!({ "classId": school.class_id, "divisionId": division_b }),
        ),
        "classDivisionId",
    );
    // Roll "1" is taken in both sections.
    let _ = sc.ok(
        "students.create",
        json!({
            "username": "other",
            "password": "other-pass",
            "rollNumber": "1",
            "idNumber": "S200",
            "classDivisionId": section_b,
        }),
    );

    let moved = sc.ok(
        "students.update",
        json!({
            "studentId": school.student_id,
            "patch": { "classDivisionId": section_b, "rollNumber": "2" },
        }),
    );
    assert_eq!(moved["changed"], json!(["classDivisionId", "rollNumber"]));
    let got = sc.ok("students.get", json!({ "studentId": school.student_id }));
    assert_eq!(got["student"]["rollNumber"], "2");
    assert_eq!(got["student"]["classDivisionId"], json!(section_b));
    assert_eq!(got["student"]["label"], "Asha Rao - 10thB");

    let clash = sc.fail(
        "students.update",
        json!({ "studentId": school.student_id, "patch": { "rollNumber": "1" } }),
    );
    assert_eq!(clash["code"], "conflict");
}
