#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ADMIN_USER: &str = "office";
pub const ADMIN_PASSWORD: &str = "office-pass";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn create_admin(workspace: &Path) {
    let status = Command::new(env!("CARGO_BIN_EXE_schoold"))
        .arg("create-admin")
        .arg("--workspace")
        .arg(workspace)
        .args(["--username", ADMIN_USER, "--password", ADMIN_PASSWORD])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("run create-admin");
    assert!(status.success(), "create-admin failed");
}

pub struct Sidecar {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    pub session: Option<String>,
}

impl Sidecar {
    pub fn spawn(workspace: Option<&Path>) -> Self {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_schoold"));
        if let Some(ws) = workspace {
            cmd.arg("--workspace").arg(ws);
        }
        let mut child = cmd
            .env_remove("SCHOOLD_WORKSPACE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn schoold");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Sidecar {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
            next_id: 0,
            session: None,
        }
    }

    /// Fresh workspace with an admin account, already logged in as admin.
    pub fn with_admin(prefix: &str) -> (Self, PathBuf) {
        let workspace = temp_dir(prefix);
        create_admin(&workspace);
        let mut sidecar = Sidecar::spawn(Some(&workspace));
        sidecar.login(ADMIN_USER, ADMIN_PASSWORD);
        (sidecar, workspace)
    }

    pub fn send_raw(&mut self, line: &str) -> serde_json::Value {
        let stdin = self.stdin.as_mut().expect("stdin open");
        writeln!(stdin, "{}", line).expect("write request");
        stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response");
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(token) = &self.session {
            payload["session"] = json!(token);
        }
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    /// Calls and returns `result`, failing the test on an error response.
    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(serde_json::Value::Null)
    }

    /// Calls and returns the error object, failing the test on success.
    pub fn fail(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().expect("error object")
    }

    pub fn login(&mut self, username: &str, password: &str) -> serde_json::Value {
        self.session = None;
        let result = self.ok(
            "auth.login",
            json!({ "username": username, "password": password }),
        );
        self.session = result
            .get("session")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        assert!(self.session.is_some(), "login returned no session");
        result
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.wait();
    }
}

pub fn id_of(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

pub struct School {
    pub class_id: String,
    pub class_division_id: String,
    pub subject_ids: Vec<String>,
    pub student_id: String,
    pub exam_id: String,
}

/// One class with the given subjects, division "A", one student
/// (`kid`/`kid-pass`) and one exam.
pub fn setup_school(sc: &mut Sidecar, class_name: &str, subjects: &[&str]) -> School {
    let class_id = id_of(&sc.ok("classes.create", json!({ "name": class_name })), "classId");
    let mut subject_ids = Vec::new();
    for name in subjects {
        let created = sc.ok(
            "subjects.create",
            json!({ "name": name, "classId": class_id }),
        );
        subject_ids.push(id_of(&created, "subjectId"));
    }
    let division_id = id_of(&sc.ok("divisions.create", json!({ "name": "A" })), "divisionId");
    let class_division_id = id_of(
        &sc.ok(
            "classDivisions.create",
            json!({ "classId": class_id, "divisionId": division_id }),
        ),
        "classDivisionId",
    );
    let student_id = id_of(
        &sc.ok(
            "students.create",
            json!({
                "username": "kid",
                "password": "kid-pass",
                "firstName": "Asha",
                "lastName": "Rao",
                "rollNumber": "1",
                "idNumber": "S100",
                "classDivisionId": class_division_id,
            }),
        ),
        "studentId",
    );
    let exam_id = id_of(
        &sc.ok(
            "exams.create",
            json!({ "name": "Midterm", "date": "2025-06-01", "academicYear": "2024-2025" }),
        ),
        "examId",
    );
    School {
        class_id,
        class_division_id,
        subject_ids,
        student_id,
        exam_id,
    }
}
