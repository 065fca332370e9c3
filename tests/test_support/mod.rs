#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultd");
    let mut child = Command::new(exe)
        .env_remove("RESULTD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()) == Some(true),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Sends a request that must fail and returns its error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded",
        method
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

/// Class `c10` with two students, subject `math` (exam `ut1`: U1 max 20
/// weight 40, U2 max 80 weight 60) and subject `sci` split over terms
/// `t1` (share 40) and `t2` (share 60), one 100-mark component per term.
pub fn seed_class(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let calls = [
        ("classes.create", json!({ "id": "c10", "name": "Class 10" })),
        ("sections.create", json!({ "id": "c10a", "classId": "c10", "name": "A" })),
        (
            "students.create",
            json!({ "id": "s1", "classId": "c10", "sectionId": "c10a", "rollNumber": 1, "displayName": "Arun" }),
        ),
        (
            "students.create",
            json!({ "id": "s2", "classId": "c10", "sectionId": "c10a", "rollNumber": 2, "displayName": "Bina" }),
        ),
        ("subjects.create", json!({ "id": "math", "name": "Mathematics" })),
        ("subjects.create", json!({ "id": "sci", "name": "Science" })),
        ("classes.assignSubject", json!({ "classId": "c10", "subjectId": "math" })),
        ("classes.assignSubject", json!({ "classId": "c10", "subjectId": "sci" })),
        ("terms.create", json!({ "id": "t1", "name": "Term 1", "weightShare": 40, "sortOrder": 1 })),
        ("terms.create", json!({ "id": "t2", "name": "Term 2", "weightShare": 60, "sortOrder": 2 })),
        ("exams.create", json!({ "id": "ut1", "name": "Unit Test 1" })),
        (
            "schemes.define",
            json!({
                "classId": "c10",
                "subjectId": "math",
                "examId": "ut1",
                "components": [
                    { "componentId": "u1", "name": "Unit 1", "abbreviation": "U1", "maxMarks": 20, "weightagePercent": 40 },
                    { "componentId": "u2", "name": "Unit 2", "abbreviation": "U2", "maxMarks": 80, "weightagePercent": 60 }
                ]
            }),
        ),
        (
            "schemes.define",
            json!({
                "classId": "c10",
                "subjectId": "sci",
                "termId": "t1",
                "components": [
                    { "componentId": "sci_t1", "name": "Science T1", "abbreviation": "SC", "maxMarks": 100, "weightagePercent": 100 }
                ]
            }),
        ),
        (
            "schemes.define",
            json!({
                "classId": "c10",
                "subjectId": "sci",
                "termId": "t2",
                "components": [
                    { "componentId": "sci_t2", "name": "Science T2", "abbreviation": "SC", "maxMarks": 100, "weightagePercent": 100 }
                ]
            }),
        ),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        request_ok(stdin, reader, &format!("seed-{}", i), method, params);
    }
}
