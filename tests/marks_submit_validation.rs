use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    expected_code: &str,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    let error = value.get("error").cloned().unwrap_or_else(|| json!({}));
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some(expected_code),
        "unexpected error for {}: {}",
        method,
        value
    );
    error
}

fn select_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, ws: &PathBuf) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": ws.to_string_lossy() }),
    );
}

fn entry(student_id: i64, subject_id: i64, class_id: i64, obtained: f64) -> serde_json::Value {
    json!({
        "student_id": student_id,
        "subject_id": subject_id,
        "class_id": class_id,
        "exam_type": "midterm",
        "marks_obtained": obtained,
        "total_marks": 50.0,
        "grade": "A",
        "on_leave": false
    })
}

#[test]
fn empty_entries_are_rejected_before_any_write() {
    let workspace = temp_dir("campusd-validate-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "submit-empty",
        "marks.submit",
        json!({ "entries": [] }),
        "bad_params",
    );
    assert_eq!(
        error.get("message").and_then(|v| v.as_str()),
        Some("No entries provided")
    );

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "submit-missing",
        "marks.submit",
        json!({}),
        "bad_params",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "update-empty",
        "marks.update",
        json!({ "entries": [] }),
        "bad_params",
    );
}

#[test]
fn malformed_entry_shape_is_a_validation_error() {
    let workspace = temp_dir("campusd-validate-shape");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    // exam_type missing entirely.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "submit-shape",
        "marks.submit",
        json!({ "entries": [{
            "student_id": 1,
            "subject_id": 1,
            "class_id": 1,
            "marks_obtained": 10.0,
            "total_marks": 50.0,
            "grade": "C"
        }] }),
        "bad_params",
    );
}

#[test]
fn submit_without_covering_session_is_rejected_with_no_writes() {
    let workspace = temp_dir("campusd-validate-nosession");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    // Only a long-expired session exists.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "old-session",
        "sessions.create",
        json!({
            "session_name": "1990-91",
            "start_date": "1990-06-01",
            "end_date": "1991-03-31"
        }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "class_name": "5A", "grade": 5, "section": "A" }),
    );
    let class_id = class.get("class_id").and_then(|v| v.as_i64()).expect("class_id");
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "subject",
        "subjects.create",
        json!({ "subject_name": "Mathematics" }),
    );
    let subject_id = subject
        .get("subject_id")
        .and_then(|v| v.as_i64())
        .expect("subject_id");
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "student",
        "students.create",
        json!({ "name": "Asha Rao", "mobile": "9000000001", "password": "pw", "class_id": class_id }),
    );
    let student_id = student
        .get("student_id")
        .and_then(|v| v.as_i64())
        .expect("student_id");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "submit",
        "marks.submit",
        json!({ "entries": [entry(student_id, subject_id, class_id, 45.0)] }),
        "not_found",
    );
    assert_eq!(
        error.get("message").and_then(|v| v.as_str()),
        Some("No active session found")
    );

    // Nothing was written.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "read",
        "marks.byClassSubjectExam",
        json!({ "class_id": class_id, "subject_id": subject_id, "exam_type": "midterm" }),
    );
    let rows = result.get("entries").and_then(|v| v.as_array()).expect("entries");
    assert_eq!(rows.len(), 1);
    assert!(rows[0].get("marks_obtained").expect("field").is_null());
}

#[test]
fn constraint_violation_rolls_back_the_whole_batch() {
    let workspace = temp_dir("campusd-validate-atomic");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "session",
        "sessions.create",
        json!({
            "session_name": "Evergreen",
            "start_date": "2000-01-01",
            "end_date": "2099-12-31"
        }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "class",
        "classes.create",
        json!({ "class_name": "5A", "grade": 5, "section": "A" }),
    );
    let class_id = class.get("class_id").and_then(|v| v.as_i64()).expect("class_id");
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "subject",
        "subjects.create",
        json!({ "subject_name": "Mathematics" }),
    );
    let subject_id = subject
        .get("subject_id")
        .and_then(|v| v.as_i64())
        .expect("subject_id");
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "student",
        "students.create",
        json!({ "name": "Asha Rao", "mobile": "9000000001", "password": "pw", "class_id": class_id }),
    );
    let student_id = student
        .get("student_id")
        .and_then(|v| v.as_i64())
        .expect("student_id");

    // Second entry references a student that does not exist, so the insert
    // trips the foreign key. The first entry must not survive.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "submit",
        "marks.submit",
        json!({ "entries": [
            entry(student_id, subject_id, class_id, 45.0),
            entry(9999, subject_id, class_id, 30.0),
        ] }),
        "db_write_failed",
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "read",
        "marks.byClassSubjectExam",
        json!({ "class_id": class_id, "subject_id": subject_id, "exam_type": "midterm" }),
    );
    let rows = result.get("entries").and_then(|v| v.as_array()).expect("entries");
    assert_eq!(rows.len(), 1);
    assert!(
        rows[0].get("marks_obtained").expect("field").is_null(),
        "rolled-back batch must leave no partial writes"
    );
}
