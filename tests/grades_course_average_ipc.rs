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
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Fixture {
    user_id: String,
    course_id: String,
}

fn setup(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let client_id = request_ok(
        stdin,
        reader,
        "client",
        "clients.create",
        json!({ "name": "Grades School" }),
    )
    .get("clientId")
    .and_then(|v| v.as_str())
    .expect("clientId")
    .to_string();
    let course_id = request_ok(
        stdin,
        reader,
        "course",
        "courses.create",
        json!({ "clientId": client_id, "name": "Chemistry" }),
    )
    .get("courseId")
    .and_then(|v| v.as_str())
    .expect("courseId")
    .to_string();
    let user_id = request_ok(
        stdin,
        reader,
        "user",
        "users.create",
        json!({
            "clientId": client_id,
            "username": "grade.student",
            "firstName": "Grade",
            "lastName": "Student"
        }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .expect("userId")
    .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "weights",
        "courses.setGradeWeights",
        json!({
            "courseId": course_id,
            "weights": [
                { "assignment": "Midterm", "checkpoint": true },
                { "assignment": "Final", "checkpoint": true },
                { "assignment": "Homework 1", "checkpoint": false },
                { "assignment": "Homework 2", "checkpoint": false }
            ]
        }),
    );
    Fixture { user_id, course_id }
}

fn set_grade(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    fixture: &Fixture,
    assignment: &str,
    score: f64,
) {
    let _ = request_ok(
        stdin,
        reader,
        id,
        "grades.set",
        json!({
            "userId": fixture.user_id,
            "assignment": assignment,
            "score": score
        }),
    );
}

#[test]
fn weighted_average_uses_grade_weight_table_and_default_split() {
    let workspace = temp_dir("campus-grades-weighted");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fixture = setup(&mut stdin, &mut reader, &workspace);

    set_grade(&mut stdin, &mut reader, "g1", &fixture, "midterm", 90.0);
    set_grade(&mut stdin, &mut reader, "g2", &fixture, "final", 80.0);
    set_grade(&mut stdin, &mut reader, "g3", &fixture, "homework 1", 70.0);
    set_grade(&mut stdin, &mut reader, "g4", &fixture, "homework 2", 80.0);
    // Scored but absent from the weight table: excluded entirely.
    set_grade(&mut stdin, &mut reader, "g5", &fixture, "extra credit", 100.0);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "calc.courseGrade",
        json!({ "userId": fixture.user_id, "courseId": fixture.course_id }),
    );
    // checkpoint mean 85, daily mean 75 -> 0.6 * 85 + 0.4 * 75.
    assert_eq!(result.get("average").and_then(|v| v.as_f64()), Some(81.0));
    assert_eq!(
        result.get("checkpointCount").and_then(|v| v.as_u64()),
        Some(2)
    );
    assert_eq!(result.get("dailyCount").and_then(|v| v.as_u64()), Some(2));

    let overridden = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "calc.courseGrade",
        json!({
            "userId": fixture.user_id,
            "courseId": fixture.course_id,
            "weights": { "checkpoint": 0.5, "daily": 0.5 }
        }),
    );
    assert_eq!(
        overridden.get("average").and_then(|v| v.as_f64()),
        Some(80.0)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn average_degrades_to_single_category_and_empty_is_zero() {
    let workspace = temp_dir("campus-grades-degrade");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fixture = setup(&mut stdin, &mut reader, &workspace);

    // No grades at all: 0, not NaN.
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "c0",
        "calc.courseGrade",
        json!({ "userId": fixture.user_id, "courseId": fixture.course_id }),
    );
    assert_eq!(empty.get("average").and_then(|v| v.as_f64()), Some(0.0));

    // Only daily scores: the simple daily mean, not a 0.4-weighted one.
    set_grade(&mut stdin, &mut reader, "g1", &fixture, "homework 1", 70.0);
    set_grade(&mut stdin, &mut reader, "g2", &fixture, "homework 2", 80.0);
    let daily_only = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "calc.courseGrade",
        json!({ "userId": fixture.user_id, "courseId": fixture.course_id }),
    );
    assert_eq!(
        daily_only.get("average").and_then(|v| v.as_f64()),
        Some(75.0)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bad_weight_policies_are_rejected() {
    let workspace = temp_dir("campus-grades-badweights");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fixture = setup(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "c1",
        "calc.courseGrade",
        json!({
            "userId": fixture.user_id,
            "courseId": fixture.course_id,
            "weights": { "checkpoint": 0.8, "daily": 0.4 }
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "c2",
        "grades.set",
        json!({
            "userId": fixture.user_id,
            "assignment": "midterm",
            "score": "not a number"
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));

    let _ = std::fs::remove_dir_all(workspace);
}
