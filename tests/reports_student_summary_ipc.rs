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

fn request_ok(
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

#[test]
fn student_summary_combines_attendance_grade_and_term_status() {
    let workspace = temp_dir("campus-reports-summary");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let client_id = request_ok(
        &mut stdin,
        &mut reader,
        "client",
        "clients.create",
        json!({ "name": "Reports School" }),
    )
    .get("clientId")
    .and_then(|v| v.as_str())
    .expect("clientId")
    .to_string();
    let term_id = request_ok(
        &mut stdin,
        &mut reader,
        "term",
        "terms.create",
        json!({
            "clientId": client_id,
            "name": "Winter",
            "startDate": "2026-01-05",
            "endDate": "2026-03-27"
        }),
    )
    .get("termId")
    .and_then(|v| v.as_str())
    .expect("termId")
    .to_string();
    let course_id = request_ok(
        &mut stdin,
        &mut reader,
        "course",
        "courses.create",
        json!({
            "clientId": client_id,
            "name": "Algebra",
            "termId": term_id,
            "days": [0, 2]
        }),
    )
    .get("courseId")
    .and_then(|v| v.as_str())
    .expect("courseId")
    .to_string();
    let user_id = request_ok(
        &mut stdin,
        &mut reader,
        "user",
        "users.create",
        json!({
            "clientId": client_id,
            "username": "report.student",
            "firstName": "Report",
            "lastName": "Student"
        }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .expect("userId")
    .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "reg",
        "courses.register",
        json!({ "courseId": course_id, "userId": user_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "weights",
        "courses.setGradeWeights",
        json!({
            "courseId": course_id,
            "weights": [
                { "assignment": "midterm", "checkpoint": true },
                { "assignment": "homework 1", "checkpoint": false }
            ]
        }),
    );

    // Two of the four sessions held by Jan 14.
    for (i, stamp) in ["2026-01-05T09:00:00", "2026-01-07T09:00:00"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("t{}", i),
            "attendance.toggle",
            json!({ "userId": user_id, "timestamp": stamp }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.set",
        json!({ "userId": user_id, "assignment": "midterm", "score": 90.0 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "grades.set",
        json!({ "userId": user_id, "assignment": "homework 1", "score": 70.0 }),
    );

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "sum",
        "reports.studentSummary",
        json!({ "userId": user_id, "asOf": "2026-01-14" }),
    );

    assert_eq!(
        summary
            .get("user")
            .and_then(|u| u.get("displayName"))
            .and_then(|v| v.as_str()),
        Some("Student, Report")
    );
    let courses = summary
        .get("courses")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("courses array");
    assert_eq!(courses.len(), 1);
    let row = &courses[0];
    assert_eq!(
        row.get("termStatus").and_then(|v| v.as_str()),
        Some("current")
    );
    let attendance = row.get("attendance").expect("attendance");
    assert_eq!(
        attendance.get("percentage").and_then(|v| v.as_i64()),
        Some(50)
    );
    assert_eq!(
        attendance.get("heldCount").and_then(|v| v.as_i64()),
        Some(4)
    );
    let grade = row.get("grade").expect("grade");
    // 0.6 * 90 + 0.4 * 70.
    assert_eq!(grade.get("average").and_then(|v| v.as_f64()), Some(82.0));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn course_roster_orders_students_by_sequence_number() {
    let workspace = temp_dir("campus-reports-roster");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let client_id = request_ok(
        &mut stdin,
        &mut reader,
        "client",
        "clients.create",
        json!({ "name": "Roster School" }),
    )
    .get("clientId")
    .and_then(|v| v.as_str())
    .expect("clientId")
    .to_string();
    let course_id = request_ok(
        &mut stdin,
        &mut reader,
        "course",
        "courses.create",
        json!({ "clientId": client_id, "name": "History" }),
    )
    .get("courseId")
    .and_then(|v| v.as_str())
    .expect("courseId")
    .to_string();

    let mut user_ids = Vec::new();
    for (i, (username, first, last)) in [
        ("zeta.last", "Zeta", "Last"),
        ("alpha.first", "Alpha", "First"),
    ]
    .iter()
    .enumerate()
    {
        let user_id = request_ok(
            &mut stdin,
            &mut reader,
            &format!("u{}", i),
            "users.create",
            json!({
                "clientId": client_id,
                "username": username,
                "firstName": first,
                "lastName": last
            }),
        )
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("r{}", i),
            "courses.register",
            json!({ "courseId": course_id, "userId": user_id }),
        );
        user_ids.push(user_id);
    }

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "roster",
        "reports.courseRoster",
        json!({ "courseId": course_id, "asOf": "2026-01-14" }),
    );
    let rows = roster
        .get("rows")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("rows array");
    assert_eq!(rows.len(), 2);
    // Creation order, not alphabetical order.
    assert_eq!(rows[0].get("idn").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        rows[0].get("username").and_then(|v| v.as_str()),
        Some("zeta.last")
    );
    assert_eq!(rows[1].get("idn").and_then(|v| v.as_i64()), Some(2));

    let _ = std::fs::remove_dir_all(workspace);
}
