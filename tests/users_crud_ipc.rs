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

fn setup_client(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    name: &str,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(stdin, reader, "client", "clients.create", json!({ "name": name }))
        .get("clientId")
        .and_then(|v| v.as_str())
        .expect("clientId")
        .to_string()
}

#[test]
fn create_lower_cases_usernames_and_rejects_collisions() {
    let workspace = temp_dir("campus-users-create");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let client_id = setup_client(&mut stdin, &mut reader, &workspace, "CRUD School");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "users.create",
        json!({
            "clientId": client_id,
            "username": "Mixed.Case",
            "firstName": "Mixed",
            "lastName": "Case"
        }),
    );
    assert_eq!(
        created.get("username").and_then(|v| v.as_str()),
        Some("mixed.case")
    );
    assert_eq!(created.get("idn").and_then(|v| v.as_i64()), Some(1));

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({
            "clientId": client_id,
            "username": "MIXED.CASE",
            "firstName": "Other",
            "lastName": "Person"
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("username_taken")
    );

    // The failed create did not consume a sequence number.
    let next = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({
            "clientId": client_id,
            "username": "second.user",
            "firstName": "Second",
            "lastName": "User"
        }),
    );
    assert_eq!(next.get("idn").and_then(|v| v.as_i64()), Some(2));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn update_patches_only_the_given_fields() {
    let workspace = temp_dir("campus-users-update");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let client_id = setup_client(&mut stdin, &mut reader, &workspace, "Patch School");

    let user_id = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "users.create",
        json!({
            "clientId": client_id,
            "username": "patch.me",
            "firstName": "Patch",
            "lastName": "Me",
            "email": "patch@example.org"
        }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .expect("userId")
    .to_string();

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.update",
        json!({
            "userId": user_id,
            "patch": {
                "firstName": "Patched",
                "isInstructor": true,
                "credits": 4.5,
                "price": 120.0
            }
        }),
    );
    let user = updated.get("user").expect("user");
    assert_eq!(
        user.get("firstName").and_then(|v| v.as_str()),
        Some("Patched")
    );
    // Untouched fields survive the patch.
    assert_eq!(user.get("lastName").and_then(|v| v.as_str()), Some("Me"));
    assert_eq!(
        user.get("email").and_then(|v| v.as_str()),
        Some("patch@example.org")
    );
    assert_eq!(user.get("isInstructor").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(user.get("isStudent").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(user.get("credits").and_then(|v| v.as_f64()), Some(4.5));
    assert_eq!(user.get("price").and_then(|v| v.as_f64()), Some(120.0));

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "users.update",
        json!({ "userId": user_id, "patch": {} }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn delete_removes_attendance_grades_and_registrations() {
    let workspace = temp_dir("campus-users-delete");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let client_id = setup_client(&mut stdin, &mut reader, &workspace, "Delete School");

    let user_id = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "users.create",
        json!({
            "clientId": client_id,
            "username": "delete.me",
            "firstName": "Delete",
            "lastName": "Me"
        }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .expect("userId")
    .to_string();
    let course_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.create",
        json!({ "clientId": client_id, "name": "Doomed" }),
    )
    .get("courseId")
    .and_then(|v| v.as_str())
    .expect("courseId")
    .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.register",
        json!({ "courseId": course_id, "userId": user_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.toggle",
        json!({ "userId": user_id, "timestamp": "2026-01-05T09:00:00" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.set",
        json!({ "userId": user_id, "assignment": "quiz", "score": 50.0 }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "users.delete",
        json!({ "userId": user_id }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "users.list",
        json!({ "clientId": client_id }),
    );
    assert!(listed
        .get("users")
        .and_then(|v| v.as_array())
        .map(|a| a.is_empty())
        .unwrap_or(false));

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "reports.courseRoster",
        json!({ "courseId": course_id, "asOf": "2026-01-14" }),
    );
    assert!(roster
        .get("rows")
        .and_then(|v| v.as_array())
        .map(|a| a.is_empty())
        .unwrap_or(false));

    let resp = request(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.list",
        json!({ "userId": user_id }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));

    let _ = std::fs::remove_dir_all(workspace);
}
