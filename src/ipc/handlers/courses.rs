use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    as_of_date, client_exists, course_exists, db_conn, optional_str, required_str, user_exists,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

struct BadDays(String);

fn parse_days(raw: Option<&serde_json::Value>) -> Result<Option<Vec<u32>>, BadDays> {
    let Some(raw) = raw else { return Ok(None) };
    if raw.is_null() {
        return Ok(None);
    }
    let Some(arr) = raw.as_array() else {
        return Err(BadDays("days must be an array of weekdays".to_string()));
    };
    let mut days = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(d) = v.as_u64().filter(|d| *d <= 6) else {
            return Err(BadDays(
                "days entries must be 0 (Monday) through 6 (Sunday)".to_string(),
            ));
        };
        let d = d as u32;
        if !days.contains(&d) {
            days.push(d);
        }
    }
    Ok(Some(days))
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let client_id = match required_str(req, "clientId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let term_id = optional_str(req, "termId");
    let days = match parse_days(req.params.get("days")) {
        Ok(v) => v.unwrap_or_default(),
        Err(BadDays(msg)) => return err(&req.id, "bad_params", msg, None),
    };

    match client_exists(conn, &client_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "client not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    if let Some(term_id) = &term_id {
        let found = conn
            .query_row(
                "SELECT 1 FROM terms WHERE id = ? AND client_id = ?",
                (term_id, &client_id),
                |r| r.get::<_, i64>(0),
            )
            .optional();
        match found {
            Ok(Some(_)) => {}
            Ok(None) => return err(&req.id, "not_found", "term not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let course_id = Uuid::new_v4().to_string();
    let days_json = serde_json::to_string(&days).unwrap_or_else(|_| "[]".to_string());
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, client_id, name, term_id, days) VALUES(?, ?, ?, ?, ?)",
        (
            &course_id,
            &client_id,
            &name,
            term_id.as_deref(),
            &days_json,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "courseId": course_id, "name": name }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let client_id = match required_str(req, "clientId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let as_of = match as_of_date(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.term_id,
           c.days,
           t.start_date,
           t.end_date,
           (SELECT COUNT(*) FROM registrations r WHERE r.course_id = c.id) AS registered_count
         FROM courses c
         LEFT JOIN terms t ON t.id = c.term_id
         WHERE c.client_id = ?
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&client_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, i64>(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let courses: Vec<serde_json::Value> = rows
        .into_iter()
        .map(
            |(id, name, term_id, days_json, start_raw, end_raw, registered_count)| {
                let days: Vec<u32> = serde_json::from_str(&days_json).unwrap_or_default();
                let status = match (
                    start_raw.as_deref().and_then(calc::calendar_day),
                    end_raw.as_deref().and_then(calc::calendar_day),
                ) {
                    (Some(start), Some(end)) => calc::term_status(start, end, as_of).as_str(),
                    _ => "unknown",
                };
                json!({
                    "id": id,
                    "name": name,
                    "termId": term_id,
                    "days": days,
                    "termStatus": status,
                    "registeredCount": registered_count
                })
            },
        )
        .collect();

    ok(&req.id, json!({ "courses": courses }))
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut sets: Vec<&'static str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = patch.get("name") {
        let Some(name) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return err(&req.id, "bad_params", "patch.name must not be empty", None);
        };
        sets.push("name = ?");
        values.push(rusqlite::types::Value::Text(name.to_string()));
    }
    if let Some(v) = patch.get("termId") {
        if v.is_null() {
            sets.push("term_id = ?");
            values.push(rusqlite::types::Value::Null);
        } else if let Some(term_id) = v.as_str() {
            sets.push("term_id = ?");
            values.push(rusqlite::types::Value::Text(term_id.to_string()));
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.termId must be string or null",
                None,
            );
        }
    }
    match parse_days(patch.get("days")) {
        Ok(Some(days)) => {
            sets.push("days = ?");
            values.push(rusqlite::types::Value::Text(
                serde_json::to_string(&days).unwrap_or_else(|_| "[]".to_string()),
            ));
        }
        Ok(None) => {}
        Err(BadDays(msg)) => return err(&req.id, "bad_params", msg, None),
    }

    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no updatable fields", None);
    }

    let sql = format!("UPDATE courses SET {} WHERE id = ?", sets.join(", "));
    values.push(rusqlite::types::Value::Text(course_id.clone()));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let steps: &[(&str, &str)] = &[
        (
            "grade_weights",
            "DELETE FROM grade_weights WHERE course_id = ?",
        ),
        (
            "registrations",
            "DELETE FROM registrations WHERE course_id = ?",
        ),
        ("courses", "DELETE FROM courses WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&course_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_courses_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match user_exists(conn, &user_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let inserted = conn.execute(
        "INSERT INTO registrations(course_id, user_id) VALUES(?, ?)
         ON CONFLICT(course_id, user_id) DO NOTHING",
        (&course_id, &user_id),
    );
    match inserted {
        Ok(n) => ok(&req.id, json!({ "registered": true, "already": n == 0 })),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "registrations" })),
        ),
    }
}

fn handle_courses_unregister(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match conn.execute(
        "DELETE FROM registrations WHERE course_id = ? AND user_id = ?",
        (&course_id, &user_id),
    ) {
        Ok(n) => ok(&req.id, json!({ "removed": n > 0 })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "registrations" })),
        ),
    }
}

fn handle_set_grade_weights(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(raw_weights) = req.params.get("weights").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing weights array", None);
    };

    let mut weights: Vec<(String, bool)> = Vec::with_capacity(raw_weights.len());
    for w in raw_weights {
        let assignment = w
            .get("assignment")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let Some(assignment) = assignment else {
            return err(
                &req.id,
                "bad_params",
                "weights entries need a non-empty assignment",
                None,
            );
        };
        let checkpoint = w
            .get("checkpoint")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        weights.push((assignment.to_lowercase(), checkpoint));
    }

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Replace the whole table for the course in one transaction.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM grade_weights WHERE course_id = ?", [&course_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grade_weights" })),
        );
    }
    for (assignment, checkpoint) in &weights {
        if let Err(e) = tx.execute(
            "INSERT INTO grade_weights(course_id, assignment, checkpoint) VALUES(?, ?, ?)
             ON CONFLICT(course_id, assignment) DO UPDATE SET
               checkpoint = excluded.checkpoint",
            (&course_id, assignment, *checkpoint as i64),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "grade_weights" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "count": weights.len() }))
}

fn handle_grade_weights(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT assignment, checkpoint
         FROM grade_weights
         WHERE course_id = ?
         ORDER BY assignment",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "assignment": r.get::<_, String>(0)?,
                "checkpoint": r.get::<_, i64>(1)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(weights) => ok(&req.id, json!({ "weights": weights })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        "courses.register" => Some(handle_courses_register(state, req)),
        "courses.unregister" => Some(handle_courses_unregister(state, req)),
        "courses.setGradeWeights" => Some(handle_set_grade_weights(state, req)),
        "courses.gradeWeights" => Some(handle_grade_weights(state, req)),
        _ => None,
    }
}
