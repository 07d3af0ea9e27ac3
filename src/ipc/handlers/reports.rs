use super::attendance::{attendance_counts, load_course_schedule};
use super::grades::{course_grade, parse_weights};
use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{as_of_date, course_exists, db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn handle_student_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let as_of = match as_of_date(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let weights = match parse_weights(req.params.get("weights")) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    let user_row: Option<(String, i64, String, String, String)> = match conn
        .query_row(
            "SELECT client_id, idn, username, first_name, last_name
             FROM users WHERE id = ?",
            [&user_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((client_id, idn, username, first_name, last_name)) = user_row else {
        return err(&req.id, "not_found", "user not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT c.id, c.name, t.start_date, t.end_date
         FROM registrations r
         JOIN courses c ON c.id = r.course_id
         LEFT JOIN terms t ON t.id = c.term_id
         WHERE r.user_id = ?
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let registered = stmt
        .query_map([&user_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let registered = match registered {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut courses = Vec::with_capacity(registered.len());
    for (course_id, course_name, start_raw, end_raw) in registered {
        let schedule = match load_course_schedule(conn, &course_id) {
            Ok(Some(s)) => s,
            Ok(None) => continue,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let (percentage, attended, held) =
            match attendance_counts(conn, &user_id, &schedule, as_of) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
        let grade = match course_grade(conn, &user_id, &course_id, &weights) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let term_status = match (
            start_raw.as_deref().and_then(calc::calendar_day),
            end_raw.as_deref().and_then(calc::calendar_day),
        ) {
            (Some(start), Some(end)) => calc::term_status(start, end, as_of).as_str(),
            _ => "unknown",
        };
        courses.push(json!({
            "courseId": course_id,
            "name": course_name,
            "termStatus": term_status,
            "attendance": {
                "percentage": percentage,
                "attendedCount": attended,
                "heldCount": held
            },
            "grade": {
                "average": grade.average,
                "checkpointCount": grade.checkpoint_count,
                "dailyCount": grade.daily_count
            }
        }));
    }

    ok(
        &req.id,
        json!({
            "user": {
                "id": user_id,
                "clientId": client_id,
                "idn": idn,
                "username": username,
                "displayName": format!("{}, {}", last_name, first_name)
            },
            "asOf": as_of.format("%Y-%m-%d").to_string(),
            "courses": courses
        }),
    )
}

fn handle_course_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let as_of = match as_of_date(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let weights = match parse_weights(req.params.get("weights")) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let course_name: String =
        match conn.query_row("SELECT name FROM courses WHERE id = ?", [&course_id], |r| {
            r.get(0)
        }) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
    let schedule = match load_course_schedule(conn, &course_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.idn, u.username, u.first_name, u.last_name
         FROM registrations r
         JOIN users u ON u.id = r.user_id
         WHERE r.course_id = ?
         ORDER BY u.idn",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let members = stmt
        .query_map([&course_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let members = match members {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows = Vec::with_capacity(members.len());
    for (user_id, idn, username, first_name, last_name) in members {
        let (percentage, attended, held) =
            match attendance_counts(conn, &user_id, &schedule, as_of) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
        let grade = match course_grade(conn, &user_id, &course_id, &weights) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        rows.push(json!({
            "userId": user_id,
            "idn": idn,
            "username": username,
            "displayName": format!("{}, {}", last_name, first_name),
            "attendance": {
                "percentage": percentage,
                "attendedCount": attended,
                "heldCount": held
            },
            "average": grade.average
        }));
    }

    ok(
        &req.id,
        json!({
            "course": { "id": course_id, "name": course_name },
            "asOf": as_of.format("%Y-%m-%d").to_string(),
            "rows": rows
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.studentSummary" => Some(handle_student_summary(state, req)),
        "reports.courseRoster" => Some(handle_course_roster(state, req)),
        _ => None,
    }
}
