use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{as_of_date, course_exists, db_conn, required_str, user_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;

fn recorded_stamps(conn: &Connection, user_id: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT recorded_at FROM attendance WHERE user_id = ? ORDER BY recorded_at",
    )?;
    stmt.query_map([user_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

fn handle_attendance_toggle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let timestamp = match required_str(req, "timestamp") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(day) = calc::calendar_day(&timestamp) else {
        return err(
            &req.id,
            "bad_params",
            "timestamp must carry a YYYY-MM-DD date",
            None,
        );
    };

    match user_exists(conn, &user_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let stamps = match recorded_stamps(conn, &user_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // A day can be backed by more than one stamp in older data; unmarking
    // removes them all, which is what keeps the toggle idempotent.
    let same_day: Vec<&String> = stamps
        .iter()
        .filter(|s| calc::calendar_day(s) == Some(day))
        .collect();

    if same_day.is_empty() {
        if let Err(e) = conn.execute(
            "INSERT INTO attendance(user_id, recorded_at) VALUES(?, ?)",
            (&user_id, &timestamp),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "attendance" })),
            );
        }
        return ok(
            &req.id,
            json!({ "marked": true, "day": day.format("%Y-%m-%d").to_string() }),
        );
    }

    for stamp in &same_day {
        if let Err(e) = conn.execute(
            "DELETE FROM attendance WHERE user_id = ? AND recorded_at = ?",
            (&user_id, stamp.as_str()),
        ) {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "attendance" })),
            );
        }
    }
    ok(
        &req.id,
        json!({ "marked": false, "day": day.format("%Y-%m-%d").to_string() }),
    )
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match user_exists(conn, &user_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match recorded_stamps(conn, &user_id) {
        Ok(stamps) => ok(&req.id, json!({ "attendance": stamps })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub(super) struct CourseSchedule {
    pub days: Vec<u32>,
    pub term_range: Option<(chrono::NaiveDate, chrono::NaiveDate)>,
}

pub(super) fn load_course_schedule(
    conn: &Connection,
    course_id: &str,
) -> Result<Option<CourseSchedule>, rusqlite::Error> {
    let row: Option<(String, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT c.days, t.start_date, t.end_date
             FROM courses c
             LEFT JOIN terms t ON t.id = c.term_id
             WHERE c.id = ?",
            [course_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    Ok(row.map(|(days_json, start_raw, end_raw)| {
        let days: Vec<u32> = serde_json::from_str(&days_json).unwrap_or_default();
        let term_range = match (
            start_raw.as_deref().and_then(calc::calendar_day),
            end_raw.as_deref().and_then(calc::calendar_day),
        ) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        };
        CourseSchedule { days, term_range }
    }))
}

pub(super) fn attendance_counts(
    conn: &Connection,
    user_id: &str,
    schedule: &CourseSchedule,
    as_of: chrono::NaiveDate,
) -> Result<(i64, usize, usize), rusqlite::Error> {
    let held = match schedule.term_range {
        Some((start, end)) => {
            calc::past_dates(&calc::scheduled_dates(&schedule.days, start, end), as_of)
        }
        None => Vec::new(),
    };
    let recorded: Vec<chrono::NaiveDate> = recorded_stamps(conn, user_id)?
        .iter()
        .filter_map(|s| calc::calendar_day(s))
        .collect();

    let percentage = calc::attendance_average(&held, &recorded);
    let held_set: HashSet<chrono::NaiveDate> = held.iter().copied().collect();
    let recorded_set: HashSet<chrono::NaiveDate> = recorded.into_iter().collect();
    let attended = held_set.intersection(&recorded_set).count();
    Ok((percentage, attended, held_set.len()))
}

fn handle_attendance_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
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

    match user_exists(conn, &user_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match course_exists(conn, &course_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let schedule = match load_course_schedule(conn, &course_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "course not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match attendance_counts(conn, &user_id, &schedule, as_of) {
        Ok((percentage, attended, held)) => ok(
            &req.id,
            json!({
                "percentage": percentage,
                "attendedCount": attended,
                "heldCount": held,
                "asOf": as_of.format("%Y-%m-%d").to_string()
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.toggle" => Some(handle_attendance_toggle(state, req)),
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "attendance.summary" => Some(handle_attendance_summary(state, req)),
        _ => None,
    }
}
