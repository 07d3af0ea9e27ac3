use crate::calc::{self, GradeWeights};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{course_exists, db_conn, required_str, user_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn handle_grades_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let assignment = match required_str(req, "assignment") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Only numeric scores are recorded; anything else is rejected up front so
    // aggregation never has to filter non-numeric values.
    let Some(score) = req.params.get("score").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "score must be a number", None);
    };

    match user_exists(conn, &user_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute(
        "INSERT INTO grades(user_id, assignment, score) VALUES(?, ?, ?)
         ON CONFLICT(user_id, assignment) DO UPDATE SET
           score = excluded.score",
        (&user_id, &assignment, score),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }

    ok(&req.id, json!({ "assignment": assignment, "score": score }))
}

fn handle_grades_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let assignment = match required_str(req, "assignment") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match conn.execute(
        "DELETE FROM grades WHERE user_id = ? AND assignment = ?",
        (&user_id, &assignment),
    ) {
        Ok(n) => ok(&req.id, json!({ "removed": n > 0 })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        ),
    }
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut stmt = match conn.prepare(
        "SELECT assignment, score FROM grades WHERE user_id = ? ORDER BY assignment",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&user_id], |r| {
            Ok(json!({
                "assignment": r.get::<_, String>(0)?,
                "score": r.get::<_, f64>(1)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub(super) fn parse_weights(
    raw: Option<&serde_json::Value>,
) -> Result<GradeWeights, calc::CalcError> {
    let Some(raw) = raw else {
        return Ok(GradeWeights::default());
    };
    if raw.is_null() {
        return Ok(GradeWeights::default());
    }
    let Some(obj) = raw.as_object() else {
        return Err(calc::CalcError::new(
            "bad_params",
            "weights must be an object",
        ));
    };
    let checkpoint = obj
        .get("checkpoint")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| calc::CalcError::new("bad_params", "weights.checkpoint must be a number"))?;
    let daily = obj
        .get("daily")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| calc::CalcError::new("bad_params", "weights.daily must be a number"))?;
    GradeWeights::new(checkpoint, daily)
}

pub(super) struct CourseGrade {
    pub average: f64,
    pub checkpoint_count: usize,
    pub daily_count: usize,
}

/// A grade counts toward the course average only when its assignment name
/// matches an entry in the course's grade-weight table.
pub(super) fn course_grade(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    weights: &GradeWeights,
) -> Result<CourseGrade, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT assignment, score FROM grades WHERE user_id = ?")?;
    let scores: Vec<(String, f64)> = stmt
        .query_map([user_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut stmt =
        conn.prepare("SELECT assignment, checkpoint FROM grade_weights WHERE course_id = ?")?;
    let weight_rows: Vec<(String, bool)> = stmt
        .query_map([course_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? != 0))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let table = calc::weight_table(&weight_rows);
    let (checkpoint, daily) = calc::split_scores(&scores, &table);
    let average = calc::round_off_1_decimal(calc::weighted_grade_average(
        &checkpoint,
        &daily,
        weights,
    ));
    Ok(CourseGrade {
        average,
        checkpoint_count: checkpoint.len(),
        daily_count: daily.len(),
    })
}

fn handle_calc_course_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let weights = match parse_weights(req.params.get("weights")) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
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

    match course_grade(conn, &user_id, &course_id, &weights) {
        Ok(grade) => ok(
            &req.id,
            json!({
                "average": grade.average,
                "checkpointCount": grade.checkpoint_count,
                "dailyCount": grade.daily_count,
                "weights": {
                    "checkpoint": weights.checkpoint,
                    "daily": weights.daily
                }
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.set" => Some(handle_grades_set(state, req)),
        "grades.delete" => Some(handle_grades_delete(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        "calc.courseGrade" => Some(handle_calc_course_grade(state, req)),
        _ => None,
    }
}
