use crate::calc;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};

pub fn db_conn<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// The explicit reference date for past/current/future classification and
/// "past dates" filtering. The system date is only a wire-boundary default;
/// tests pass a fixed `asOf`.
pub fn as_of_date(req: &Request) -> Result<NaiveDate, serde_json::Value> {
    match req.params.get("asOf").and_then(|v| v.as_str()) {
        Some(raw) => calc::calendar_day(raw)
            .ok_or_else(|| err(&req.id, "bad_params", "asOf must be YYYY-MM-DD", None)),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

pub fn client_exists(conn: &Connection, client_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row("SELECT 1 FROM clients WHERE id = ?", [client_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

pub fn user_exists(conn: &Connection, user_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row("SELECT 1 FROM users WHERE id = ?", [user_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

pub fn course_exists(conn: &Connection, course_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}
