use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{as_of_date, client_exists, db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_terms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let start_raw = match required_str(req, "startDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let end_raw = match required_str(req, "endDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let (Some(start), Some(end)) = (calc::calendar_day(&start_raw), calc::calendar_day(&end_raw))
    else {
        return err(
            &req.id,
            "bad_params",
            "startDate and endDate must be YYYY-MM-DD",
            None,
        );
    };
    if start > end {
        return err(&req.id, "bad_params", "startDate is after endDate", None);
    }

    match client_exists(conn, &client_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "client not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let term_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO terms(id, client_id, name, start_date, end_date) VALUES(?, ?, ?, ?, ?)",
        (
            &term_id,
            &client_id,
            &name,
            start.format("%Y-%m-%d").to_string(),
            end.format("%Y-%m-%d").to_string(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "terms" })),
        );
    }

    ok(&req.id, json!({ "termId": term_id, "name": name }))
}

fn handle_terms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        "SELECT id, name, start_date, end_date
         FROM terms
         WHERE client_id = ?
         ORDER BY start_date",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&client_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let terms: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(id, name, start_raw, end_raw)| {
            let status = match (calc::calendar_day(&start_raw), calc::calendar_day(&end_raw)) {
                (Some(start), Some(end)) => calc::term_status(start, end, as_of).as_str(),
                _ => "unknown",
            };
            json!({
                "id": id,
                "name": name,
                "startDate": start_raw,
                "endDate": end_raw,
                "status": status
            })
        })
        .collect();

    ok(&req.id, json!({ "terms": terms }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "terms.create" => Some(handle_terms_create(state, req)),
        "terms.list" => Some(handle_terms_list(state, req)),
        _ => None,
    }
}
