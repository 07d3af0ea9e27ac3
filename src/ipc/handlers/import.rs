use crate::importer::{self, RawUserInput, SqliteUserStore};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{client_exists, db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_users_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let client_id = match required_str(req, "clientId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(raw_users) = req.params.get("users") else {
        return err(&req.id, "bad_params", "missing users array", None);
    };
    let candidates: Vec<RawUserInput> = match serde_json::from_value(raw_users.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("users must be an array of user records: {}", e),
                None,
            )
        }
    };

    match client_exists(conn, &client_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "client not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // No wrapping transaction: a persistence failure aborts the rest of the
    // batch but records accepted before it stay persisted, matching the
    // sequential check-then-insert contract.
    let mut store = SqliteUserStore::new(conn);
    match importer::import_users(&mut store, &client_id, candidates) {
        Ok(outcome) => ok(
            &req.id,
            serde_json::to_value(&outcome).unwrap_or_else(|_| json!({})),
        ),
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.import" => Some(handle_users_import(state, req)),
        _ => None,
    }
}
