use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{client_exists, db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_clients_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "clients": [] }));
    };

    // Include basic counts so the UI can show a useful dashboard.
    // Use correlated subqueries to avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM users u WHERE u.client_id = c.id) AS user_count,
           (SELECT COUNT(*) FROM courses co WHERE co.client_id = c.id) AS course_count
         FROM clients c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let user_count: i64 = row.get(2)?;
            let course_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "userCount": user_count,
                "courseCount": course_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(clients) => ok(&req.id, json!({ "clients": clients })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_clients_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let client_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO clients(id, name) VALUES(?, ?)",
        (&client_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "clients" })),
        );
    }

    ok(&req.id, json!({ "clientId": client_id, "name": name }))
}

fn handle_clients_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let client_id = match required_str(req, "clientId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match client_exists(conn, &client_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "client not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    let steps: &[(&str, &str)] = &[
        (
            "attendance",
            "DELETE FROM attendance
             WHERE user_id IN (SELECT id FROM users WHERE client_id = ?)",
        ),
        (
            "grades",
            "DELETE FROM grades
             WHERE user_id IN (SELECT id FROM users WHERE client_id = ?)",
        ),
        (
            "registrations",
            "DELETE FROM registrations
             WHERE user_id IN (SELECT id FROM users WHERE client_id = ?)
                OR course_id IN (SELECT id FROM courses WHERE client_id = ?)",
        ),
        (
            "grade_weights",
            "DELETE FROM grade_weights
             WHERE course_id IN (SELECT id FROM courses WHERE client_id = ?)",
        ),
        ("courses", "DELETE FROM courses WHERE client_id = ?"),
        ("users", "DELETE FROM users WHERE client_id = ?"),
        ("terms", "DELETE FROM terms WHERE client_id = ?"),
        ("clients", "DELETE FROM clients WHERE id = ?"),
    ];
    for (table, sql) in steps {
        let param_count = sql.matches('?').count();
        let result = if param_count == 2 {
            tx.execute(sql, (&client_id, &client_id))
        } else {
            tx.execute(sql, [&client_id])
        };
        if let Err(e) = result {
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

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "clients.list" => Some(handle_clients_list(state, req)),
        "clients.create" => Some(handle_clients_create(state, req)),
        "clients.delete" => Some(handle_clients_delete(state, req)),
        _ => None,
    }
}
