use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{client_exists, db_conn, optional_str, required_str, user_exists};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn user_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "clientId": r.get::<_, String>(1)?,
        "idn": r.get::<_, i64>(2)?,
        "username": r.get::<_, String>(3)?,
        "firstName": r.get::<_, String>(4)?,
        "lastName": r.get::<_, String>(5)?,
        "email": r.get::<_, Option<String>>(6)?,
        "phone": r.get::<_, Option<String>>(7)?,
        "isAdmin": r.get::<_, i64>(8)? != 0,
        "isInstructor": r.get::<_, i64>(9)? != 0,
        "isStudent": r.get::<_, i64>(10)? != 0,
        "credits": r.get::<_, Option<f64>>(11)?,
        "price": r.get::<_, Option<f64>>(12)?,
    }))
}

const USER_COLUMNS: &str = "id, client_id, idn, username, first_name, last_name, email, phone,
         is_admin, is_instructor, is_student, credits, price";

fn username_taken(conn: &Connection, username: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM users WHERE lower(username) = ?",
        [username],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

fn next_idn(conn: &Connection, client_id: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COALESCE(MAX(idn), 0) + 1 FROM users WHERE client_id = ?",
        [client_id],
        |r| r.get(0),
    )
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let client_id = match required_str(req, "clientId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let sql = format!(
        "SELECT {} FROM users WHERE client_id = ? ORDER BY idn",
        USER_COLUMNS
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&client_id], |r| user_row_json(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let client_id = match required_str(req, "clientId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v.to_lowercase(),
        Err(resp) => return resp,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = optional_str(req, "email");
    let phone = optional_str(req, "phone");
    let is_admin = req
        .params
        .get("isAdmin")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let is_instructor = req
        .params
        .get("isInstructor")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    // Role defaults to student unless the caller says otherwise.
    let is_student = req
        .params
        .get("isStudent")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    match client_exists(conn, &client_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "client not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Usernames are unique across all tenants, checked case-insensitively.
    match username_taken(conn, &username) {
        Ok(false) => {}
        Ok(true) => {
            return err(
                &req.id,
                "username_taken",
                "username already exists",
                Some(json!({ "username": username })),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let idn = match next_idn(conn, &client_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let user_id = Uuid::new_v4().to_string();
    let created_at = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, client_id, idn, username, first_name, last_name, email, phone,
                           is_admin, is_instructor, is_student, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            &client_id,
            idn,
            &username,
            &first_name,
            &last_name,
            email.as_deref(),
            phone.as_deref(),
            is_admin as i64,
            is_instructor as i64,
            is_student as i64,
            &created_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(
        &req.id,
        json!({ "userId": user_id, "idn": idn, "username": username }),
    )
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    match user_exists(conn, &user_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "user not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Partial-field update: only the keys present in the patch are written.
    let mut sets: Vec<&'static str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    let text_fields: &[(&str, &str)] = &[
        ("firstName", "first_name = ?"),
        ("lastName", "last_name = ?"),
        ("email", "email = ?"),
        ("phone", "phone = ?"),
    ];
    for (key, set) in text_fields {
        if let Some(v) = patch.get(*key) {
            if let Some(s) = v.as_str() {
                sets.push(set);
                values.push(rusqlite::types::Value::Text(s.trim().to_string()));
            } else if v.is_null() {
                sets.push(set);
                values.push(rusqlite::types::Value::Null);
            } else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be string or null", key),
                    None,
                );
            }
        }
    }
    let flag_fields: &[(&str, &str)] = &[
        ("isAdmin", "is_admin = ?"),
        ("isInstructor", "is_instructor = ?"),
        ("isStudent", "is_student = ?"),
    ];
    for (key, set) in flag_fields {
        if let Some(v) = patch.get(*key) {
            let Some(b) = v.as_bool() else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be boolean", key),
                    None,
                );
            };
            sets.push(set);
            values.push(rusqlite::types::Value::Integer(b as i64));
        }
    }
    let money_fields: &[(&str, &str)] = &[("credits", "credits = ?"), ("price", "price = ?")];
    for (key, set) in money_fields {
        if let Some(v) = patch.get(*key) {
            if let Some(n) = v.as_f64() {
                sets.push(set);
                values.push(rusqlite::types::Value::Real(n));
            } else if v.is_null() {
                sets.push(set);
                values.push(rusqlite::types::Value::Null);
            } else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be number or null", key),
                    None,
                );
            }
        }
    }

    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no updatable fields", None);
    }

    let sql = format!("UPDATE users SET {} WHERE id = ?", sets.join(", "));
    values.push(rusqlite::types::Value::Text(user_id.clone()));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
    match conn.query_row(&sql, [&user_id], |r| user_row_json(r)) {
        Ok(user) => ok(&req.id, json!({ "user": user })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let steps: &[(&str, &str)] = &[
        ("attendance", "DELETE FROM attendance WHERE user_id = ?"),
        ("grades", "DELETE FROM grades WHERE user_id = ?"),
        (
            "registrations",
            "DELETE FROM registrations WHERE user_id = ?",
        ),
        ("users", "DELETE FROM users WHERE id = ?"),
    ];
    for (table, sql) in steps {
        if let Err(e) = tx.execute(sql, [&user_id]) {
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
        "users.list" => Some(handle_users_list(state, req)),
        "users.create" => Some(handle_users_create(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        _ => None,
    }
}
