use crate::ipc::error::{err, ok, write_err};
use crate::ipc::helpers::{
    bad_field, bool_to_i64, db_conn, now_ts, parse_bool, parse_opt_string, patch_obj, required_str,
};
use crate::ipc::types::{AppState, Caller, Request};
use crate::model::Role;
use crate::session::{hash_password, MIN_PASSWORD_LEN};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

pub const USER_COLUMNS: &str = "id, username, full_name, role, section, active";

pub fn user_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let username: String = row.get(1)?;
    let full_name: String = row.get(2)?;
    let role: String = row.get(3)?;
    let section: Option<String> = row.get(4)?;
    let active: i64 = row.get(5)?;
    Ok(json!({
        "id": id,
        "username": username,
        "fullName": full_name,
        "role": role,
        "section": section,
        "active": active != 0,
    }))
}

fn parse_role(req: &Request, v: Option<&serde_json::Value>) -> Result<Option<Role>, serde_json::Value> {
    match v.and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(raw) => Role::parse(raw).map(Some).ok_or_else(|| {
            bad_field(req, "role", "must be Usuario, Docente or Administrador")
        }),
    }
}

fn check_password(req: &Request, password: &str) -> Result<(), serde_json::Value> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(err(
            &req.id,
            "bad_params",
            format!("password must have at least {} characters", MIN_PASSWORD_LEN),
            None,
        ));
    }
    Ok(())
}

pub fn list(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut role = match parse_role(req, req.params.get("role")) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let section = match parse_opt_string(req.params.get("section")) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "section", m),
    };

    // Teachers only see the student roster.
    if caller.role == Role::Teacher {
        if role.is_some_and(|r| r != Role::Student) {
            return err(&req.id, "forbidden", "Docente may only list students", None);
        }
        role = Some(Role::Student);
    }

    let mut sql = format!("SELECT {} FROM users WHERE 1 = 1", USER_COLUMNS);
    let mut bind: Vec<Value> = Vec::new();
    if let Some(r) = role {
        sql.push_str(" AND role = ?");
        bind.push(Value::Text(r.as_str().to_string()));
    }
    if let Some(s) = section {
        sql.push_str(" AND section = ?");
        bind.push(Value::Text(s));
    }
    sql.push_str(" ORDER BY role, full_name, username");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(bind), user_to_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match parse_role(req, req.params.get("role")) {
        Ok(Some(r)) => r,
        Ok(None) => return err(&req.id, "bad_params", "missing role", None),
        Err(e) => return e,
    };
    let section = match parse_opt_string(req.params.get("section")) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "section", m),
    };
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if let Err(e) = check_password(req, password) {
        return e;
    }
    let hash = match hash_password(password) {
        Ok(h) => h,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, username, full_name, role, section, active, password_hash, created_at)
         VALUES(?, ?, ?, ?, ?, 1, ?, ?)",
        (
            &user_id,
            &username,
            &full_name,
            role.as_str(),
            &section,
            &hash,
            now_ts(),
        ),
    ) {
        return write_err(&req.id, "db_insert_failed", &e, "users");
    }

    info!(user = %username, role = role.as_str(), "user created");
    ok(&req.id, json!({ "userId": user_id }))
}

pub fn update(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match patch_obj(req, "patch") {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "bad_params", "missing patch", None),
        Err(e) => return e,
    };

    let mut sets: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();
    let mut revoke_sessions = false;

    if let Some(v) = patch.get("fullName") {
        match v.as_str().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => {
                sets.push("full_name = ?");
                bind.push(Value::Text(s.to_string()));
            }
            None => return bad_field(req, "patch.fullName", "must be a non-empty string"),
        }
    }
    if patch.contains_key("section") {
        match parse_opt_string(patch.get("section")) {
            Ok(s) => {
                sets.push("section = ?");
                bind.push(s.map(Value::Text).unwrap_or(Value::Null));
            }
            Err(m) => return bad_field(req, "patch.section", m),
        }
    }
    if patch.contains_key("role") {
        let role = match parse_role(req, patch.get("role")) {
            Ok(Some(r)) => r,
            Ok(None) => return bad_field(req, "patch.role", "must be a string"),
            Err(e) => return e,
        };
        if user_id == caller.user_id && role != Role::Admin {
            return err(&req.id, "bad_params", "cannot demote your own account", None);
        }
        sets.push("role = ?");
        bind.push(Value::Text(role.as_str().to_string()));
        revoke_sessions = true;
    }
    if patch.contains_key("active") {
        let active = match parse_bool(patch.get("active"), true) {
            Ok(b) => b,
            Err(m) => return bad_field(req, "patch.active", m),
        };
        if user_id == caller.user_id && !active {
            return err(&req.id, "bad_params", "cannot deactivate your own account", None);
        }
        sets.push("active = ?");
        bind.push(Value::Integer(bool_to_i64(active)));
        revoke_sessions |= !active;
    }
    if let Some(v) = patch.get("password") {
        let Some(pw) = v.as_str() else {
            return bad_field(req, "patch.password", "must be a string");
        };
        if let Err(e) = check_password(req, pw) {
            return e;
        }
        match hash_password(pw) {
            Ok(h) => {
                sets.push("password_hash = ?");
                bind.push(Value::Text(h));
            }
            Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
        }
        revoke_sessions |= user_id != caller.user_id;
    }

    if sets.is_empty() {
        return ok(&req.id, json!({ "ok": true }));
    }

    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    sets.push("updated_at = ?");
    bind.push(Value::Text(now_ts()));
    let sql = format!("UPDATE users SET {} WHERE id = ?", sets.join(", "));
    bind.push(Value::Text(user_id.clone()));

    match conn.execute(&sql, params_from_iter(bind)) {
        Ok(0) => return err(&req.id, "not_found", "user not found", None),
        Ok(_) => {}
        Err(e) => return write_err(&req.id, "db_update_failed", &e, "users"),
    }

    if revoke_sessions {
        let n = state.sessions.close_user(&user_id);
        info!(user_id = %user_id, sessions = n, "sessions revoked after account change");
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn delete(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if user_id == caller.user_id {
        return err(&req.id, "bad_params", "cannot delete your own account", None);
    }
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "user not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for table in ["evaluation_attempts", "exercise_progress"] {
        let sql = format!("DELETE FROM {} WHERE user_id = ?", table);
        if let Err(e) = tx.execute(&sql, [&user_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = tx.execute("DELETE FROM users WHERE id = ?", [&user_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    state.sessions.close_user(&user_id);
    info!(user_id = %user_id, "user deleted");
    ok(&req.id, json!({ "ok": true }))
}
