use super::users::{user_to_json, USER_COLUMNS};
use crate::db;
use crate::ipc::error::{err, ok, write_err};
use crate::ipc::helpers::{db_conn, now_ts, required_str};
use crate::ipc::types::{AppState, Caller, Request};
use crate::model::Role;
use crate::session::{hash_password, verify_password, MIN_PASSWORD_LEN};
use rusqlite::OptionalExtension;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

pub fn bootstrap_admin(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match db::count_users(conn) {
        Ok(0) => {}
        Ok(_) => {
            return err(
                &req.id,
                "already_initialized",
                "users already exist; sign in as an administrator",
                None,
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if password.chars().count() < MIN_PASSWORD_LEN {
        return err(
            &req.id,
            "bad_params",
            format!("password must have at least {} characters", MIN_PASSWORD_LEN),
            None,
        );
    }
    let hash = match hash_password(password) {
        Ok(h) => h,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, username, full_name, role, section, active, password_hash, created_at)
         VALUES(?, ?, ?, ?, NULL, 1, ?, ?)",
        (
            &user_id,
            &username,
            &full_name,
            Role::Admin.as_str(),
            &hash,
            now_ts(),
        ),
    ) {
        return write_err(&req.id, "db_insert_failed", &e, "users");
    }

    info!(user = %username, "bootstrap administrator created");
    ok(&req.id, json!({ "userId": user_id }))
}

pub fn login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let sql = format!("SELECT {}, password_hash FROM users WHERE username = ?", USER_COLUMNS);
    let found = conn
        .query_row(&sql, [&username], |r| {
            let user = user_to_json(r)?;
            let hash: String = r.get(6)?;
            Ok((user, hash))
        })
        .optional();
    let (user, hash) = match found {
        Ok(Some(v)) => v,
        Ok(None) => {
            warn!(user = %username, "login rejected: unknown user");
            return invalid_credentials(req);
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let active = user.get("active").and_then(|v| v.as_bool()).unwrap_or(false);
    if !active || !verify_password(password, &hash) {
        warn!(user = %username, "login rejected");
        return invalid_credentials(req);
    }

    let role = user
        .get("role")
        .and_then(|v| v.as_str())
        .and_then(Role::parse);
    let Some(role) = role else {
        return err(&req.id, "db_query_failed", "stored role is invalid", None);
    };
    let user_id = user
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let section = user
        .get("section")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let session = state
        .sessions
        .open(&user_id, &username, role, section, chrono::Utc::now());
    info!(user = %username, role = role.as_str(), "signed in");

    ok(
        &req.id,
        json!({
            "sessionToken": session.token,
            "csrfToken": session.csrf_token,
            "expiresAt": session.expires_at.to_rfc3339(),
            "user": user,
        }),
    )
}

fn invalid_credentials(req: &Request) -> serde_json::Value {
    err(
        &req.id,
        "invalid_credentials",
        "wrong username or password",
        None,
    )
}

pub fn logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let token = req.session.as_deref().unwrap_or("").trim();
    let closed = state.sessions.close(token);
    ok(&req.id, json!({ "closed": closed }))
}

pub fn whoami(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
    match conn
        .query_row(&sql, [&caller.user_id], user_to_json)
        .optional()
    {
        Ok(Some(user)) => ok(&req.id, json!({ "user": user })),
        Ok(None) => err(&req.id, "not_found", "user not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}
