use super::topics::topic_unit;
use super::units::{unit_exists, unit_visible_to_students};
use crate::ipc::error::{err, ok, write_err};
use crate::ipc::helpers::{
    bad_field, bool_to_i64, db_conn, now_ts, parse_bool, parse_opt_string, patch_obj, query_json,
    required_str,
};
use crate::ipc::types::{AppState, Caller, Request};
use crate::model::ContentKind;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const CONTENT_COLUMNS: &str = "id, unit_id, topic_id, kind, title, body, active";

pub fn content_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let unit_id: String = row.get(1)?;
    let topic_id: Option<String> = row.get(2)?;
    let kind: String = row.get(3)?;
    let title: String = row.get(4)?;
    let body: String = row.get(5)?;
    let active: i64 = row.get(6)?;
    Ok(json!({
        "id": id,
        "unitId": unit_id,
        "topicId": topic_id,
        "kind": kind,
        "title": title,
        "body": body,
        "active": active != 0,
    }))
}

fn parse_kind(req: &Request, raw: Option<&serde_json::Value>) -> Result<ContentKind, serde_json::Value> {
    raw.and_then(|v| v.as_str())
        .and_then(ContentKind::parse)
        .ok_or_else(|| bad_field(req, "kind", "must be text, document, video, link or image"))
}

/// Checks that `topic_id` exists and belongs to `unit_id`.
fn check_topic_in_unit(
    conn: &Connection,
    req: &Request,
    unit_id: &str,
    topic_id: &str,
) -> Result<(), serde_json::Value> {
    match topic_unit(conn, topic_id) {
        Ok(Some(u)) if u == unit_id => Ok(()),
        Ok(_) => Err(err(&req.id, "not_found", "topic not found in unit", None)),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

pub fn list(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let unit_id = match required_str(req, "unitId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let topic_id = match parse_opt_string(req.params.get("topicId")) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "topicId", m),
    };
    let visible = if caller.is_student() {
        unit_visible_to_students(conn, &unit_id)
    } else {
        unit_exists(conn, &unit_id)
    };
    match visible {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "unit not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut sql = format!("SELECT {} FROM contents WHERE unit_id = ?", CONTENT_COLUMNS);
    let mut bind: Vec<Value> = vec![Value::Text(unit_id)];
    if let Some(t) = topic_id {
        sql.push_str(" AND topic_id = ?");
        bind.push(Value::Text(t));
    }
    if caller.is_student() {
        sql.push_str(
            " AND active = 1 AND (topic_id IS NULL OR topic_id IN (SELECT id FROM topics WHERE active = 1))",
        );
    }
    sql.push_str(" ORDER BY created_at, rowid");

    match query_json(conn, &sql, params_from_iter(bind), content_to_json) {
        Ok(contents) => ok(&req.id, json!({ "contents": contents })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let unit_id = match required_str(req, "unitId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let topic_id = match parse_opt_string(req.params.get("topicId")) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "topicId", m),
    };
    let kind = match parse_kind(req, req.params.get("kind")) {
        Ok(k) => k,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let body = req
        .params
        .get("body")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if let Err(m) = kind.validate_body(&body) {
        return err(&req.id, "bad_params", m, None);
    }
    let active = match parse_bool(req.params.get("active"), true) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "active", m),
    };

    match unit_exists(conn, &unit_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "unit not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    if let Some(t) = topic_id.as_deref() {
        if let Err(e) = check_topic_in_unit(conn, req, &unit_id, t) {
            return e;
        }
    }

    let content_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO contents(id, unit_id, topic_id, kind, title, body, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &content_id,
            &unit_id,
            &topic_id,
            kind.as_str(),
            &title,
            &body,
            bool_to_i64(active),
            now_ts(),
        ),
    ) {
        return write_err(&req.id, "db_insert_failed", &e, "contents");
    }
    ok(&req.id, json!({ "contentId": content_id }))
}

pub fn update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let content_id = match required_str(req, "contentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match patch_obj(req, "patch") {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "bad_params", "missing patch", None),
        Err(e) => return e,
    };

    let current: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT unit_id, kind, body FROM contents WHERE id = ?",
            [&content_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((unit_id, cur_kind, cur_body)) = current else {
        return err(&req.id, "not_found", "content not found", None);
    };

    let mut sets: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();

    let kind = if patch.contains_key("kind") {
        match parse_kind(req, patch.get("kind")) {
            Ok(k) => {
                sets.push("kind = ?");
                bind.push(Value::Text(k.as_str().to_string()));
                k
            }
            Err(e) => return e,
        }
    } else {
        ContentKind::parse(&cur_kind).unwrap_or(ContentKind::Text)
    };
    let body = match patch.get("body") {
        Some(v) => {
            let Some(b) = v.as_str() else {
                return bad_field(req, "patch.body", "must be a string");
            };
            sets.push("body = ?");
            bind.push(Value::Text(b.trim().to_string()));
            b.trim().to_string()
        }
        None => cur_body,
    };
    // A kind change must still fit the stored body.
    if let Err(m) = kind.validate_body(&body) {
        return err(&req.id, "bad_params", m, None);
    }

    if let Some(v) = patch.get("title") {
        let Some(title) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return bad_field(req, "patch.title", "must be a non-empty string");
        };
        sets.push("title = ?");
        bind.push(Value::Text(title.to_string()));
    }
    if patch.contains_key("topicId") {
        match parse_opt_string(patch.get("topicId")) {
            Ok(Some(t)) => {
                if let Err(e) = check_topic_in_unit(conn, req, &unit_id, &t) {
                    return e;
                }
                sets.push("topic_id = ?");
                bind.push(Value::Text(t));
            }
            Ok(None) => {
                sets.push("topic_id = ?");
                bind.push(Value::Null);
            }
            Err(m) => return bad_field(req, "patch.topicId", m),
        }
    }
    if patch.contains_key("active") {
        match parse_bool(patch.get("active"), true) {
            Ok(b) => {
                sets.push("active = ?");
                bind.push(Value::Integer(bool_to_i64(b)));
            }
            Err(m) => return bad_field(req, "patch.active", m),
        }
    }
    if sets.is_empty() {
        return ok(&req.id, json!({ "ok": true }));
    }

    sets.push("updated_at = ?");
    bind.push(Value::Text(now_ts()));
    bind.push(Value::Text(content_id));
    let sql = format!("UPDATE contents SET {} WHERE id = ?", sets.join(", "));
    match conn.execute(&sql, params_from_iter(bind)) {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => write_err(&req.id, "db_update_failed", &e, "contents"),
    }
}

pub fn delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let content_id = match required_str(req, "contentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM contents WHERE id = ?", [&content_id]) {
        Ok(0) => err(&req.id, "not_found", "content not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "contents" })),
        ),
    }
}
