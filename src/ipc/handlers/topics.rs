use super::units::{unit_exists, unit_visible_to_students};
use crate::ipc::error::{err, ok, write_err};
use crate::ipc::helpers::{
    bad_field, bool_to_i64, db_conn, now_ts, parse_bool, parse_opt_i64, parse_opt_string,
    parse_required_string_array, patch_obj, query_json, required_str,
};
use crate::ipc::types::{AppState, Caller, Request};
use crate::ordering::{self, Ordered};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

pub const TOPIC_COLUMNS: &str = "id, unit_id, name, description, sort_order, active,
     (SELECT COUNT(*) FROM exercises x WHERE x.topic_id = topics.id),
     (SELECT COUNT(*) FROM evaluations e WHERE e.topic_id = topics.id),
     (SELECT COUNT(*) FROM contents c WHERE c.topic_id = topics.id)";

pub fn topic_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let unit_id: String = row.get(1)?;
    let name: String = row.get(2)?;
    let description: String = row.get(3)?;
    let sort_order: i64 = row.get(4)?;
    let active: i64 = row.get(5)?;
    let exercise_count: i64 = row.get(6)?;
    let evaluation_count: i64 = row.get(7)?;
    let content_count: i64 = row.get(8)?;
    Ok(json!({
        "id": id,
        "unitId": unit_id,
        "name": name,
        "description": description,
        "sortOrder": sort_order,
        "active": active != 0,
        "exerciseCount": exercise_count,
        "evaluationCount": evaluation_count,
        "contentCount": content_count,
    }))
}

/// Unit id of `topic_id`, if the topic exists.
pub(super) fn topic_unit(conn: &Connection, topic_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT unit_id FROM topics WHERE id = ?", [topic_id], |r| {
        r.get(0)
    })
    .optional()
}

/// A topic is visible to students when it is active and its unit is
/// active and visible.
pub(super) fn topic_visible_to_students(conn: &Connection, topic_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM topics t JOIN units u ON u.id = t.unit_id
         WHERE t.id = ? AND t.active = 1 AND u.active = 1 AND u.visible = 1",
        [topic_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

/// Deletes the topics matched by `filter` (a condition on alias `t` with a
/// single `?`) together with everything that hangs off them.
pub(super) fn delete_topics_where(
    conn: &Connection,
    filter: &str,
    key: &str,
) -> Result<(), (&'static str, rusqlite::Error)> {
    let steps: [(&'static str, String); 6] = [
        (
            "evaluation_attempts",
            format!(
                "DELETE FROM evaluation_attempts WHERE evaluation_id IN (
                   SELECT e.id FROM evaluations e JOIN topics t ON t.id = e.topic_id WHERE {filter})"
            ),
        ),
        (
            "evaluations",
            format!("DELETE FROM evaluations WHERE topic_id IN (SELECT t.id FROM topics t WHERE {filter})"),
        ),
        (
            "exercise_progress",
            format!(
                "DELETE FROM exercise_progress WHERE exercise_id IN (
                   SELECT x.id FROM exercises x JOIN topics t ON t.id = x.topic_id WHERE {filter})"
            ),
        ),
        (
            "exercises",
            format!("DELETE FROM exercises WHERE topic_id IN (SELECT t.id FROM topics t WHERE {filter})"),
        ),
        (
            "contents",
            format!("DELETE FROM contents WHERE topic_id IN (SELECT t.id FROM topics t WHERE {filter})"),
        ),
        (
            "topics",
            format!("DELETE FROM topics WHERE id IN (SELECT t.id FROM topics t WHERE {filter})"),
        ),
    ];
    for (table, sql) in steps.iter() {
        conn.execute(sql, [key]).map_err(|e| (*table, e))?;
    }
    Ok(())
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

    let active_filter = if caller.is_student() { " AND active = 1" } else { "" };
    let sql = format!(
        "SELECT {} FROM topics WHERE unit_id = ?{} ORDER BY sort_order",
        TOPIC_COLUMNS, active_filter
    );
    match query_json(conn, &sql, [&unit_id], topic_to_json) {
        Ok(topics) => ok(&req.id, json!({ "topics": topics })),
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
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match parse_opt_string(req.params.get("description")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return bad_field(req, "description", m),
    };
    let active = match parse_bool(req.params.get("active"), true) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "active", m),
    };
    let position = match parse_opt_i64(req.params.get("position")) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "position", m),
    };
    match unit_exists(conn, &unit_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "unit not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let scope = Ordered::Topics { unit_id: &unit_id };
    let sort_order = match ordering::insert_slot(&tx, scope, position) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    let topic_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO topics(id, unit_id, name, description, sort_order, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &topic_id,
            &unit_id,
            &name,
            &description,
            sort_order,
            bool_to_i64(active),
            now_ts(),
        ),
    ) {
        return write_err(&req.id, "db_insert_failed", &e, "topics");
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "topicId": topic_id, "sortOrder": sort_order }),
    )
}

pub fn update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let topic_id = match required_str(req, "topicId") {
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
    if let Some(v) = patch.get("name") {
        let Some(name) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return bad_field(req, "patch.name", "must be a non-empty string");
        };
        sets.push("name = ?");
        bind.push(Value::Text(name.to_string()));
    }
    if patch.contains_key("description") {
        match parse_opt_string(patch.get("description")) {
            Ok(v) => {
                sets.push("description = ?");
                bind.push(Value::Text(v.unwrap_or_default()));
            }
            Err(m) => return bad_field(req, "patch.description", m),
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
    bind.push(Value::Text(topic_id));
    let sql = format!("UPDATE topics SET {} WHERE id = ?", sets.join(", "));
    match conn.execute(&sql, params_from_iter(bind)) {
        Ok(0) => err(&req.id, "not_found", "topic not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => write_err(&req.id, "db_update_failed", &e, "topics"),
    }
}

pub fn reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let unit_id = match required_str(req, "unitId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ids = match parse_required_string_array(req.params.get("topicIds"), "topicIds") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(m) = ordering::apply_order(&tx, Ordered::Topics { unit_id: &unit_id }, &ids) {
        let _ = tx.rollback();
        return err(&req.id, "bad_params", m, None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let topic_id = match required_str(req, "topicId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let unit_id = match topic_unit(conn, &topic_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "topic not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err((table, e)) = delete_topics_where(&tx, "t.id = ?", &topic_id) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": table })),
        );
    }
    if let Err(e) = ordering::renumber(&tx, Ordered::Topics { unit_id: &unit_id }) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    info!(topic_id = %topic_id, "topic deleted");
    ok(&req.id, json!({ "ok": true }))
}
