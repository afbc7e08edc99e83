use super::contents::content_to_json;
use super::topics::{delete_topics_where, topic_to_json, TOPIC_COLUMNS};
use crate::ipc::error::{err, ok, write_err};
use crate::ipc::helpers::{
    bad_field, bool_to_i64, db_conn, now_ts, parse_bool, parse_opt_i64, parse_opt_string,
    parse_required_string_array, parse_trimester, patch_obj, query_json, required_str,
};
use crate::ipc::types::{AppState, Caller, Request};
use crate::ordering::{self, Ordered};
use crate::slug::{unique_slug, SlugTable};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

const UNIT_COLUMNS: &str = "u.id, u.title, u.slug, u.description, u.sort_order, u.active, u.trimester, u.visible,
     (SELECT COUNT(*) FROM topics t WHERE t.unit_id = u.id) AS topic_count";

fn unit_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let title: String = row.get(1)?;
    let slug: String = row.get(2)?;
    let description: String = row.get(3)?;
    let sort_order: i64 = row.get(4)?;
    let active: i64 = row.get(5)?;
    let trimester: Option<i64> = row.get(6)?;
    let visible: i64 = row.get(7)?;
    let topic_count: i64 = row.get(8)?;
    Ok(json!({
        "id": id,
        "title": title,
        "slug": slug,
        "description": description,
        "sortOrder": sort_order,
        "active": active != 0,
        "trimester": trimester,
        "visible": visible != 0,
        "topicCount": topic_count,
    }))
}

/// Students only reach units that are both active and visible.
pub(super) fn unit_visible_to_students(conn: &Connection, unit_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM units WHERE id = ? AND active = 1 AND visible = 1",
        [unit_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

pub(super) fn unit_exists(conn: &Connection, unit_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM units WHERE id = ?", [unit_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

pub fn list(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let include_hidden = match parse_bool(req.params.get("includeInactive"), false) {
        Ok(v) => v && !caller.is_student(),
        Err(m) => return bad_field(req, "includeInactive", m),
    };
    let trimester = match parse_trimester(req.params.get("trimester")) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "trimester", m),
    };

    let mut sql = format!("SELECT {} FROM units u WHERE 1 = 1", UNIT_COLUMNS);
    let mut bind: Vec<Value> = Vec::new();
    if !include_hidden {
        sql.push_str(" AND u.active = 1");
        if caller.is_student() {
            sql.push_str(" AND u.visible = 1");
        }
    }
    if let Some(t) = trimester {
        sql.push_str(" AND u.trimester = ?");
        bind.push(Value::Integer(t));
    }
    sql.push_str(" ORDER BY u.sort_order");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(bind), unit_to_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(units) => ok(&req.id, json!({ "units": units })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn open(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match required_str(req, "unit") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let sql = format!(
        "SELECT {} FROM units u WHERE u.id = ?1 OR u.slug = ?1",
        UNIT_COLUMNS
    );
    let unit = match conn.query_row(&sql, [&key], unit_to_json).optional() {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "unit not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let unit_id = unit
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    if caller.is_student() {
        match unit_visible_to_students(conn, &unit_id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "unit not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    let active_filter = if caller.is_student() { " AND active = 1" } else { "" };

    let topics_sql = format!(
        "SELECT {} FROM topics WHERE unit_id = ?{} ORDER BY sort_order",
        TOPIC_COLUMNS, active_filter
    );
    let topics = match query_json(conn, &topics_sql, [&unit_id], topic_to_json) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let contents_sql = format!(
        "SELECT id, unit_id, topic_id, kind, title, body, active
         FROM contents WHERE unit_id = ? AND topic_id IS NULL{}
         ORDER BY created_at, rowid",
        active_filter
    );
    let general = match query_json(conn, &contents_sql, [&unit_id], content_to_json) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({ "unit": unit, "topics": topics, "generalContents": general }),
    )
}

pub fn create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match parse_opt_string(req.params.get("description")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return bad_field(req, "description", m),
    };
    let trimester = match parse_trimester(req.params.get("trimester")) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "trimester", m),
    };
    let visible = match parse_bool(req.params.get("visible"), true) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "visible", m),
    };
    let active = match parse_bool(req.params.get("active"), true) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "active", m),
    };
    let position = match parse_opt_i64(req.params.get("position")) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "position", m),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let slug = match unique_slug(&tx, SlugTable::Units, &title, None) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let sort_order = match ordering::insert_slot(&tx, Ordered::Units, position) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };

    let unit_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO units(id, title, slug, description, sort_order, active, trimester, visible, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &unit_id,
            &title,
            &slug,
            &description,
            sort_order,
            bool_to_i64(active),
            trimester,
            bool_to_i64(visible),
            now_ts(),
        ),
    ) {
        return write_err(&req.id, "db_insert_failed", &e, "units");
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    info!(unit = %slug, "unit created");
    ok(
        &req.id,
        json!({ "unitId": unit_id, "slug": slug, "sortOrder": sort_order }),
    )
}

pub fn update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let unit_id = match required_str(req, "unitId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match patch_obj(req, "patch") {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "bad_params", "missing patch", None),
        Err(e) => return e,
    };
    match unit_exists(conn, &unit_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "unit not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();
    let mut new_slug: Option<String> = None;

    if let Some(v) = patch.get("title") {
        let Some(title) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return bad_field(req, "patch.title", "must be a non-empty string");
        };
        let slug = match unique_slug(conn, SlugTable::Units, title, Some(&unit_id)) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        sets.push("title = ?");
        bind.push(Value::Text(title.to_string()));
        sets.push("slug = ?");
        bind.push(Value::Text(slug.clone()));
        new_slug = Some(slug);
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
    if patch.contains_key("trimester") {
        match parse_trimester(patch.get("trimester")) {
            Ok(v) => {
                sets.push("trimester = ?");
                bind.push(v.map(Value::Integer).unwrap_or(Value::Null));
            }
            Err(m) => return bad_field(req, "patch.trimester", m),
        }
    }
    for (key, column) in [("visible", "visible = ?"), ("active", "active = ?")] {
        if patch.contains_key(key) {
            match parse_bool(patch.get(key), true) {
                Ok(b) => {
                    sets.push(column);
                    bind.push(Value::Integer(bool_to_i64(b)));
                }
                Err(m) => return bad_field(req, &format!("patch.{}", key), m),
            }
        }
    }

    if sets.is_empty() {
        return ok(&req.id, json!({ "ok": true }));
    }
    sets.push("updated_at = ?");
    bind.push(Value::Text(now_ts()));
    bind.push(Value::Text(unit_id));
    let sql = format!("UPDATE units SET {} WHERE id = ?", sets.join(", "));
    if let Err(e) = conn.execute(&sql, params_from_iter(bind)) {
        return write_err(&req.id, "db_update_failed", &e, "units");
    }

    ok(&req.id, json!({ "ok": true, "slug": new_slug }))
}

pub fn reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let ids = match parse_required_string_array(req.params.get("unitIds"), "unitIds") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(m) = ordering::apply_order(&tx, Ordered::Units, &ids) {
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
    let unit_id = match required_str(req, "unitId") {
        Ok(v) => v,
        Err(e) => return e,
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
    // No ON DELETE CASCADE: children go first.
    if let Err((table, e)) = delete_topics_where(&tx, "t.unit_id = ?", &unit_id) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": table })),
        );
    }
    for (table, sql) in [
        ("contents", "DELETE FROM contents WHERE unit_id = ?"),
        ("units", "DELETE FROM units WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&unit_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    if let Err(e) = ordering::renumber(&tx, Ordered::Units) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    info!(unit_id = %unit_id, "unit deleted");
    ok(&req.id, json!({ "ok": true }))
}
