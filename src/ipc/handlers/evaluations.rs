use super::topics::{topic_unit, topic_visible_to_students};
use crate::attempts::{self, AttemptState};
use crate::ipc::error::{err, ok, write_err};
use crate::ipc::helpers::{
    bad_field, bool_to_i64, db_conn, now_ts, parse_bool, parse_opt_string, patch_obj, query_json,
    required_code, required_str,
};
use crate::ipc::types::{AppState, Caller, Request};
use crate::model::Role;
use crate::rubric::{self, Rubric};
use crate::slug::{unique_slug, SlugTable};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

const EVALUATION_COLUMNS: &str =
    "id, topic_id, title, slug, instructions, example, expected_code, rubric_json, active";

fn evaluation_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let topic_id: String = row.get(1)?;
    let title: String = row.get(2)?;
    let slug: String = row.get(3)?;
    let instructions: String = row.get(4)?;
    let example: Option<String> = row.get(5)?;
    let expected_code: String = row.get(6)?;
    let rubric_json: String = row.get(7)?;
    let active: i64 = row.get(8)?;
    let rubric = serde_json::from_str::<serde_json::Value>(&rubric_json).unwrap_or(json!([]));
    Ok(json!({
        "id": id,
        "topicId": topic_id,
        "title": title,
        "slug": slug,
        "instructions": instructions,
        "example": example,
        "expectedCode": expected_code,
        "rubric": rubric,
        "active": active != 0,
    }))
}

/// Students see the task, never the expected code or its rubric.
fn redact_for(caller: &Caller, mut v: serde_json::Value) -> serde_json::Value {
    if caller.is_student() {
        if let Some(obj) = v.as_object_mut() {
            obj.remove("expectedCode");
            obj.remove("rubric");
        }
    }
    v
}

struct EvaluationRow {
    id: String,
    topic_id: String,
    slug: String,
    active: bool,
    rubric_json: String,
}

fn load_evaluation(conn: &Connection, key: &str) -> rusqlite::Result<Option<EvaluationRow>> {
    conn.query_row(
        "SELECT id, topic_id, slug, active, rubric_json
         FROM evaluations WHERE id = ?1 OR slug = ?1",
        [key],
        |r| {
            Ok(EvaluationRow {
                id: r.get(0)?,
                topic_id: r.get(1)?,
                slug: r.get(2)?,
                active: r.get::<_, i64>(3)? != 0,
                rubric_json: r.get(4)?,
            })
        },
    )
    .optional()
}

fn reachable_evaluation(
    conn: &Connection,
    req: &Request,
    caller: Option<&Caller>,
    key: &str,
) -> Result<EvaluationRow, serde_json::Value> {
    let row = match load_evaluation(conn, key) {
        Ok(Some(r)) => r,
        Ok(None) => return Err(err(&req.id, "not_found", "evaluation not found", None)),
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    if caller.is_some_and(Caller::is_student) {
        let visible = match topic_visible_to_students(conn, &row.topic_id) {
            Ok(v) => v,
            Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
        };
        if !row.active || !visible {
            return Err(err(&req.id, "not_found", "evaluation not found", None));
        }
    }
    Ok(row)
}

fn evaluation_key(req: &Request) -> Result<String, serde_json::Value> {
    required_str(req, "evaluation")
}

pub fn list(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let topic_id = match required_str(req, "topicId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let visible = if caller.is_student() {
        topic_visible_to_students(conn, &topic_id)
    } else {
        topic_unit(conn, &topic_id).map(|u| u.is_some())
    };
    match visible {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "topic not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let active_filter = if caller.is_student() { " AND active = 1" } else { "" };
    let sql = format!(
        "SELECT {} FROM evaluations WHERE topic_id = ?{} ORDER BY created_at, rowid",
        EVALUATION_COLUMNS, active_filter
    );
    let rows = match query_json(conn, &sql, [&topic_id], evaluation_to_json) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut evaluations = Vec::with_capacity(rows.len());
    for mut v in rows {
        let id = v.get("id").and_then(|x| x.as_str()).unwrap_or_default().to_string();
        let attempt = match attempts::load_state(conn, &id, &caller.user_id) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        v["attempt"] = attempt.to_json();
        evaluations.push(redact_for(caller, v));
    }
    ok(&req.id, json!({ "evaluations": evaluations }))
}

pub fn open(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match evaluation_key(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let row = match reachable_evaluation(conn, req, Some(caller), &key) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let sql = format!("SELECT {} FROM evaluations WHERE id = ?", EVALUATION_COLUMNS);
    let evaluation = match conn.query_row(&sql, [&row.id], evaluation_to_json) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let attempt = match attempts::load_state(conn, &row.id, &caller.user_id) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let details = if attempt.attempt_used() {
        match attempts::load_details(conn, &row.id, &caller.user_id) {
            Ok(d) => d,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    } else {
        None
    };

    ok(
        &req.id,
        json!({
            "evaluation": redact_for(caller, evaluation),
            "attempt": attempt.to_json(),
            "details": details,
        }),
    )
}

pub fn create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let topic_id = match required_str(req, "topicId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let expected_code = match required_code(req, "expectedCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let instructions = match parse_opt_string(req.params.get("instructions")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return bad_field(req, "instructions", m),
    };
    let example = match parse_opt_string(req.params.get("example")) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "example", m),
    };
    let active = match parse_bool(req.params.get("active"), true) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "active", m),
    };
    match topic_unit(conn, &topic_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "topic not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let rubric = rubric::generate_rubric(&expected_code);
    let slug = match unique_slug(conn, SlugTable::Evaluations, &title, None) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let evaluation_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO evaluations(id, topic_id, title, slug, instructions, example, expected_code,
                                 rubric_json, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &evaluation_id,
            &topic_id,
            &title,
            &slug,
            &instructions,
            &example,
            &expected_code,
            rubric.to_json(),
            bool_to_i64(active),
            now_ts(),
        ),
    ) {
        return write_err(&req.id, "db_insert_failed", &e, "evaluations");
    }

    info!(
        evaluation = %slug,
        criteria = rubric.criteria.len(),
        total = rubric.total(),
        "evaluation created"
    );
    ok(
        &req.id,
        json!({
            "evaluationId": evaluation_id,
            "slug": slug,
            "rubric": rubric,
            "total": rubric.total(),
        }),
    )
}

pub fn update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match evaluation_key(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let fields = match patch_obj(req, "fields") {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "bad_params", "missing fields", None),
        Err(e) => return e,
    };
    let row = match reachable_evaluation(conn, req, None, &key) {
        Ok(r) => r,
        Err(e) => return e,
    };

    let mut sets: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();
    let mut new_slug: Option<String> = None;
    let mut new_rubric: Option<Rubric> = None;

    if let Some(v) = fields.get("title") {
        let Some(title) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return bad_field(req, "fields.title", "must be a non-empty string");
        };
        let slug = match unique_slug(conn, SlugTable::Evaluations, title, Some(&row.id)) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        sets.push("title = ?");
        bind.push(Value::Text(title.to_string()));
        sets.push("slug = ?");
        bind.push(Value::Text(slug.clone()));
        new_slug = Some(slug);
    }
    if fields.contains_key("instructions") {
        match parse_opt_string(fields.get("instructions")) {
            Ok(v) => {
                sets.push("instructions = ?");
                bind.push(Value::Text(v.unwrap_or_default()));
            }
            Err(m) => return bad_field(req, "fields.instructions", m),
        }
    }
    if fields.contains_key("example") {
        match parse_opt_string(fields.get("example")) {
            Ok(v) => {
                sets.push("example = ?");
                bind.push(v.map(Value::Text).unwrap_or(Value::Null));
            }
            Err(m) => return bad_field(req, "fields.example", m),
        }
    }
    if let Some(v) = fields.get("expectedCode") {
        let Some(code) = v.as_str().filter(|s| !s.trim().is_empty()) else {
            return bad_field(req, "fields.expectedCode", "must not be empty");
        };
        let rubric = rubric::generate_rubric(code);
        sets.push("expected_code = ?");
        bind.push(Value::Text(code.to_string()));
        sets.push("rubric_json = ?");
        bind.push(Value::Text(rubric.to_json()));
        new_rubric = Some(rubric);
    }
    if fields.contains_key("active") {
        match parse_bool(fields.get("active"), true) {
            Ok(b) => {
                sets.push("active = ?");
                bind.push(Value::Integer(bool_to_i64(b)));
            }
            Err(m) => return bad_field(req, "fields.active", m),
        }
    }
    if sets.is_empty() {
        return ok(&req.id, json!({ "ok": true }));
    }

    sets.push("updated_at = ?");
    bind.push(Value::Text(now_ts()));
    bind.push(Value::Text(row.id.clone()));
    let sql = format!("UPDATE evaluations SET {} WHERE id = ?", sets.join(", "));
    if let Err(e) = conn.execute(&sql, params_from_iter(bind)) {
        return write_err(&req.id, "db_update_failed", &e, "evaluations");
    }

    if new_rubric.is_some() {
        info!(evaluation = %row.slug, "rubric regenerated");
    }
    ok(
        &req.id,
        json!({ "ok": true, "slug": new_slug, "rubric": new_rubric }),
    )
}

pub fn delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match evaluation_key(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let row = match reachable_evaluation(conn, req, None, &key) {
        Ok(r) => r,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for (table, sql) in [
        (
            "evaluation_attempts",
            "DELETE FROM evaluation_attempts WHERE evaluation_id = ?",
        ),
        ("evaluations", "DELETE FROM evaluations WHERE id = ?"),
    ] {
        if let Err(e) = tx.execute(sql, [&row.id]) {
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
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    info!(evaluation = %row.slug, "evaluation deleted");
    ok(&req.id, json!({ "ok": true }))
}

/// Rubric a given expected-code sample would produce, optionally graded
/// against a trial submission. Nothing is stored.
pub fn preview_rubric(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let expected_code = match required_code(req, "expectedCode") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let rubric = rubric::generate_rubric(&expected_code);
    let trial = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(code) if !code.trim().is_empty() => match rubric::grade(&rubric, code) {
            Ok(r) => Some(r),
            Err(e) => return err(&req.id, &e.code, e.message, None),
        },
        _ => None,
    };
    ok(
        &req.id,
        json!({
            "rubric": rubric,
            "total": rubric.total(),
            "fallback": rubric.is_fallback(),
            "trial": trial,
        }),
    )
}

pub fn submit(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let code = match required_code(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match evaluation_key(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let row = match reachable_evaluation(conn, req, Some(caller), &key) {
        Ok(r) => r,
        Err(e) => return e,
    };

    let rubric = match Rubric::from_json(&row.rubric_json) {
        Ok(r) => r,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let report = match rubric::grade(&rubric, &code) {
        Ok(r) => r,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };

    match attempts::record_submission(conn, &row.id, &caller.user_id, &code, &report, &now_ts()) {
        Ok(AttemptState::Completed { submitted_at, .. }) => {
            info!(
                evaluation = %row.slug,
                user_id = %caller.user_id,
                section = caller.section.as_deref().unwrap_or("-"),
                score = report.score,
                max = report.max,
                "evaluation submitted"
            );
            ok(
                &req.id,
                json!({
                    "score": report.score,
                    "max": report.max,
                    "details": report.details,
                    "submittedAt": submitted_at,
                }),
            )
        }
        Ok(AttemptState::NotStarted) => err(&req.id, "db_update_failed", "attempt was not recorded", None),
        Err(e) => {
            if e.code == "attempt_used" {
                warn!(
                    evaluation = %row.slug,
                    user_id = %caller.user_id,
                    "submit rejected: attempt already used"
                );
            }
            err(&req.id, &e.code, e.message, None)
        }
    }
}

pub fn reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match evaluation_key(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let row = match reachable_evaluation(conn, req, None, &key) {
        Ok(r) => r,
        Err(e) => return e,
    };

    match attempts::reset(conn, &row.id, &user_id) {
        Ok(()) => {
            info!(evaluation = %row.slug, user_id = %user_id, "attempt reset");
            ok(&req.id, json!({ "attempt": AttemptState::NotStarted.to_json() }))
        }
        Err(e) => err(&req.id, &e.code, e.message, None),
    }
}

fn result_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let user_id: String = row.get(0)?;
    let username: String = row.get(1)?;
    let full_name: String = row.get(2)?;
    let section: Option<String> = row.get(3)?;
    let used: Option<i64> = row.get(4)?;
    let score: Option<i64> = row.get(5)?;
    let max: Option<i64> = row.get(6)?;
    let submitted_at: Option<String> = row.get(7)?;
    let reset_count: Option<i64> = row.get(8)?;
    Ok(json!({
        "userId": user_id,
        "username": username,
        "fullName": full_name,
        "section": section,
        "attemptUsed": used.unwrap_or(0) != 0,
        "score": score,
        "max": max,
        "submittedAt": submitted_at,
        "resetCount": reset_count.unwrap_or(0),
    }))
}

/// Per-student attempt summary of one evaluation.
pub fn results(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match evaluation_key(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section = match parse_opt_string(req.params.get("section")) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "section", m),
    };
    let row = match reachable_evaluation(conn, req, None, &key) {
        Ok(r) => r,
        Err(e) => return e,
    };

    let mut sql = String::from(
        "SELECT u.id, u.username, u.full_name, u.section,
                a.attempt_used, a.score, a.max_score, a.submitted_at, a.reset_count
         FROM users u
         LEFT JOIN evaluation_attempts a ON a.user_id = u.id AND a.evaluation_id = ?
         WHERE u.role = ? AND u.active = 1",
    );
    let mut bind: Vec<Value> = vec![
        Value::Text(row.id.clone()),
        Value::Text(Role::Student.as_str().to_string()),
    ];
    if let Some(s) = section {
        sql.push_str(" AND u.section = ?");
        bind.push(Value::Text(s));
    }
    sql.push_str(" ORDER BY u.section, u.full_name, u.username");

    let students = match query_json(conn, &sql, params_from_iter(bind), result_row_to_json) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let submitted = students
        .iter()
        .filter(|s| s.get("attemptUsed").and_then(|v| v.as_bool()) == Some(true))
        .count();

    ok(
        &req.id,
        json!({
            "evaluationId": row.id,
            "students": students,
            "submitted": submitted,
        }),
    )
}
