use super::topics::{topic_unit, topic_visible_to_students};
use crate::ipc::error::{err, ok, write_err};
use crate::ipc::helpers::{
    bad_field, bool_to_i64, db_conn, now_ts, parse_bool, parse_opt_string, patch_obj, query_json,
    required_code, required_str,
};
use crate::ipc::types::{AppState, Caller, Request};
use crate::rubric::{self, Rubric};
use crate::slug::{unique_slug, SlugTable};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

// The progress join binds the caller's user id as the first parameter.
const EXERCISE_SELECT: &str = "SELECT x.id, x.topic_id, x.title, x.slug, x.instructions, x.example,
            x.expected_output, x.solution, x.active,
            COALESCE(p.completed, 0), p.completed_at
     FROM exercises x
     LEFT JOIN exercise_progress p ON p.exercise_id = x.id AND p.user_id = ?";

fn exercise_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let topic_id: String = row.get(1)?;
    let title: String = row.get(2)?;
    let slug: String = row.get(3)?;
    let instructions: String = row.get(4)?;
    let example: Option<String> = row.get(5)?;
    let expected_output: Option<String> = row.get(6)?;
    let solution: Option<String> = row.get(7)?;
    let active: i64 = row.get(8)?;
    let completed: i64 = row.get(9)?;
    let completed_at: Option<String> = row.get(10)?;
    Ok(json!({
        "id": id,
        "topicId": topic_id,
        "title": title,
        "slug": slug,
        "instructions": instructions,
        "example": example,
        "expectedOutput": expected_output,
        "solution": solution,
        "active": active != 0,
        "completed": completed != 0,
        "completedAt": completed_at,
    }))
}

/// Students never receive the reference solution.
fn redact_for(caller: &Caller, mut v: serde_json::Value) -> serde_json::Value {
    if caller.is_student() {
        if let Some(obj) = v.as_object_mut() {
            obj.remove("solution");
        }
    }
    v
}

struct ExerciseRow {
    id: String,
    topic_id: String,
    active: bool,
    expected_output: Option<String>,
    solution: Option<String>,
}

fn load_exercise(conn: &Connection, key: &str) -> rusqlite::Result<Option<ExerciseRow>> {
    conn.query_row(
        "SELECT id, topic_id, active, expected_output, solution
         FROM exercises WHERE id = ?1 OR slug = ?1",
        [key],
        |r| {
            Ok(ExerciseRow {
                id: r.get(0)?,
                topic_id: r.get(1)?,
                active: r.get::<_, i64>(2)? != 0,
                expected_output: r.get(3)?,
                solution: r.get(4)?,
            })
        },
    )
    .optional()
}

/// Loads an exercise the caller may reach; hidden ones read as missing.
fn reachable_exercise(
    conn: &Connection,
    req: &Request,
    caller: &Caller,
    key: &str,
) -> Result<ExerciseRow, serde_json::Value> {
    let row = match load_exercise(conn, key) {
        Ok(Some(r)) => r,
        Ok(None) => return Err(err(&req.id, "not_found", "exercise not found", None)),
        Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    };
    if caller.is_student() {
        let visible = match topic_visible_to_students(conn, &row.topic_id) {
            Ok(v) => v,
            Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
        };
        if !row.active || !visible {
            return Err(err(&req.id, "not_found", "exercise not found", None));
        }
    }
    Ok(row)
}

fn mark_completed(conn: &Connection, exercise_id: &str, user_id: &str) -> rusqlite::Result<String> {
    let now = now_ts();
    conn.execute(
        "INSERT INTO exercise_progress(exercise_id, user_id, completed, completed_at)
         VALUES(?, ?, 1, ?)
         ON CONFLICT(exercise_id, user_id) DO UPDATE SET
           completed = 1,
           completed_at = COALESCE(exercise_progress.completed_at, excluded.completed_at)",
        (exercise_id, user_id, &now),
    )?;
    Ok(now)
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

    let active_filter = if caller.is_student() { " AND x.active = 1" } else { "" };
    let sql = format!(
        "{} WHERE x.topic_id = ?{} ORDER BY x.created_at, x.rowid",
        EXERCISE_SELECT, active_filter
    );
    match query_json(conn, &sql, [&caller.user_id, &topic_id], exercise_to_json) {
        Ok(rows) => {
            let exercises: Vec<_> = rows.into_iter().map(|v| redact_for(caller, v)).collect();
            ok(&req.id, json!({ "exercises": exercises }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn open(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match required_str(req, "exercise") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let row = match reachable_exercise(conn, req, caller, &key) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let sql = format!("{} WHERE x.id = ?", EXERCISE_SELECT);
    match conn
        .query_row(&sql, [&caller.user_id, &row.id], exercise_to_json)
        .optional()
    {
        Ok(Some(v)) => ok(&req.id, json!({ "exercise": redact_for(caller, v) })),
        Ok(None) => err(&req.id, "not_found", "exercise not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
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
    let mut text = Vec::with_capacity(4);
    for key in ["instructions", "example", "expectedOutput", "solution"] {
        match parse_opt_string(req.params.get(key)) {
            Ok(v) => text.push(v),
            Err(m) => return bad_field(req, key, m),
        }
    }
    let active = match parse_bool(req.params.get("active"), true) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "active", m),
    };
    match topic_unit(conn, &topic_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "topic not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let slug = match unique_slug(conn, SlugTable::Exercises, &title, None) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let exercise_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO exercises(id, topic_id, title, slug, instructions, example, expected_output,
                               solution, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &exercise_id,
            &topic_id,
            &title,
            &slug,
            text[0].clone().unwrap_or_default(),
            &text[1],
            &text[2],
            &text[3],
            bool_to_i64(active),
            now_ts(),
        ),
    ) {
        return write_err(&req.id, "db_insert_failed", &e, "exercises");
    }

    info!(exercise = %slug, "exercise created");
    ok(&req.id, json!({ "exerciseId": exercise_id, "slug": slug }))
}

pub fn update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let exercise_id = match required_str(req, "exerciseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match patch_obj(req, "patch") {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "bad_params", "missing patch", None),
        Err(e) => return e,
    };
    match load_exercise(conn, &exercise_id) {
        Ok(Some(r)) if r.id == exercise_id => {}
        Ok(_) => return err(&req.id, "not_found", "exercise not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();
    let mut new_slug: Option<String> = None;

    if let Some(v) = patch.get("title") {
        let Some(title) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return bad_field(req, "patch.title", "must be a non-empty string");
        };
        let slug = match unique_slug(conn, SlugTable::Exercises, title, Some(&exercise_id)) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        sets.push("title = ?");
        bind.push(Value::Text(title.to_string()));
        sets.push("slug = ?");
        bind.push(Value::Text(slug.clone()));
        new_slug = Some(slug);
    }
    for (key, column) in [
        ("instructions", "instructions = ?"),
        ("example", "example = ?"),
        ("expectedOutput", "expected_output = ?"),
        ("solution", "solution = ?"),
    ] {
        if !patch.contains_key(key) {
            continue;
        }
        match parse_opt_string(patch.get(key)) {
            Ok(v) => {
                sets.push(column);
                bind.push(match (key, v) {
                    ("instructions", v) => Value::Text(v.unwrap_or_default()),
                    (_, Some(s)) => Value::Text(s),
                    (_, None) => Value::Null,
                });
            }
            Err(m) => return bad_field(req, &format!("patch.{}", key), m),
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
    bind.push(Value::Text(exercise_id));
    let sql = format!("UPDATE exercises SET {} WHERE id = ?", sets.join(", "));
    match conn.execute(&sql, params_from_iter(bind)) {
        Ok(_) => ok(&req.id, json!({ "ok": true, "slug": new_slug })),
        Err(e) => write_err(&req.id, "db_update_failed", &e, "exercises"),
    }
}

pub fn delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let exercise_id = match required_str(req, "exerciseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM exercise_progress WHERE exercise_id = ?",
        [&exercise_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "exercise_progress" })),
        );
    }
    let removed = match tx.execute("DELETE FROM exercises WHERE id = ?", [&exercise_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "exercises" })),
            );
        }
    };
    if removed == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "exercise not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn complete(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match required_str(req, "exerciseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let row = match reachable_exercise(conn, req, caller, &key) {
        Ok(r) => r,
        Err(e) => return e,
    };
    match mark_completed(conn, &row.id, &caller.user_id) {
        Ok(at) => ok(&req.id, json!({ "completed": true, "completedAt": at })),
        Err(e) => write_err(&req.id, "db_update_failed", &e, "exercise_progress"),
    }
}

pub fn check_code(state: &mut AppState, req: &Request, caller: &Caller) -> serde_json::Value {
    let code = match required_code(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let key = match required_str(req, "exerciseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let unit_id = match parse_opt_string(req.params.get("unitId")) {
        Ok(v) => v,
        Err(m) => return bad_field(req, "unitId", m),
    };
    let row = match reachable_exercise(conn, req, caller, &key) {
        Ok(r) => r,
        Err(e) => return e,
    };
    if let Some(unit_id) = unit_id {
        match topic_unit(conn, &row.topic_id) {
            Ok(Some(u)) if u == unit_id => {}
            Ok(_) => return err(&req.id, "not_found", "exercise not found in unit", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let rubric: Rubric = rubric::generate_rubric(row.solution.as_deref().unwrap_or(""));
    let report = match rubric::grade(&rubric, &code) {
        Ok(r) => r,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let success = report.all_passed();
    let feedback: Vec<String> = report
        .details
        .iter()
        .map(|d| match (&d.feedback, d.passed) {
            (Some(f), false) => format!("{}: {}", d.label, f),
            (_, true) => format!("{}: correcto", d.label),
            (None, false) => format!("{}: revisa este punto", d.label),
        })
        .collect();
    debug!(
        exercise_id = %row.id,
        score = report.score,
        max = report.max,
        "exercise checked"
    );

    if success {
        if let Err(e) = mark_completed(conn, &row.id, &caller.user_id) {
            return write_err(&req.id, "db_update_failed", &e, "exercise_progress");
        }
    }

    let mut result = json!({
        "success": success,
        "feedback": feedback,
        "score": report.score,
        "max": report.max,
    });
    if !success {
        result["expected"] = json!(row.expected_output);
    }
    ok(&req.id, result)
}
