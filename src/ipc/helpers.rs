use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::Value as JsonValue;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, JsonValue> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Like `required_str` but keeps the value untrimmed (source code).
pub fn required_code(req: &Request, key: &str) -> Result<String, JsonValue> {
    let code = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if code.trim().is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(code.to_string())
}

pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn parse_bool(v: Option<&JsonValue>, default: bool) -> Result<bool, &'static str> {
    match v {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or("must be boolean"),
    }
}

pub fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

pub fn parse_opt_i64(v: Option<&JsonValue>) -> Result<Option<i64>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or("must be integer or null"),
    }
}

pub fn parse_trimester(v: Option<&JsonValue>) -> Result<Option<i64>, &'static str> {
    match parse_opt_i64(v)? {
        None => Ok(None),
        Some(t) if (1..=3).contains(&t) => Ok(Some(t)),
        Some(_) => Err("must be 1, 2, 3 or null"),
    }
}

pub fn parse_required_string_array(v: Option<&JsonValue>, key: &str) -> Result<Vec<String>, String> {
    let Some(raw) = v else {
        return Err(format!("missing {}", key));
    };
    let arr = raw
        .as_array()
        .ok_or_else(|| format!("{} must be array of strings", key))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item
            .as_str()
            .ok_or_else(|| format!("{} must be array of strings", key))?
            .trim()
            .to_string();
        if !s.is_empty() {
            out.push(s);
        }
    }
    Ok(out)
}

/// The `patch` object of an update request; absent means empty.
pub fn patch_obj<'a>(
    req: &'a Request,
    key: &str,
) -> Result<Option<&'a serde_json::Map<String, JsonValue>>, JsonValue> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_object()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be an object", key), None)),
    }
}

/// Wraps a field-level parse error with the field name.
pub fn bad_field(req: &Request, field: &str, msg: &str) -> JsonValue {
    err(&req.id, "bad_params", format!("{} {}", field, msg), None)
}

pub fn bool_to_i64(v: bool) -> i64 {
    if v {
        1
    } else {
        0
    }
}

pub fn query_json<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    f: fn(&rusqlite::Row<'_>) -> rusqlite::Result<JsonValue>,
) -> rusqlite::Result<Vec<JsonValue>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, f)?.collect::<Result<Vec<_>, _>>();
    rows
}
