use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps a failed write onto the envelope, reporting unique-constraint
/// violations as `conflict`.
pub fn write_err(id: &str, fallback_code: &str, e: &rusqlite::Error, table: &str) -> serde_json::Value {
    if let rusqlite::Error::SqliteFailure(f, _) = e {
        if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
            return err(
                id,
                "conflict",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }
    err(id, fallback_code, e.to_string(), Some(json!({ "table": table })))
}
