use super::core::open_workspace;
use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn path_param(req: &Request, key: &str) -> Result<PathBuf, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(PathBuf::from(v.trim())),
        _ => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

pub fn export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out = match path_param(req, "outPath") {
        Ok(p) => p,
        Err(e) => return e,
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let export = match backup::export_workspace_bundle(&workspace_path, &out) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %out.to_string_lossy(), error = %e, "backup export failed");
            return err(
                &req.id,
                "backup_failed",
                format!("{e:#}"),
                Some(json!({ "path": out.to_string_lossy() })),
            );
        }
    };

    info!(path = %out.to_string_lossy(), sha256 = %export.db_sha256, "backup exported");
    ok(
        &req.id,
        json!({
            "path": out.to_string_lossy(),
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256,
        }),
    )
}

/// Verifies the bundle before touching the live database, then swaps it in
/// and reopens the workspace. Sessions do not survive the swap.
pub fn import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let src = match path_param(req, "inPath") {
        Ok(p) => p,
        Err(e) => return e,
    };
    let Some(workspace_path) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if !src.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": src.to_string_lossy() })),
        );
    }

    let staged = match backup::stage_workspace_bundle(&src, &workspace_path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %src.to_string_lossy(), error = %e, "backup rejected");
            return err(
                &req.id,
                "backup_failed",
                format!("{e:#}"),
                Some(json!({ "path": src.to_string_lossy() })),
            );
        }
    };

    // Drop open handle before replacing file.
    state.db = None;
    let summary = match staged.commit() {
        Ok(s) => s,
        Err(e) => {
            let _ = open_workspace(state, workspace_path);
            return err(&req.id, "backup_failed", format!("{e:#}"), None);
        }
    };

    if let Err(e) = open_workspace(state, workspace_path.clone()) {
        return err(&req.id, "db_open_failed", format!("{e:#}"), None);
    }
    info!(path = %src.to_string_lossy(), "backup imported");
    ok(
        &req.id,
        json!({
            "workspacePath": workspace_path.to_string_lossy(),
            "bundleFormat": summary.bundle_format,
            "exportedAt": summary.exported_at,
        }),
    )
}
