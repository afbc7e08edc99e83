use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

pub fn health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "initialized": state
                .db
                .as_ref()
                .and_then(|c| db::count_users(c).ok())
                .map(|n| n > 0)
                .unwrap_or(false),
        }),
    )
}

pub fn workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, path.clone()) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

/// Opens (creating if needed) the workspace database. Sessions belong to
/// the previous workspace's users, so they are dropped.
pub fn open_workspace(state: &mut AppState, path: PathBuf) -> anyhow::Result<()> {
    match db::open_db(&path) {
        Ok(conn) => {
            state.sessions.clear();
            state.db = Some(conn);
            info!(workspace = %path.to_string_lossy(), "workspace opened");
            state.workspace = Some(path);
            Ok(())
        }
        Err(e) => {
            warn!(workspace = %path.to_string_lossy(), error = %e, "workspace open failed");
            Err(e)
        }
    }
}
