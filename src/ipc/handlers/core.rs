use crate::config::Config;
use crate::db::{self, LAST_BACKUP_KEY};
use crate::error::Result;
use crate::ipc::error::respond;
use crate::ipc::helpers::path_param;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::Path;

fn handle_health(state: &AppState) -> Result<serde_json::Value> {
    let last_backup = match &state.db {
        Some(conn) => db::settings_get_json(conn, LAST_BACKUP_KEY)?,
        None => None,
    };
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "ledgerEnabled": state.ledger.is_some(),
        "watches": state.watches.values().filter(|t| t.is_running()).count(),
        "lastBackup": last_backup,
    }))
}

/// Opens (creating if needed) the workspace database and makes it current. Running
/// watches belong to the previous workspace and are stopped.
pub fn open_workspace(state: &mut AppState, path: &Path) -> Result<serde_json::Value> {
    let conn = db::open_db(path)?;
    state.stop_watches();
    if !state.config_pinned {
        state.apply_config(Config::for_workspace(path));
    }
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    tracing::info!(path = %path.display(), "workspace opened");
    Ok(json!({
        "workspacePath": path.to_string_lossy(),
        "ledgerEnabled": state.ledger.is_some(),
        "classroomPolicy": state.config.store.classroom_policy,
    }))
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let path = path_param(req, "path")?;
    open_workspace(state, &path)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => handle_health(state),
        "workspace.select" => handle_workspace_select(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
