use serde_json::json;

use crate::backup;
use crate::calc;
use crate::db::{self, LAST_BACKUP_KEY};
use crate::error::Result;
use crate::export;
use crate::ipc::error::respond;
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::handlers::load;
use crate::ipc::helpers::{opt_str_param, path_param, str_param};
use crate::ipc::types::{AppState, Request};
use crate::model::validate_authority;

fn handle_export_json(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let out_path = path_param(req, "outPath")?;
    let loaded = load(state)?;
    let result = export::export_json(&loaded, &out_path)?;
    tracing::info!(path = %result.path, records = result.records, "json export written");
    Ok(json!(result))
}

fn handle_export_csv(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let out_path = path_param(req, "outPath")?;
    let loaded = load(state)?;
    let grades = match opt_str_param(req, "teacher") {
        Some(t) => calc::grades_for_teacher(&loaded.snapshot.grades, &t),
        None => loaded.snapshot.grades,
    };
    let result = export::export_csv(&grades, &out_path)?;
    tracing::info!(path = %result.path, records = result.records, "csv export written");
    Ok(json!(result))
}

fn handle_teacher_report(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let authority = str_param(req, "authority")?;
    validate_authority("authority", &authority)?;
    let out_path = path_param(req, "outPath")?;
    let loaded = load(state)?;
    let result =
        export::export_teacher_report(&loaded, &authority, &state.config.analytics, &out_path)?;
    Ok(json!(result))
}

fn handle_backup_export(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let out_path = path_param(req, "outPath")?;
    let workspace = state.workspace()?;
    let summary = backup::export_workspace_bundle(workspace, &out_path)?;
    db::settings_set_json(
        state.conn()?,
        LAST_BACKUP_KEY,
        &json!({
            "path": out_path.to_string_lossy(),
            "exportedAt": chrono::Utc::now().to_rfc3339(),
            "dbSha256": summary.db_sha256,
        }),
    )?;
    tracing::info!(path = %out_path.display(), entries = summary.entry_count, "backup written");
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256,
    }))
}

/// The open connection is closed while the database file is replaced, then reopened
/// whether or not the import succeeded.
fn handle_backup_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let in_path = path_param(req, "inPath")?;
    let workspace = state.workspace()?.to_path_buf();
    state.stop_watches();
    state.db = None;
    let imported = backup::import_workspace_bundle(&in_path, &workspace);
    let reopened = open_workspace(state, &workspace);
    let summary = imported?;
    reopened?;
    tracing::info!(path = %in_path.display(), files = summary.user_data_files, "backup restored");
    Ok(json!(summary))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "export.json" => handle_export_json(state, req),
        "export.csv" => handle_export_csv(state, req),
        "export.teacherReport" => handle_teacher_report(state, req),
        "backup.export" => handle_backup_export(state, req),
        "backup.import" => handle_backup_import(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
