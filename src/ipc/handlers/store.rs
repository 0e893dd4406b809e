use anyhow::Context;
use serde_json::json;

use crate::error::{Error, Result};
use crate::ipc::error::respond;
use crate::ipc::helpers::{path_param, str_param};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Collection, CollectionRecords};
use crate::userdata;

fn collection_param(req: &Request) -> Result<Collection> {
    let name = str_param(req, "name")?;
    Collection::parse_record_collection(&name)
        .ok_or_else(|| Error::validation(format!("unknown collection: {}", name)))
}

fn handle_read_collection(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let collection = collection_param(req)?;
    let records = store::read_collection(state.conn()?, collection)?;
    Ok(json!({
        "name": collection.as_str(),
        "count": records.len(),
        "records": records.to_json(),
    }))
}

fn handle_write_collection(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let collection = collection_param(req)?;
    let raw = req.params.get("records").cloned().unwrap_or(serde_json::Value::Null);
    let records = CollectionRecords::from_json(collection, &raw)?;
    let written = store::write_collection(state.conn()?, &records)?;
    Ok(json!({ "name": collection.as_str(), "written": written }))
}

fn handle_user_data_get(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let authority = str_param(req, "authority")?;
    let data = userdata::read(state.workspace()?, &authority)?;
    Ok(json!({ "authority": authority, "data": data }))
}

fn handle_user_data_set(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let authority = str_param(req, "authority")?;
    let data = req
        .params
        .get("data")
        .filter(|v| !v.is_null())
        .ok_or_else(|| Error::validation("missing params.data"))?;
    userdata::write(state.workspace()?, &authority, data)?;
    Ok(json!({ "authority": authority, "saved": true }))
}

fn handle_user_data_delete(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let authority = str_param(req, "authority")?;
    let removed = userdata::delete(state.workspace()?, &authority)?;
    Ok(json!({ "authority": authority, "removed": removed }))
}

fn handle_import_local_storage(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let path = path_param(req, "path")?;
    let conn = state.conn()?;
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let dump: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| Error::validation(format!("dump is not valid JSON: {}", e)))?;
    let summary = store::import_local_storage_dump(conn, &dump)?;
    Ok(json!(summary))
}

fn handle_quarantine_list(state: &AppState) -> Result<serde_json::Value> {
    let records = store::quarantine_list(state.conn()?)?;
    Ok(json!({ "records": records }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "store.readCollection" => handle_read_collection(state, req),
        "store.writeCollection" => handle_write_collection(state, req),
        "userData.get" => handle_user_data_get(state, req),
        "userData.set" => handle_user_data_set(state, req),
        "userData.delete" => handle_user_data_delete(state, req),
        "import.localStorage" => handle_import_local_storage(state, req),
        "quarantine.list" => handle_quarantine_list(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
