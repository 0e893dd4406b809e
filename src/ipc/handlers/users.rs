use chrono::Utc;
use serde_json::json;

use crate::calc;
use crate::error::{Error, Result};
use crate::ipc::error::respond;
use crate::ipc::handlers::load;
use crate::ipc::helpers::{opt_str_param, str_param};
use crate::ipc::types::{AppState, Request};
use crate::model::{require_text, validate_authority, Role, User};
use crate::store;

fn handle_users_list(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let loaded = load(state)?;
    let query = opt_str_param(req, "query").unwrap_or_default();
    let users = calc::search_users(&loaded.snapshot.users, &query);
    Ok(json!({
        "users": users,
        "origin": loaded.origin,
        "notice": loaded.notice,
    }))
}

fn handle_users_get(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let authority = str_param(req, "authority")?;
    let loaded = load(state)?;
    let user = loaded
        .snapshot
        .users
        .into_iter()
        .find(|u| u.authority == authority)
        .ok_or_else(|| Error::not_found(format!("user {}", authority)))?;
    Ok(json!({ "user": user, "origin": loaded.origin }))
}

fn handle_users_register(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let authority = str_param(req, "authority")?;
    validate_authority("authority", &authority)?;
    let username = require_text("username", &opt_str_param(req, "username").unwrap_or_default())?;
    let role = req
        .params
        .get("role")
        .and_then(Role::from_value)
        .ok_or_else(|| Error::validation("role must be Teacher, Student or Admin"))?;
    let conn = state.conn()?;

    if let Some(ledger) = state.ledger() {
        if ledger.health_check().healthy {
            let tx = ledger.register_user(&authority, &username, role)?;
            tracing::info!(authority = %authority, role = role.as_str(), "user registered on ledger");
            return Ok(json!({ "origin": "ledger", "txId": tx }));
        }
        tracing::warn!("ledger not available, registering in local store");
    }

    let user = User {
        authority,
        username,
        role,
        created_at: Utc::now().timestamp(),
        is_active: true,
    };
    store::insert_user(conn, &user)?;
    tracing::info!(authority = %user.authority, role = role.as_str(), "user registered");
    Ok(json!({ "origin": "local", "user": user }))
}

fn handle_users_delete(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let authority = str_param(req, "authority")?;
    let report = store::cascade_delete_user(
        state.conn()?,
        state.workspace()?,
        &authority,
        state.config.store.classroom_policy,
    )?;
    Ok(json!({ "report": report }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "users.list" => handle_users_list(state, req),
        "users.get" => handle_users_get(state, req),
        "users.register" => handle_users_register(state, req),
        "users.delete" => handle_users_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
