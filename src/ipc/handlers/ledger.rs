use serde_json::json;

use crate::error::{Error, Result};
use crate::ipc::error::respond;
use crate::ipc::helpers::{opt_usize_param, str_param};
use crate::ipc::types::{AppState, Request};
use crate::ledger::Ledger;
use crate::model::{require_text, validate_authority};

const DEFAULT_TRANSACTION_LIMIT: usize = 10;

fn configured(state: &AppState) -> Result<&dyn Ledger> {
    state
        .ledger()
        .ok_or_else(|| Error::NotAvailable("no ledger configured".to_string()))
}

/// Reports health even when the ledger is down; program details only when it is up.
fn handle_status(state: &AppState) -> Result<serde_json::Value> {
    let Some(ledger) = state.ledger() else {
        return Ok(json!({
            "enabled": false,
            "healthy": false,
            "detail": "no ledger configured",
        }));
    };
    let health = ledger.health_check();
    let program = if health.healthy {
        match ledger.program_info() {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(error = %e, "program info unavailable");
                None
            }
        }
    } else {
        None
    };
    Ok(json!({
        "enabled": true,
        "rpcUrl": state.config.ledger.rpc_url,
        "programId": state.config.ledger.program_id,
        "healthy": health.healthy,
        "detail": health.detail,
        "program": program,
    }))
}

fn handle_balance(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let account = str_param(req, "account")?;
    validate_authority("account", &account)?;
    let balance = configured(state)?.get_balance(&account)?;
    Ok(json!({ "account": account, "balance": balance }))
}

fn handle_transactions(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let limit = opt_usize_param(req, "limit")?.unwrap_or(DEFAULT_TRANSACTION_LIMIT);
    let transactions = configured(state)?.recent_transactions(limit)?;
    Ok(json!({ "transactions": transactions }))
}

fn handle_transaction(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let signature = require_text("signature", &str_param(req, "signature")?)?;
    match configured(state)?.transaction_details(&signature)? {
        Some(transaction) => Ok(json!({ "signature": signature, "transaction": transaction })),
        None => Err(Error::not_found(format!("transaction {}", signature))),
    }
}

fn handle_network(state: &AppState) -> Result<serde_json::Value> {
    let info = configured(state)?.network_info()?;
    Ok(json!(info))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "ledger.status" => handle_status(state),
        "ledger.balance" => handle_balance(state, req),
        "ledger.transactions" => handle_transactions(state, req),
        "ledger.transaction" => handle_transaction(state, req),
        "ledger.network" => handle_network(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
