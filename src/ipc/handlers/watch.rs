use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::db;
use crate::error::{Error, Result};
use crate::ipc::error::respond;
use crate::ipc::handlers::analytics::{render_view, View};
use crate::ipc::helpers::{opt_i64_param, opt_str_param, str_param};
use crate::ipc::types::{emit, AppState, Request};
use crate::ticker::Ticker;

const MIN_INTERVAL_MS: i64 = 20;

fn tick_event(watch_id: &str, tick: u64, outcome: Result<serde_json::Value>) -> serde_json::Value {
    match outcome {
        Ok(result) => json!({
            "event": "watch.tick",
            "watchId": watch_id,
            "tick": tick,
            "result": result,
        }),
        Err(e) => json!({
            "event": "watch.tick",
            "watchId": watch_id,
            "tick": tick,
            "error": { "code": e.code(), "message": e.to_string() },
        }),
    }
}

/// Starts a ticker that re-renders `view` and pushes it as an event line. The first
/// event is sent right away, possibly before the response to this request.
fn handle_watch_start(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let name = str_param(req, "view")?;
    let view = View::parse(&name, opt_str_param(req, "authority"))?;
    let period = match opt_i64_param(req, "intervalMs")? {
        Some(ms) if ms < MIN_INTERVAL_MS => {
            return Err(Error::validation(format!(
                "intervalMs must be at least {}",
                MIN_INTERVAL_MS
            )))
        }
        Some(ms) => Duration::from_millis(ms as u64),
        None => Duration::from_secs(view.default_period_secs(&state.config)),
    };
    let workspace = state.workspace()?.to_path_buf();

    let watch_id = Uuid::new_v4().to_string();
    let ledger = state.ledger.clone();
    let config = state.config.clone();
    let out = state.out.clone();
    let id = watch_id.clone();
    let ticker = Ticker::start(view.name(), period, move |n| {
        let outcome = db::open_db(&workspace)
            .map_err(Error::from)
            .and_then(|conn| render_view(&view, &conn, ledger.as_deref(), &config));
        if let Err(e) = &outcome {
            tracing::warn!(watch_id = %id, error = %e, "watch tick failed");
        }
        emit(&out, &tick_event(&id, n, outcome));
        true
    })?;
    state.watches.insert(watch_id.clone(), ticker);
    tracing::info!(watch_id = %watch_id, view = %name, period_ms = period.as_millis() as u64, "watch started");
    Ok(json!({ "watchId": watch_id, "intervalMs": period.as_millis() as u64 }))
}

fn handle_watch_stop(state: &mut AppState, req: &Request) -> Result<serde_json::Value> {
    let watch_id = str_param(req, "watchId")?;
    let mut ticker = state
        .watches
        .remove(&watch_id)
        .ok_or_else(|| Error::not_found(format!("watch {}", watch_id)))?;
    ticker.stop();
    tracing::info!(watch_id = %watch_id, "watch stopped");
    Ok(json!({ "watchId": watch_id, "stopped": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "watch.start" => handle_watch_start(state, req),
        "watch.stop" => handle_watch_stop(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
