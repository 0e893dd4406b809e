use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::{Ledger, RpcLedger};
use crate::ticker::Ticker;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Protocol output shared by the request loop and watch threads.
pub type Output = Arc<Mutex<Box<dyn Write + Send>>>;

/// Writes one JSON line and flushes.
pub fn emit(out: &Output, value: &serde_json::Value) {
    let mut w = out.lock().unwrap_or_else(|e| e.into_inner());
    let line = serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string());
    if writeln!(w, "{}", line).and_then(|_| w.flush()).is_err() {
        tracing::warn!("failed to write to protocol output");
    }
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Config,
    /// Set when `--config` was given; workspace config files are then ignored.
    pub config_pinned: bool,
    pub ledger: Option<Arc<dyn Ledger>>,
    pub watches: HashMap<String, Ticker>,
    pub out: Output,
}

impl AppState {
    pub fn new(config: Config, config_pinned: bool, out: Output) -> Self {
        let mut state = AppState {
            workspace: None,
            db: None,
            config: Config::default(),
            config_pinned,
            ledger: None,
            watches: HashMap::new(),
            out,
        };
        state.apply_config(config);
        state
    }

    pub fn apply_config(&mut self, config: Config) {
        self.ledger = if config.ledger.enabled {
            match RpcLedger::new(&config.ledger) {
                Ok(l) => Some(Arc::new(l) as Arc<dyn Ledger>),
                Err(e) => {
                    tracing::warn!(error = %e, "ledger client could not be built; using local store only");
                    None
                }
            }
        } else {
            None
        };
        self.config = config;
    }

    pub fn conn(&self) -> Result<&Connection> {
        self.db.as_ref().ok_or(Error::NoWorkspace)
    }

    pub fn workspace(&self) -> Result<&Path> {
        self.workspace.as_deref().ok_or(Error::NoWorkspace)
    }

    pub fn ledger(&self) -> Option<&dyn Ledger> {
        self.ledger.as_deref()
    }

    pub fn stop_watches(&mut self) {
        for (id, mut t) in self.watches.drain() {
            t.stop();
            tracing::debug!(watch_id = %id, "watch stopped");
        }
    }
}
