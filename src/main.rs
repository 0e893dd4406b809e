mod backup;
mod calc;
mod config;
mod dashboard;
mod db;
mod error;
mod export;
mod ipc;
mod ledger;
mod model;
mod source;
mod store;
mod ticker;
mod userdata;

use anyhow::Context;
use clap::Parser;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Gradebook sidecar: JSON requests on stdin, one JSON response per line on stdout.
#[derive(Parser, Debug)]
#[command(name = "gradebookd", version, about, long_about = None)]
struct Cli {
    /// TOML config file. Overrides any gradebookd.toml inside the workspace.
    #[arg(short, long, env = "GRADEBOOKD_CONFIG")]
    config: Option<PathBuf>,

    /// Workspace directory to open at startup.
    #[arg(short, long, env = "GRADEBOOKD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Debug logging unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (config, pinned) = match &cli.config {
        Some(path) => (Config::load(path)?, true),
        None => (Config::default(), false),
    };
    let out: ipc::Output = Arc::new(Mutex::new(Box::new(io::stdout())));
    let mut state = ipc::AppState::new(config, pinned, out.clone());

    if let Some(ws) = &cli.workspace {
        ipc::open_workspace(&mut state, ws)
            .with_context(|| format!("failed to open workspace {}", ws.display()))?;
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gradebookd ready");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                let mut resp = ipc::err("", "bad_json", e.to_string(), None);
                resp["id"] = serde_json::Value::Null;
                ipc::emit(&out, &resp);
                continue;
            }
        };
        let resp = ipc::handle_request(&mut state, req);
        ipc::emit(&out, &resp);
    }

    state.stop_watches();
    tracing::info!("gradebookd stopped");
    Ok(())
}
