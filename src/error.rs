use serde_json::json;
use thiserror::Error;

use crate::store::Collection;

/// Errors surfaced by mutations, the record store and the ledger adapter.
///
/// Aggregation never produces these; it treats missing data as empty.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ledger not available: {0}")]
    NotAvailable(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("partial failure: {message}")]
    PartialFailure {
        message: String,
        applied: Vec<Collection>,
        pending: Vec<Collection>,
    },

    #[error("select a workspace first")]
    NoWorkspace,

    #[error("database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Stable error code sent to the client.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotAvailable(_) => "not_available",
            Error::Validation(_) => "bad_params",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::PartialFailure { .. } => "partial_failure",
            Error::NoWorkspace => "no_workspace",
            Error::Storage(_) => "db_failed",
            Error::Io(_) => "io_failed",
            Error::Json(_) => "bad_json",
            Error::Internal(_) => "internal",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::PartialFailure {
                applied, pending, ..
            } => Some(json!({
                "applied": applied.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
                "pending": pending.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            })),
            _ => None,
        }
    }
}
