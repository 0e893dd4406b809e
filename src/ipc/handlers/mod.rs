pub mod analytics;
pub mod classrooms;
pub mod core;
pub mod export;
pub mod grades;
pub mod ledger;
pub mod store;
pub mod users;
pub mod watch;

use crate::error::Result;
use crate::ipc::types::AppState;
use crate::source::{self, Loaded};

/// Fresh read of all collections through the record source.
pub(crate) fn load(state: &AppState) -> Result<Loaded> {
    source::load(state.conn()?, state.ledger())
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
