use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;
use crate::ledger::Ledger;
use crate::store::{self, Snapshot};

pub const LEDGER_DOWN_NOTICE: &str = "ledger not available, using local store";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Ledger,
    Local,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Loaded {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub origin: Origin,
    pub notice: Option<String>,
}

/// Loads all three collections, preferring the ledger when one is configured and a
/// single health probe succeeds.
pub fn load(conn: &Connection, ledger: Option<&dyn Ledger>) -> Result<Loaded> {
    let Some(ledger) = ledger else {
        return local(conn, None);
    };
    let health = ledger.health_check();
    if !health.healthy {
        tracing::warn!(detail = %health.detail, "{}", LEDGER_DOWN_NOTICE);
        return local(conn, Some(LEDGER_DOWN_NOTICE.to_string()));
    }
    match fetch(ledger) {
        Ok(snapshot) => Ok(Loaded {
            snapshot,
            origin: Origin::Ledger,
            notice: None,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "ledger read failed, falling back to local store");
            local(conn, Some(format!("{}: {}", LEDGER_DOWN_NOTICE, e)))
        }
    }
}

fn fetch(ledger: &dyn Ledger) -> Result<Snapshot> {
    Ok(Snapshot {
        users: ledger.fetch_all_users()?,
        classrooms: ledger.fetch_all_classrooms()?,
        grades: ledger.fetch_all_grades()?,
    })
}

fn local(conn: &Connection, notice: Option<String>) -> Result<Loaded> {
    Ok(Loaded {
        snapshot: store::load_snapshot(conn)?,
        origin: Origin::Local,
        notice,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::error::Error;
    use crate::ledger::{Health, NetworkInfo, ProgramInfo, TransactionInfo};
    use crate::model::{Classroom, Grade, Role, User};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory ledger double.
    #[derive(Default)]
    struct FakeLedger {
        healthy: bool,
        fail_grades: bool,
        users: Vec<User>,
        probes: AtomicUsize,
    }

    impl Ledger for FakeLedger {
        fn health_check(&self) -> Health {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Health {
                healthy: self.healthy,
                detail: String::new(),
            }
        }
        fn register_user(&self, _: &str, _: &str, _: Role) -> Result<String> {
            Ok("sig".to_string())
        }
        fn fetch_all_users(&self) -> Result<Vec<User>> {
            Ok(self.users.clone())
        }
        fn fetch_all_classrooms(&self) -> Result<Vec<Classroom>> {
            Ok(Vec::new())
        }
        fn fetch_all_grades(&self) -> Result<Vec<Grade>> {
            if self.fail_grades {
                return Err(Error::NotAvailable("timeout".to_string()));
            }
            Ok(Vec::new())
        }
        fn create_classroom(&self, _: &str, _: &str, _: &str) -> Result<String> {
            Ok("sig".to_string())
        }
        fn add_grade(&self, _: &str, _: &str, _: &str, _: u32, _: u32) -> Result<String> {
            Ok("sig".to_string())
        }
        fn get_balance(&self, _: &str) -> Result<f64> {
            Ok(1.5)
        }
        fn program_info(&self) -> Result<ProgramInfo> {
            Err(Error::NotAvailable("fake".to_string()))
        }
        fn recent_transactions(&self, _: usize) -> Result<Vec<TransactionInfo>> {
            Ok(Vec::new())
        }
        fn network_info(&self) -> Result<NetworkInfo> {
            Err(Error::NotAvailable("fake".to_string()))
        }
        fn transaction_details(&self, _: &str) -> Result<Option<serde_json::Value>> {
            Ok(None)
        }
    }

    fn ledger_user() -> User {
        User {
            authority: format!("{:1<44}", "Ledger"),
            username: "from-ledger".to_string(),
            role: Role::Admin,
            created_at: 1,
            is_active: true,
        }
    }

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn no_ledger_reads_local_without_notice() {
        let loaded = load(&mem(), None).expect("load");
        assert_eq!(loaded.origin, Origin::Local);
        assert!(loaded.notice.is_none());
    }

    #[test]
    fn healthy_ledger_is_preferred() {
        let ledger = FakeLedger {
            healthy: true,
            users: vec![ledger_user()],
            ..FakeLedger::default()
        };
        let loaded = load(&mem(), Some(&ledger as &dyn Ledger)).expect("load");
        assert_eq!(loaded.origin, Origin::Ledger);
        assert_eq!(loaded.snapshot.users.len(), 1);
        assert_eq!(ledger.probes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unhealthy_ledger_falls_back_with_notice() {
        let ledger = FakeLedger::default();
        let loaded = load(&mem(), Some(&ledger as &dyn Ledger)).expect("load");
        assert_eq!(loaded.origin, Origin::Local);
        assert_eq!(loaded.notice.as_deref(), Some(LEDGER_DOWN_NOTICE));
    }

    #[test]
    fn failed_fetch_falls_back_after_one_probe() {
        let ledger = FakeLedger {
            healthy: true,
            fail_grades: true,
            users: vec![ledger_user()],
            ..FakeLedger::default()
        };
        let loaded = load(&mem(), Some(&ledger as &dyn Ledger)).expect("load");
        assert_eq!(loaded.origin, Origin::Local);
        assert!(loaded.snapshot.users.is_empty());
        assert!(loaded.notice.expect("notice").starts_with(LEDGER_DOWN_NOTICE));
        assert_eq!(ledger.probes.load(Ordering::SeqCst), 1);
    }
}
