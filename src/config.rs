use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::store::ClassroomPolicy;

/// Looked up inside a workspace when no `--config` was given.
pub const WORKSPACE_CONFIG_FILE: &str = "gradebookd.toml";

/// Upper bound for the analytics activity windows.
const MAX_WINDOW_DAYS: i64 = 366;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Address of the gradebook program account.
    #[serde(default)]
    pub program_id: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rpc_url: default_rpc_url(),
            program_id: String::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8899".to_string()
}

fn default_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_dashboard_secs")]
    pub dashboard_secs: u64,
    #[serde(default = "default_diagnostics_secs")]
    pub diagnostics_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            dashboard_secs: default_dashboard_secs(),
            diagnostics_secs: default_diagnostics_secs(),
        }
    }
}

fn default_dashboard_secs() -> u64 {
    30
}

fn default_diagnostics_secs() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_seventy")]
    pub attention_threshold: u32,
    #[serde(default = "default_seventy")]
    pub pass_mark: u32,
    #[serde(default = "default_high_grade")]
    pub high_grade_threshold: u32,
    #[serde(default = "default_ranking_limit")]
    pub ranking_limit: usize,
    #[serde(default = "default_recent_hours")]
    pub recent_activity_hours: i64,
    #[serde(default = "default_teacher_days")]
    pub teacher_window_days: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            attention_threshold: default_seventy(),
            pass_mark: default_seventy(),
            high_grade_threshold: default_high_grade(),
            ranking_limit: default_ranking_limit(),
            recent_activity_hours: default_recent_hours(),
            teacher_window_days: default_teacher_days(),
        }
    }
}

fn default_seventy() -> u32 {
    70
}

fn default_high_grade() -> u32 {
    90
}

fn default_ranking_limit() -> usize {
    10
}

fn default_recent_hours() -> i64 {
    24
}

fn default_teacher_days() -> i64 {
    7
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub classroom_policy: ClassroomPolicy,
}

impl Config {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(text)?;
        cfg.check()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config {}", path.to_string_lossy()))
    }

    /// `<workspace>/gradebookd.toml` if present; defaults when absent or unreadable.
    pub fn for_workspace(workspace: &Path) -> Self {
        let path = workspace.join(WORKSPACE_CONFIG_FILE);
        if !path.is_file() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "loaded workspace config");
                cfg
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %format!("{:#}", e), "ignoring workspace config");
                Self::default()
            }
        }
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.ledger.enabled && self.ledger.rpc_url.trim().is_empty() {
            anyhow::bail!("ledger.rpc_url is required when the ledger is enabled");
        }
        if self.analytics.attention_threshold > 100
            || self.analytics.pass_mark > 100
            || self.analytics.high_grade_threshold > 100
        {
            anyhow::bail!("analytics thresholds are percentages (0-100)");
        }
        if self.refresh.dashboard_secs == 0 || self.refresh.diagnostics_secs == 0 {
            anyhow::bail!("refresh intervals must be at least one second");
        }
        if !(1..=MAX_WINDOW_DAYS * 24).contains(&self.analytics.recent_activity_hours) {
            anyhow::bail!(
                "analytics.recent_activity_hours must be between 1 and {}",
                MAX_WINDOW_DAYS * 24
            );
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&self.analytics.teacher_window_days) {
            anyhow::bail!(
                "analytics.teacher_window_days must be between 1 and {}",
                MAX_WINDOW_DAYS
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = Config::from_toml("").expect("parse");
        assert_eq!(cfg, Config::default());
        assert!(!cfg.ledger.enabled);
        assert_eq!(cfg.ledger.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.refresh.dashboard_secs, 30);
        assert_eq!(cfg.refresh.diagnostics_secs, 10);
        assert_eq!(cfg.analytics.attention_threshold, 70);
        assert_eq!(cfg.analytics.ranking_limit, 10);
        assert_eq!(cfg.store.classroom_policy, ClassroomPolicy::Delete);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = Config::from_toml(
            r#"
[ledger]
enabled = true
rpc_url = "http://ledger.local:8899"
program_id = "GradeBook111111111111111111111111111111111"

[analytics]
attention_threshold = 60

[store]
classroom_policy = "archive"
"#,
        )
        .expect("parse");
        assert!(cfg.ledger.enabled);
        assert_eq!(cfg.ledger.timeout_ms, 5_000);
        assert_eq!(cfg.analytics.attention_threshold, 60);
        assert_eq!(cfg.analytics.pass_mark, 70);
        assert_eq!(cfg.store.classroom_policy, ClassroomPolicy::Archive);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(Config::from_toml("[analytics]\npass_mark = 120\n").is_err());
        assert!(Config::from_toml("[refresh]\ndashboard_secs = 0\n").is_err());
        assert!(Config::from_toml("[store]\nclassroom_policy = \"keep\"\n").is_err());
        assert!(Config::from_toml("[ledger]\nenabled = true\nrpc_url = \"\"\n").is_err());
    }

    #[test]
    fn rejects_activity_windows_outside_a_year() {
        assert!(
            Config::from_toml("[analytics]\nrecent_activity_hours = 9223372036854775807\n").is_err()
        );
        assert!(Config::from_toml("[analytics]\nrecent_activity_hours = 0\n").is_err());
        assert!(Config::from_toml("[analytics]\nteacher_window_days = -3\n").is_err());
        assert!(Config::from_toml("[analytics]\nteacher_window_days = 367\n").is_err());
        let cfg = Config::from_toml("[analytics]\nrecent_activity_hours = 8784\nteacher_window_days = 366\n")
            .expect("parse");
        assert_eq!(cfg.analytics.recent_activity_hours, 8784);
    }
}
