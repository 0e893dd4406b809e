use rusqlite::Connection;
use serde_json::json;

use crate::calc;
use crate::config::Config;
use crate::dashboard;
use crate::error::{Error, Result};
use crate::ipc::error::respond;
use crate::ipc::handlers::{load, now_ms};
use crate::ipc::helpers::{opt_i64_param, opt_str_param, opt_usize_param, str_param};
use crate::ipc::types::{AppState, Request};
use crate::ledger::Ledger;
use crate::model::validate_authority;
use crate::source::{self, Origin};

/// A dashboard that can be rendered on request or on every watch tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    Admin,
    Teacher(String),
    Student(String),
    Diagnostics,
}

impl View {
    pub fn parse(name: &str, authority: Option<String>) -> Result<View> {
        let scoped = |authority: Option<String>| -> Result<String> {
            let a = authority
                .ok_or_else(|| Error::validation(format!("view {} needs params.authority", name)))?;
            validate_authority("authority", &a)?;
            Ok(a)
        };
        match name {
            "admin" => Ok(View::Admin),
            "teacher" => Ok(View::Teacher(scoped(authority)?)),
            "student" => Ok(View::Student(scoped(authority)?)),
            "diagnostics" => Ok(View::Diagnostics),
            other => Err(Error::validation(format!("unknown view: {}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            View::Admin => "admin",
            View::Teacher(_) => "teacher",
            View::Student(_) => "student",
            View::Diagnostics => "diagnostics",
        }
    }

    pub fn default_period_secs(&self, config: &Config) -> u64 {
        match self {
            View::Diagnostics => config.refresh.diagnostics_secs,
            _ => config.refresh.dashboard_secs,
        }
    }
}

/// One full read through the record source, then the view on top of it.
pub fn render_view(
    view: &View,
    conn: &Connection,
    ledger: Option<&dyn Ledger>,
    config: &Config,
) -> Result<serde_json::Value> {
    let loaded = source::load(conn, ledger)?;
    let snapshot = &loaded.snapshot;
    let cfg = &config.analytics;
    let mut out = match view {
        View::Admin => serde_json::to_value(dashboard::admin(snapshot, cfg, now_ms()))?,
        View::Teacher(a) => serde_json::to_value(dashboard::teacher(snapshot, a, cfg, now_ms()))?,
        View::Student(a) => serde_json::to_value(dashboard::student(snapshot, a))?,
        View::Diagnostics => serde_json::to_value(dashboard::diagnostics(
            snapshot,
            loaded.origin == Origin::Ledger,
            config.refresh.diagnostics_secs,
        ))?,
    };
    if let Some(map) = out.as_object_mut() {
        map.insert("origin".to_string(), json!(loaded.origin));
        map.insert("notice".to_string(), json!(loaded.notice));
    }
    Ok(out)
}

fn handle_dashboard(state: &AppState, req: &Request, name: &str) -> Result<serde_json::Value> {
    let view = View::parse(name, opt_str_param(req, "authority"))?;
    render_view(&view, state.conn()?, state.ledger(), &state.config)
}

fn handle_rankings(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let cfg = &state.config.analytics;
    let limit = opt_usize_param(req, "limit")?.unwrap_or(cfg.ranking_limit);
    let threshold = match opt_i64_param(req, "threshold")? {
        Some(t) if !(0..=100).contains(&t) => {
            return Err(Error::validation("threshold must be between 0 and 100"))
        }
        Some(t) => t as u32,
        None => cfg.attention_threshold,
    };
    let loaded = load(state)?;
    let teacher = opt_str_param(req, "teacher");
    let grades = match &teacher {
        Some(t) => calc::grades_for_teacher(&loaded.snapshot.grades, t),
        None => loaded.snapshot.grades.clone(),
    };
    Ok(json!({
        "teacher": teacher,
        "averages": calc::per_student_averages(&grades),
        "topPerformers": calc::top_performers(&grades, limit),
        "needsAttention": calc::needs_attention(&grades, threshold, limit),
        "threshold": threshold,
        "origin": loaded.origin,
        "notice": loaded.notice,
    }))
}

fn handle_class_average(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let classroom_id = str_param(req, "classroomId")?;
    let loaded = load(state)?;
    let classroom = loaded
        .snapshot
        .classrooms
        .iter()
        .find(|c| c.id == classroom_id)
        .ok_or_else(|| Error::not_found(format!("classroom {}", classroom_id)))?;
    Ok(json!({
        "classroomId": classroom.id,
        "studentCount": classroom.students.len(),
        "average": calc::class_average(classroom, &loaded.snapshot.grades),
        "origin": loaded.origin,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "dashboard.admin" => handle_dashboard(state, req, "admin"),
        "dashboard.teacher" => handle_dashboard(state, req, "teacher"),
        "dashboard.student" => handle_dashboard(state, req, "student"),
        "dashboard.diagnostics" => handle_dashboard(state, req, "diagnostics"),
        "analytics.rankings" => handle_rankings(state, req),
        "analytics.classAverage" => handle_class_average(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
