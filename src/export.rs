use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::path::Path;

use crate::calc;
use crate::config::AnalyticsConfig;
use crate::model::{grade_rows, Grade};
use crate::source::{Loaded, Origin};

pub const CSV_HEADER: &str = "Assignment,Student,Grade,MaxGrade,Percentage,Date";

fn write_file(out_path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    std::fs::write(out_path, bytes)
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))
}

fn origin_label(origin: Origin) -> &'static str {
    match origin {
        Origin::Ledger => "ledger",
        Origin::Local => "local",
    }
}

pub fn json_dump(loaded: &Loaded, now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "users": loaded.snapshot.users,
        "classrooms": loaded.snapshot.classrooms,
        "grades": grade_rows(&loaded.snapshot.grades),
        "exportedAt": now.to_rfc3339(),
        "source": origin_label(loaded.origin),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub path: String,
    pub records: usize,
    pub bytes: usize,
}

pub fn export_json(loaded: &Loaded, out_path: &Path) -> anyhow::Result<ExportResult> {
    let dump = json_dump(loaded, Utc::now());
    let text = serde_json::to_string_pretty(&dump).context("failed to serialize export")?;
    write_file(out_path, text.as_bytes())?;
    let s = &loaded.snapshot;
    Ok(ExportResult {
        path: out_path.to_string_lossy().to_string(),
        records: s.users.len() + s.classrooms.len() + s.grades.len(),
        bytes: text.len(),
    })
}

/// RFC 4180 field quoting.
pub fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// `YYYY-MM-DD` in UTC; empty for timestamps out of range.
pub fn grade_date(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

pub fn grades_csv(grades: &[Grade]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push_str("\r\n");
    for g in grades {
        let percentage = g.percentage().map(|p| p.to_string()).unwrap_or_default();
        let row = [
            csv_field(&g.assignment_name),
            csv_field(&g.student_wallet),
            g.grade.to_string(),
            g.max_grade.to_string(),
            percentage,
            grade_date(g.timestamp),
        ];
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out
}

pub fn export_csv(grades: &[Grade], out_path: &Path) -> anyhow::Result<ExportResult> {
    let text = grades_csv(grades);
    write_file(out_path, text.as_bytes())?;
    Ok(ExportResult {
        path: out_path.to_string_lossy().to_string(),
        records: grades.len(),
        bytes: text.len(),
    })
}

pub fn teacher_report(
    loaded: &Loaded,
    authority: &str,
    cfg: &AnalyticsConfig,
    now: DateTime<Utc>,
) -> serde_json::Value {
    let mine = calc::grades_for_teacher(&loaded.snapshot.grades, authority);
    let distribution = calc::grade_distribution(&mine);
    json!({
        "teacher": authority,
        "generatedAt": now.to_rfc3339(),
        "source": origin_label(loaded.origin),
        "stats": {
            "totalGrades": mine.len(),
            "averageGrade": calc::average_percentage(&mine),
            "distribution": distribution,
            "passRate": calc::rate_at_or_above(&mine, cfg.pass_mark),
            "excellenceRate": calc::rate_at_or_above(&mine, cfg.high_grade_threshold),
            "highest": calc::highest_percentage(&mine),
            "lowest": calc::lowest_percentage(&mine),
            "topPerformers": calc::top_performers(&mine, cfg.ranking_limit),
            "needsAttention": calc::needs_attention(&mine, cfg.attention_threshold, cfg.ranking_limit),
        },
        "grades": grade_rows(&mine),
    })
}

pub fn export_teacher_report(
    loaded: &Loaded,
    authority: &str,
    cfg: &AnalyticsConfig,
    out_path: &Path,
) -> anyhow::Result<ExportResult> {
    let report = teacher_report(loaded, authority, cfg, Utc::now());
    let text = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
    write_file(out_path, text.as_bytes())?;
    Ok(ExportResult {
        path: out_path.to_string_lossy().to_string(),
        records: report["grades"].as_array().map(|a| a.len()).unwrap_or(0),
        bytes: text.len(),
    })
}
