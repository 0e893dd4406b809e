//! Admin, teacher, student and diagnostics views composed from `calc`.

use serde::Serialize;
use serde_json::{json, Value};

use crate::calc::{
    self, DistributionShares, GradeDistribution, RoleCounts, StudentAverage, SubjectSummary, DAY_MS,
    HOUR_MS,
};
use crate::config::AnalyticsConfig;
use crate::model::{round_half_up, round_off_1_decimal, serialize_with_percentage, Classroom, Grade, User};
use crate::store::Snapshot;

const ADMIN_GRADE_LIST: usize = 20;
const LATEST_GRADES: usize = 5;
const DIAGNOSTIC_TAIL: usize = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminView {
    pub total_users: usize,
    pub total_classrooms: usize,
    pub total_grades: usize,
    pub active_users: usize,
    pub active_percent: f64,
    pub roles: RoleCounts,
    pub average_grade: u32,
    /// Grades recorded in the last `recent_activity_hours`.
    pub recent_activity: usize,
    pub distribution: GradeDistribution,
    pub distribution_shares: DistributionShares,
    #[serde(serialize_with = "serialize_with_percentage")]
    pub grades: Vec<Grade>,
    #[serde(serialize_with = "serialize_with_percentage")]
    pub recent_high_grades: Vec<Grade>,
    pub classrooms: Vec<ClassroomSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomSummary {
    pub id: String,
    pub name: String,
    pub course: String,
    pub teacher: Option<String>,
    pub student_count: usize,
    pub average: u32,
    pub is_active: bool,
}

fn summarize(classroom: &Classroom, grades: &[Grade]) -> ClassroomSummary {
    ClassroomSummary {
        id: classroom.id.clone(),
        name: classroom.name.clone(),
        course: classroom.course.clone(),
        teacher: classroom.teacher.clone(),
        student_count: classroom.students.len(),
        average: calc::class_average(classroom, grades),
        is_active: classroom.is_active,
    }
}

pub fn admin(snapshot: &Snapshot, cfg: &AnalyticsConfig, now_ms: i64) -> AdminView {
    let Snapshot {
        users,
        classrooms,
        grades,
    } = snapshot;
    let active = calc::active_users(users);
    let distribution = calc::grade_distribution(grades);
    AdminView {
        total_users: users.len(),
        total_classrooms: classrooms.len(),
        total_grades: grades.len(),
        active_users: active,
        active_percent: round_off_1_decimal(calc::ratio_percent(active, users.len())),
        roles: calc::role_counts(users),
        average_grade: calc::average_percentage(grades),
        recent_activity: calc::recent_activity_count(
            grades,
            cfg.recent_activity_hours.saturating_mul(HOUR_MS),
            now_ms,
        ),
        distribution,
        distribution_shares: calc::distribution_shares(&distribution),
        grades: grades.iter().take(ADMIN_GRADE_LIST).cloned().collect(),
        recent_high_grades: calc::recent_high_grades(
            grades,
            cfg.high_grade_threshold,
            cfg.ranking_limit,
        )
        .into_iter()
        .cloned()
        .collect(),
        classrooms: classrooms.iter().map(|c| summarize(c, grades)).collect(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherView {
    pub teacher: String,
    pub username: Option<String>,
    pub total_grades: usize,
    pub average_grade: u32,
    /// Grades this teacher recorded in the last `teacher_window_days`.
    pub recent_grades: usize,
    pub distribution: GradeDistribution,
    pub distribution_shares: DistributionShares,
    pub pass_rate: u32,
    pub excellence_rate: u32,
    pub highest: Option<u32>,
    pub lowest: Option<u32>,
    pub top_performers: Vec<StudentAverage>,
    pub needs_attention: Vec<StudentAverage>,
    pub subjects: Vec<SubjectSummary>,
    pub classrooms: Vec<ClassroomSummary>,
    #[serde(serialize_with = "serialize_with_percentage")]
    pub latest: Vec<Grade>,
}

fn username_of(users: &[User], authority: &str) -> Option<String> {
    users
        .iter()
        .find(|u| u.authority == authority)
        .map(|u| u.username.clone())
}

pub fn teacher(snapshot: &Snapshot, authority: &str, cfg: &AnalyticsConfig, now_ms: i64) -> TeacherView {
    let mine = calc::grades_for_teacher(&snapshot.grades, authority);
    let distribution = calc::grade_distribution(&mine);
    let mut latest = mine.clone();
    latest.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    latest.truncate(LATEST_GRADES);
    TeacherView {
        teacher: authority.to_string(),
        username: username_of(&snapshot.users, authority),
        total_grades: mine.len(),
        average_grade: calc::average_percentage(&mine),
        recent_grades: calc::recent_activity_count(
            &mine,
            cfg.teacher_window_days.saturating_mul(DAY_MS),
            now_ms,
        ),
        distribution,
        distribution_shares: calc::distribution_shares(&distribution),
        pass_rate: calc::rate_at_or_above(&mine, cfg.pass_mark),
        excellence_rate: calc::rate_at_or_above(&mine, cfg.high_grade_threshold),
        highest: calc::highest_percentage(&mine),
        lowest: calc::lowest_percentage(&mine),
        top_performers: calc::top_performers(&mine, cfg.ranking_limit),
        needs_attention: calc::needs_attention(&mine, cfg.attention_threshold, cfg.ranking_limit),
        subjects: calc::grades_by_subject(&mine),
        classrooms: calc::classrooms_for_teacher(&snapshot.classrooms, authority)
            .iter()
            .map(|c| summarize(c, &snapshot.grades))
            .collect(),
        latest,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub student: String,
    pub username: Option<String>,
    pub total_grades: usize,
    pub average_grade: u32,
    pub classroom_count: usize,
    pub distribution: GradeDistribution,
    pub distribution_shares: DistributionShares,
    pub highest: Option<u32>,
    pub lowest: Option<u32>,
    pub subjects: Vec<SubjectSummary>,
    pub classrooms: Vec<ClassroomSummary>,
    /// Newest first.
    #[serde(serialize_with = "serialize_with_percentage")]
    pub grades: Vec<Grade>,
    #[serde(serialize_with = "serialize_with_percentage")]
    pub latest: Vec<Grade>,
}

pub fn student(snapshot: &Snapshot, authority: &str) -> StudentView {
    let grades = calc::grades_for_student(&snapshot.grades, authority);
    let classrooms = calc::classrooms_for_student(&snapshot.classrooms, authority);
    let distribution = calc::grade_distribution(&grades);
    StudentView {
        student: authority.to_string(),
        username: username_of(&snapshot.users, authority),
        total_grades: grades.len(),
        average_grade: calc::average_percentage(&grades),
        classroom_count: classrooms.len(),
        distribution,
        distribution_shares: calc::distribution_shares(&distribution),
        highest: calc::highest_percentage(&grades),
        lowest: calc::lowest_percentage(&grades),
        subjects: calc::grades_by_subject(&grades),
        classrooms: classrooms
            .iter()
            .map(|c| summarize(c, &snapshot.grades))
            .collect(),
        latest: grades.iter().take(LATEST_GRADES).cloned().collect(),
        grades,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Good,
    Warning,
    Critical,
}

pub fn user_count_status(n: usize) -> Status {
    if n > 50 {
        Status::Good
    } else if n > 20 {
        Status::Warning
    } else {
        Status::Critical
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: &'static str,
    pub value: Value,
    pub unit: &'static str,
    pub status: Status,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub name: &'static str,
    pub count: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsView {
    pub total_users: usize,
    pub active_users: usize,
    pub teachers: usize,
    pub students: usize,
    pub collections: Vec<CollectionStats>,
    pub metrics: Vec<Metric>,
    pub latest_users: Vec<User>,
    #[serde(serialize_with = "serialize_with_percentage")]
    pub latest_grades: Vec<Grade>,
}

fn tail<T: Clone>(items: &[T], n: usize) -> Vec<T> {
    items[items.len().saturating_sub(n)..].to_vec()
}

pub fn diagnostics(snapshot: &Snapshot, ledger_connected: bool, refresh_secs: u64) -> DiagnosticsView {
    let roles = calc::role_counts(&snapshot.users);
    let collections = vec![
        CollectionStats {
            name: "users",
            count: snapshot.users.len(),
            bytes: calc::storage_footprint(&snapshot.users),
        },
        CollectionStats {
            name: "classrooms",
            count: snapshot.classrooms.len(),
            bytes: calc::storage_footprint(&snapshot.classrooms),
        },
        CollectionStats {
            name: "grades",
            count: snapshot.grades.len(),
            bytes: calc::storage_footprint(&snapshot.grades),
        },
    ];
    let total_bytes: usize = collections.iter().map(|c| c.bytes).sum();
    let metrics = vec![
        Metric {
            name: "Total Users",
            value: json!(snapshot.users.len()),
            unit: "users",
            status: user_count_status(snapshot.users.len()),
            description: "Total registered users in the system",
        },
        Metric {
            name: "Ledger Connection",
            value: json!(if ledger_connected { 1 } else { 0 }),
            unit: "connections",
            status: if ledger_connected { Status::Good } else { Status::Warning },
            description: "Whether reads are served by the ledger",
        },
        Metric {
            name: "Data Refresh Rate",
            value: json!(refresh_secs),
            unit: "seconds",
            status: Status::Good,
            description: "How often diagnostics are refreshed",
        },
        Metric {
            name: "Storage Size",
            value: json!(round_half_up(total_bytes as f64 / 1024.0) as u64),
            unit: "KB",
            status: Status::Good,
            description: "Serialised size of all collections",
        },
    ];
    DiagnosticsView {
        total_users: roles.total,
        active_users: calc::active_users(&snapshot.users),
        teachers: roles.teacher,
        students: roles.student,
        collections,
        metrics,
        latest_users: tail(&snapshot.users, DIAGNOSTIC_TAIL),
        latest_grades: tail(&snapshot.grades, DIAGNOSTIC_TAIL),
    }
}
