//! Aggregation engine: pure functions from the three collections to derived views.
//!
//! Nothing here touches storage or fails. Grades that cannot be scored
//! (`Grade::percentage() == None`) contribute nothing, and every ratio with a zero
//! denominator is 0.

use serde::Serialize;
use std::collections::HashMap;

use crate::model::{round_half_up, round_off_1_decimal, Classroom, Grade, Role, Timestamped, User};

pub const HOUR_MS: i64 = 60 * 60 * 1000;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// `part / whole * 100`, 0 when `whole == 0`.
pub fn ratio_percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

fn valid_percentages(grades: &[Grade]) -> impl Iterator<Item = u32> + '_ {
    grades.iter().filter_map(Grade::percentage)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleCounts {
    pub total: usize,
    pub teacher: usize,
    pub student: usize,
    pub admin: usize,
    pub teacher_percent: f64,
    pub student_percent: f64,
    pub admin_percent: f64,
}

pub fn role_counts(users: &[User]) -> RoleCounts {
    let mut out = RoleCounts {
        total: users.len(),
        ..RoleCounts::default()
    };
    for u in users {
        match u.role {
            Role::Teacher => out.teacher += 1,
            Role::Student => out.student += 1,
            Role::Admin => out.admin += 1,
        }
    }
    out.teacher_percent = round_off_1_decimal(ratio_percent(out.teacher, out.total));
    out.student_percent = round_off_1_decimal(ratio_percent(out.student, out.total));
    out.admin_percent = round_off_1_decimal(ratio_percent(out.admin, out.total));
    out
}

pub fn active_users(users: &[User]) -> usize {
    users.iter().filter(|u| u.is_active).count()
}

/// Mean of the canonical per-grade percentages, rounded. 0 for no valid grades.
pub fn average_percentage<'a, I>(grades: I) -> u32
where
    I: IntoIterator<Item = &'a Grade>,
{
    let mut sum: u64 = 0;
    let mut count: u64 = 0;
    for p in grades.into_iter().filter_map(Grade::percentage) {
        sum += p as u64;
        count += 1;
    }
    if count == 0 {
        return 0;
    }
    round_half_up(sum as f64 / count as f64) as u32
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeDistribution {
    /// [90, 100]
    pub a: usize,
    /// [80, 90)
    pub b: usize,
    /// [70, 80)
    pub c: usize,
    /// [0, 70)
    pub d: usize,
    /// Records with no valid percentage; not in any bucket.
    pub excluded: usize,
}

impl GradeDistribution {
    pub fn bucketed(&self) -> usize {
        self.a + self.b + self.c + self.d
    }
}

pub fn grade_distribution<'a, I>(grades: I) -> GradeDistribution
where
    I: IntoIterator<Item = &'a Grade>,
{
    let mut out = GradeDistribution::default();
    for g in grades {
        match g.percentage() {
            Some(p) if p >= 90 => out.a += 1,
            Some(p) if p >= 80 => out.b += 1,
            Some(p) if p >= 70 => out.c += 1,
            Some(_) => out.d += 1,
            None => out.excluded += 1,
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionShares {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
}

/// Each bucket as a rounded share of the bucketed grades.
pub fn distribution_shares(dist: &GradeDistribution) -> DistributionShares {
    let n = dist.bucketed();
    let share = |k: usize| round_half_up(ratio_percent(k, n)) as u32;
    DistributionShares {
        a: share(dist.a),
        b: share(dist.b),
        c: share(dist.c),
        d: share(dist.d),
    }
}

/// Records whose timestamp lies in `[now_ms - window_ms, now_ms]`.
pub fn recent_activity_count<T: Timestamped>(records: &[T], window_ms: i64, now_ms: i64) -> usize {
    let from = now_ms.saturating_sub(window_ms);
    records
        .iter()
        .filter(|r| {
            let t = r.timestamp_ms();
            t >= from && t <= now_ms
        })
        .count()
}

/// Size in bytes of the collection's JSON serialisation. Informational only.
pub fn storage_footprint<T: Serialize>(records: &[T]) -> usize {
    serde_json::to_vec(records).map(|v| v.len()).unwrap_or(0)
}

pub fn passing_count(grades: &[Grade], pass_mark: u32) -> usize {
    valid_percentages(grades).filter(|p| *p >= pass_mark).count()
}

/// Share of valid grades at or above `mark`, rounded.
pub fn rate_at_or_above(grades: &[Grade], mark: u32) -> u32 {
    let valid = valid_percentages(grades).count();
    round_half_up(ratio_percent(passing_count(grades, mark), valid)) as u32
}

pub fn highest_percentage(grades: &[Grade]) -> Option<u32> {
    valid_percentages(grades).max()
}

pub fn lowest_percentage(grades: &[Grade]) -> Option<u32> {
    valid_percentages(grades).min()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAverage {
    pub student_wallet: String,
    pub sum: u64,
    pub count: u64,
    pub average: u32,
}

/// Grades grouped by student in first-appearance order.
pub fn per_student_averages(grades: &[Grade]) -> Vec<StudentAverage> {
    let mut out: Vec<StudentAverage> = Vec::new();
    let mut idx: HashMap<&str, usize> = HashMap::new();
    for g in grades {
        let Some(p) = g.percentage() else {
            continue;
        };
        let i = *idx.entry(g.student_wallet.as_str()).or_insert_with(|| {
            out.push(StudentAverage {
                student_wallet: g.student_wallet.clone(),
                sum: 0,
                count: 0,
                average: 0,
            });
            out.len() - 1
        });
        out[i].sum += p as u64;
        out[i].count += 1;
    }
    for s in &mut out {
        s.average = round_half_up(s.sum as f64 / s.count as f64) as u32;
    }
    out
}

pub fn top_performers(grades: &[Grade], n: usize) -> Vec<StudentAverage> {
    let mut all = per_student_averages(grades);
    // sort_by is stable: ties keep first-appearance order.
    all.sort_by(|a, b| b.average.cmp(&a.average));
    all.truncate(n);
    all
}

pub fn needs_attention(grades: &[Grade], threshold: u32, n: usize) -> Vec<StudentAverage> {
    let mut low: Vec<StudentAverage> = per_student_averages(grades)
        .into_iter()
        .filter(|s| s.average < threshold)
        .collect();
    low.sort_by(|a, b| a.average.cmp(&b.average));
    low.truncate(n);
    low
}

pub fn class_average(classroom: &Classroom, grades: &[Grade]) -> u32 {
    average_percentage(
        grades
            .iter()
            .filter(|g| classroom.has_student(&g.student_wallet)),
    )
}

/// High grades, newest first.
pub fn recent_high_grades(grades: &[Grade], threshold: u32, n: usize) -> Vec<&Grade> {
    let mut out: Vec<&Grade> = grades
        .iter()
        .filter(|g| g.percentage().map(|p| p >= threshold).unwrap_or(false))
        .collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out.truncate(n);
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub subject: String,
    pub count: usize,
    pub average: u32,
}

/// Groups by the first word of the assignment name ("Math Quiz 1" -> "Math").
pub fn grades_by_subject(grades: &[Grade]) -> Vec<SubjectSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Grade>> = HashMap::new();
    for g in grades {
        let subject = g
            .assignment_name
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string();
        groups
            .entry(subject.clone())
            .or_insert_with(|| {
                order.push(subject.clone());
                Vec::new()
            })
            .push(g);
    }
    order
        .into_iter()
        .map(|subject| {
            let members = groups.remove(&subject).unwrap_or_default();
            SubjectSummary {
                count: members.len(),
                average: average_percentage(members.iter().copied()),
                subject,
            }
        })
        .collect()
}

/// Newest first; equal timestamps keep input order.
pub fn grades_for_student(grades: &[Grade], authority: &str) -> Vec<Grade> {
    let mut out: Vec<Grade> = grades
        .iter()
        .filter(|g| g.student_wallet == authority)
        .cloned()
        .collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out
}

pub fn grades_for_teacher(grades: &[Grade], authority: &str) -> Vec<Grade> {
    grades
        .iter()
        .filter(|g| g.teacher_wallet == authority)
        .cloned()
        .collect()
}

pub fn classrooms_for_student(classrooms: &[Classroom], authority: &str) -> Vec<Classroom> {
    classrooms
        .iter()
        .filter(|c| c.has_student(authority))
        .cloned()
        .collect()
}

pub fn classrooms_for_teacher(classrooms: &[Classroom], authority: &str) -> Vec<Classroom> {
    classrooms
        .iter()
        .filter(|c| c.teacher.as_deref() == Some(authority))
        .cloned()
        .collect()
}

pub fn search_users(users: &[User], query: &str) -> Vec<User> {
    let q = query.trim();
    if q.is_empty() {
        return users.to_vec();
    }
    let q_lower = q.to_lowercase();
    users
        .iter()
        .filter(|u| u.username.to_lowercase().contains(&q_lower) || u.authority.contains(q))
        .cloned()
        .collect()
}
