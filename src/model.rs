use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Version stamped on every stored record. Bump together with a migration in `db`.
pub const RECORD_SCHEMA_VERSION: i64 = 1;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Teacher,
    Student,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Teacher => "Teacher",
            Role::Student => "Student",
            Role::Admin => "Admin",
        }
    }

    /// Accepts "Teacher", "teacher", "TEACHER".
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Decodes `"Teacher"` as well as the enum-object form `{"teacher": {}}`.
    pub fn from_value(v: &serde_json::Value) -> Option<Role> {
        match v {
            serde_json::Value::String(s) => Role::parse(s),
            serde_json::Value::Object(map) if map.len() == 1 => {
                map.keys().next().and_then(|k| Role::parse(k))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub authority: String,
    pub username: String,
    pub role: Role,
    /// Seconds since epoch.
    pub created_at: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRef {
    pub pubkey: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub course: String,
    /// `None` only for archived classrooms whose teacher was removed.
    pub teacher: Option<String>,
    #[serde(default)]
    pub students: Vec<StudentRef>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Classroom {
    pub fn has_student(&self, authority: &str) -> bool {
        self.students.iter().any(|s| s.pubkey == authority)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    #[serde(default)]
    pub id: String,
    pub student_wallet: String,
    #[serde(alias = "gradedBy")]
    pub teacher_wallet: String,
    pub assignment_name: String,
    pub grade: u32,
    pub max_grade: u32,
    /// Milliseconds since epoch.
    pub timestamp: i64,
}

impl Grade {
    /// `round(grade / max_grade * 100)`, or `None` for a record that cannot be scored
    /// (`max_grade == 0` or `grade > max_grade`). Never stored.
    pub fn percentage(&self) -> Option<u32> {
        if self.max_grade == 0 || self.grade > self.max_grade {
            return None;
        }
        let p = self.grade as f64 / self.max_grade as f64 * 100.0;
        Some(round_half_up(p) as u32)
    }
}

/// A grade as returned to clients: the record plus its derived percentage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRow<'a> {
    #[serde(flatten)]
    pub grade: &'a Grade,
    pub percentage: Option<u32>,
}

impl<'a> From<&'a Grade> for GradeRow<'a> {
    fn from(grade: &'a Grade) -> Self {
        GradeRow {
            grade,
            percentage: grade.percentage(),
        }
    }
}

pub fn grade_rows<'a, I>(grades: I) -> Vec<GradeRow<'a>>
where
    I: IntoIterator<Item = &'a Grade>,
{
    grades.into_iter().map(GradeRow::from).collect()
}

/// `serialize_with` helper for owned grade lists in views and exports.
pub fn serialize_with_percentage<S>(grades: &[Grade], s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.collect_seq(grades.iter().map(GradeRow::from))
}

/// Records that carry a point in time, normalised to milliseconds.
pub trait Timestamped {
    fn timestamp_ms(&self) -> i64;
}

impl Timestamped for Grade {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp
    }
}

impl Timestamped for User {
    fn timestamp_ms(&self) -> i64 {
        self.created_at.saturating_mul(1000)
    }
}

impl Timestamped for Classroom {
    fn timestamp_ms(&self) -> i64 {
        self.created_at.saturating_mul(1000)
    }
}

/// Half-up rounding, `floor(x + 0.5)`.
pub fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

/// One-decimal half-up rounding: `floor(10x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

fn default_true() -> bool {
    true
}

pub fn validate_authority(field: &str, value: &str) -> Result<()> {
    let v = value.trim();
    if v.is_empty() {
        return Err(Error::validation(format!("{} must not be empty", field)));
    }
    if !(32..=44).contains(&v.len()) || !v.chars().all(|c| BASE58_ALPHABET.contains(c)) {
        return Err(Error::validation(format!(
            "{} is not a valid account address",
            field
        )));
    }
    Ok(())
}

pub fn require_text(field: &str, value: &str) -> Result<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(Error::validation(format!("{} must not be empty", field)));
    }
    Ok(v.to_string())
}

pub fn validate_score(grade: i64, max_grade: i64) -> Result<(u32, u32)> {
    if max_grade <= 0 {
        return Err(Error::validation("maxGrade must be greater than 0"));
    }
    if grade < 0 {
        return Err(Error::validation("grade must not be negative"));
    }
    if grade > max_grade {
        return Err(Error::validation("grade cannot exceed maxGrade"));
    }
    let max = u32::try_from(max_grade).map_err(|_| Error::validation("maxGrade is too large"))?;
    Ok((grade as u32, max))
}

impl User {
    pub fn validate(&self) -> Result<()> {
        validate_authority("authority", &self.authority)?;
        require_text("username", &self.username)?;
        Ok(())
    }
}

impl Classroom {
    pub fn validate(&self) -> Result<()> {
        require_text("id", &self.id)?;
        require_text("name", &self.name)?;
        match &self.teacher {
            Some(t) => validate_authority("teacher", t)?,
            None if self.is_active => {
                return Err(Error::validation("active classroom must have a teacher"))
            }
            None => {}
        }
        for s in &self.students {
            validate_authority("students[].pubkey", &s.pubkey)?;
        }
        Ok(())
    }
}

impl Grade {
    pub fn validate(&self) -> Result<()> {
        require_text("id", &self.id)?;
        validate_authority("studentWallet", &self.student_wallet)?;
        validate_authority("teacherWallet", &self.teacher_wallet)?;
        require_text("assignmentName", &self.assignment_name)?;
        validate_score(self.grade as i64, self.max_grade as i64)?;
        Ok(())
    }
}
