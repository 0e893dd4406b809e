use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    validate_score, Classroom, Grade, Role, StudentRef, User, RECORD_SCHEMA_VERSION,
};
use crate::userdata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Users,
    Classrooms,
    Grades,
    UserData,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Classrooms => "classrooms",
            Collection::Grades => "grades",
            Collection::UserData => "userData",
        }
    }

    /// Only the three record collections can be read or written wholesale.
    pub fn parse_record_collection(s: &str) -> Option<Collection> {
        match s {
            "users" => Some(Collection::Users),
            "classrooms" => Some(Collection::Classrooms),
            "grades" => Some(Collection::Grades),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub users: Vec<User>,
    pub classrooms: Vec<Classroom>,
    pub grades: Vec<Grade>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionRecords {
    Users(Vec<User>),
    Classrooms(Vec<Classroom>),
    Grades(Vec<Grade>),
}

impl CollectionRecords {
    pub fn collection(&self) -> Collection {
        match self {
            CollectionRecords::Users(_) => Collection::Users,
            CollectionRecords::Classrooms(_) => Collection::Classrooms,
            CollectionRecords::Grades(_) => Collection::Grades,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CollectionRecords::Users(v) => v.len(),
            CollectionRecords::Classrooms(v) => v.len(),
            CollectionRecords::Grades(v) => v.len(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CollectionRecords::Users(v) => json!(v),
            CollectionRecords::Classrooms(v) => json!(v),
            CollectionRecords::Grades(v) => json!(crate::model::grade_rows(v)),
        }
    }

    /// Decodes and normalises client-supplied records. Missing record ids are assigned.
    pub fn from_json(collection: Collection, records: &serde_json::Value) -> Result<Self> {
        let Some(items) = records.as_array() else {
            return Err(Error::validation("records must be an array"));
        };
        let mut out = match collection {
            Collection::Users => CollectionRecords::Users(Vec::new()),
            Collection::Classrooms => CollectionRecords::Classrooms(Vec::new()),
            Collection::Grades => CollectionRecords::Grades(Vec::new()),
            Collection::UserData => {
                return Err(Error::validation("userData is not a record collection"))
            }
        };
        for (i, item) in items.iter().enumerate() {
            let bad = |reason: String| Error::validation(format!("records[{}]: {}", i, reason));
            match &mut out {
                CollectionRecords::Users(v) => v.push(normalize_user(item).map_err(bad)?),
                CollectionRecords::Classrooms(v) => {
                    v.push(normalize_classroom(item).map_err(bad)?)
                }
                CollectionRecords::Grades(v) => v.push(normalize_grade(item).map_err(bad)?),
            }
        }
        Ok(out)
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<(String, Option<User>)> {
    let authority: String = r.get(0)?;
    let role: String = r.get(2)?;
    let user = Role::parse(&role).map(|role| User {
        authority: authority.clone(),
        username: r.get(1).unwrap_or_default(),
        role,
        created_at: r.get(3).unwrap_or(0),
        is_active: r.get::<_, i64>(4).unwrap_or(1) != 0,
    });
    Ok((authority, user))
}

pub fn read_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(
        "SELECT authority, username, role, created_at, is_active FROM users ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], user_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(key, user)| keep_valid("users", &key, user, User::validate))
        .collect())
}

pub fn get_user(conn: &Connection, authority: &str) -> Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT authority, username, role, created_at, is_active FROM users WHERE authority = ?",
            [authority],
            user_from_row,
        )
        .optional()?;
    Ok(row.and_then(|(key, user)| keep_valid("users", &key, user, User::validate)))
}

fn load_students(conn: &Connection, classroom_id: &str) -> Result<Vec<StudentRef>> {
    let mut stmt = conn.prepare(
        "SELECT pubkey FROM classroom_students WHERE classroom_id = ? ORDER BY sort_order",
    )?;
    let students = stmt
        .query_map([classroom_id], |r| Ok(StudentRef { pubkey: r.get(0)? }))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(students)
}

fn classroom_from_row(r: &Row<'_>) -> rusqlite::Result<Classroom> {
    Ok(Classroom {
        id: r.get(0)?,
        name: r.get(1)?,
        course: r.get(2)?,
        teacher: r.get(3)?,
        students: Vec::new(),
        created_at: r.get(4)?,
        is_active: r.get::<_, i64>(5)? != 0,
    })
}

pub fn read_classrooms(conn: &Connection) -> Result<Vec<Classroom>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, course, teacher, created_at, is_active FROM classrooms ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], classroom_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for mut c in rows {
        c.students = load_students(conn, &c.id)?;
        let key = c.id.clone();
        if let Some(c) = keep_valid("classrooms", &key, Some(c), Classroom::validate) {
            out.push(c);
        }
    }
    Ok(out)
}

pub fn get_classroom(conn: &Connection, id: &str) -> Result<Option<Classroom>> {
    let row = conn
        .query_row(
            "SELECT id, name, course, teacher, created_at, is_active FROM classrooms WHERE id = ?",
            [id],
            classroom_from_row,
        )
        .optional()?;
    match row {
        Some(mut c) => {
            c.students = load_students(conn, &c.id)?;
            Ok(Some(c))
        }
        None => Ok(None),
    }
}

pub fn read_grades(conn: &Connection) -> Result<Vec<Grade>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_wallet, teacher_wallet, assignment_name, grade, max_grade, timestamp
         FROM grades
         ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let grade: i64 = r.get(4)?;
            let max_grade: i64 = r.get(5)?;
            let parsed = validate_score(grade, max_grade).ok();
            Ok((
                id.clone(),
                parsed,
                Grade {
                    id,
                    student_wallet: r.get(1)?,
                    teacher_wallet: r.get(2)?,
                    assignment_name: r.get(3)?,
                    grade: 0,
                    max_grade: 0,
                    timestamp: r.get(6)?,
                },
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(key, score, mut g)| {
            let g = score.map(|(grade, max)| {
                g.grade = grade;
                g.max_grade = max;
                g
            });
            keep_valid("grades", &key, g, Grade::validate)
        })
        .collect())
}

/// Rows that no longer satisfy the record schema are logged and left out of reads.
fn keep_valid<T>(
    collection: &str,
    key: &str,
    record: Option<T>,
    validate: impl Fn(&T) -> Result<()>,
) -> Option<T> {
    let Some(record) = record else {
        tracing::warn!(collection, key, "skipping unreadable record");
        return None;
    };
    match validate(&record) {
        Ok(()) => Some(record),
        Err(e) => {
            tracing::warn!(collection, key, error = %e, "skipping non-conforming record");
            None
        }
    }
}

pub fn read_collection(conn: &Connection, collection: Collection) -> Result<CollectionRecords> {
    Ok(match collection {
        Collection::Users => CollectionRecords::Users(read_users(conn)?),
        Collection::Classrooms => CollectionRecords::Classrooms(read_classrooms(conn)?),
        Collection::Grades => CollectionRecords::Grades(read_grades(conn)?),
        Collection::UserData => {
            return Err(Error::validation("userData is not a record collection"))
        }
    })
}

pub fn load_snapshot(conn: &Connection) -> Result<Snapshot> {
    Ok(Snapshot {
        users: read_users(conn)?,
        classrooms: read_classrooms(conn)?,
        grades: read_grades(conn)?,
    })
}

fn put_user(conn: &Connection, u: &User) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO users(authority, username, role, created_at, is_active, schema_version)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &u.authority,
            &u.username,
            u.role.as_str(),
            u.created_at,
            u.is_active as i64,
            RECORD_SCHEMA_VERSION,
        ),
    )
}

fn put_classroom(conn: &Connection, c: &Classroom) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO classrooms(id, name, course, teacher, created_at, is_active, schema_version)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &c.id,
            &c.name,
            &c.course,
            &c.teacher,
            c.created_at,
            c.is_active as i64,
            RECORD_SCHEMA_VERSION,
        ),
    )?;
    for (i, s) in c.students.iter().enumerate() {
        conn.execute(
            "INSERT OR IGNORE INTO classroom_students(classroom_id, pubkey, sort_order) VALUES(?, ?, ?)",
            (&c.id, &s.pubkey, i as i64),
        )?;
    }
    Ok(())
}

fn put_grade(conn: &Connection, g: &Grade) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO grades(id, student_wallet, teacher_wallet, assignment_name, grade, max_grade, timestamp, schema_version)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &g.id,
            &g.student_wallet,
            &g.teacher_wallet,
            &g.assignment_name,
            g.grade as i64,
            g.max_grade as i64,
            g.timestamp,
            RECORD_SCHEMA_VERSION,
        ),
    )
}

fn user_exists(conn: &Connection, authority: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM users WHERE authority = ?", [authority], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

fn grade_exists(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM grades WHERE id = ?", [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

pub fn insert_user(conn: &Connection, user: &User) -> Result<()> {
    user.validate()?;
    if user_exists(conn, &user.authority)? {
        return Err(Error::Conflict(format!(
            "user {} is already registered",
            user.authority
        )));
    }
    put_user(conn, user)?;
    Ok(())
}

pub fn insert_classroom(conn: &Connection, classroom: &Classroom) -> Result<()> {
    classroom.validate()?;
    let tx = conn.unchecked_transaction()?;
    put_classroom(&tx, classroom)?;
    tx.commit()?;
    Ok(())
}

pub fn insert_grade(conn: &Connection, grade: &Grade) -> Result<()> {
    grade.validate()?;
    put_grade(conn, grade)?;
    Ok(())
}

pub fn enroll_student(conn: &Connection, classroom_id: &str, pubkey: &str) -> Result<Classroom> {
    let Some(classroom) = get_classroom(conn, classroom_id)? else {
        return Err(Error::not_found(format!("classroom {}", classroom_id)));
    };
    if classroom.has_student(pubkey) {
        return Err(Error::Conflict(format!(
            "{} is already enrolled in {}",
            pubkey, classroom.name
        )));
    }
    conn.execute(
        "INSERT INTO classroom_students(classroom_id, pubkey, sort_order)
         VALUES(?, ?, (SELECT COALESCE(MAX(sort_order), -1) + 1 FROM classroom_students WHERE classroom_id = ?))",
        (classroom_id, pubkey, classroom_id),
    )?;
    get_classroom(conn, classroom_id)?
        .ok_or_else(|| Error::not_found(format!("classroom {}", classroom_id)))
}

pub fn unenroll_student(conn: &Connection, classroom_id: &str, pubkey: &str) -> Result<()> {
    let n = conn.execute(
        "DELETE FROM classroom_students WHERE classroom_id = ? AND pubkey = ?",
        (classroom_id, pubkey),
    )?;
    if n == 0 {
        return Err(Error::not_found(format!(
            "enrollment of {} in classroom {}",
            pubkey, classroom_id
        )));
    }
    Ok(())
}

/// Replaces one collection inside a single transaction. Nothing is written unless
/// every record is valid and keys are unique.
pub fn write_collection(conn: &Connection, records: &CollectionRecords) -> Result<usize> {
    let mut seen = HashSet::new();
    let dup = |key: &str| Error::validation(format!("duplicate record key {}", key));
    match records {
        CollectionRecords::Users(v) => {
            for u in v {
                u.validate()?;
                if !seen.insert(u.authority.clone()) {
                    return Err(dup(&u.authority));
                }
            }
        }
        CollectionRecords::Classrooms(v) => {
            for c in v {
                c.validate()?;
                if !seen.insert(c.id.clone()) {
                    return Err(dup(&c.id));
                }
            }
        }
        CollectionRecords::Grades(v) => {
            for g in v {
                g.validate()?;
                if !seen.insert(g.id.clone()) {
                    return Err(dup(&g.id));
                }
            }
        }
    }

    let tx = conn.unchecked_transaction()?;
    match records {
        CollectionRecords::Users(v) => {
            tx.execute("DELETE FROM users", [])?;
            for u in v {
                put_user(&tx, u)?;
            }
        }
        CollectionRecords::Classrooms(v) => {
            tx.execute("DELETE FROM classroom_students", [])?;
            tx.execute("DELETE FROM classrooms", [])?;
            for c in v {
                put_classroom(&tx, c)?;
            }
        }
        CollectionRecords::Grades(v) => {
            tx.execute("DELETE FROM grades", [])?;
            for g in v {
                put_grade(&tx, g)?;
            }
        }
    }
    tx.commit()?;
    tracing::info!(
        collection = records.collection().as_str(),
        count = records.len(),
        "collection replaced"
    );
    Ok(records.len())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassroomPolicy {
    /// Classrooms owned by a removed teacher are deleted with their memberships.
    #[default]
    Delete,
    /// Classrooms are kept, inactive and without a teacher.
    Archive,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub authority: String,
    pub users_removed: usize,
    pub grades_removed: usize,
    pub classrooms_removed: usize,
    pub classrooms_archived: usize,
    pub memberships_removed: usize,
    pub user_data_removed: usize,
}

/// Removes a user and everything that depends on them.
///
/// Users, grades and classrooms change in one transaction. User-data files are removed
/// after the commit; a failure there is reported as `PartialFailure`.
pub fn cascade_delete_user(
    conn: &Connection,
    workspace: &Path,
    authority: &str,
    policy: ClassroomPolicy,
) -> Result<CascadeReport> {
    if !user_exists(conn, authority)? {
        return Err(Error::not_found(format!("user {}", authority)));
    }
    let mut report = CascadeReport {
        authority: authority.to_string(),
        ..CascadeReport::default()
    };

    let tx = conn.unchecked_transaction()?;
    report.grades_removed = tx.execute(
        "DELETE FROM grades WHERE student_wallet = ? OR teacher_wallet = ?",
        (authority, authority),
    )?;
    match policy {
        ClassroomPolicy::Delete => {
            tx.execute(
                "DELETE FROM classroom_students
                 WHERE classroom_id IN (SELECT id FROM classrooms WHERE teacher = ?)",
                [authority],
            )?;
            report.classrooms_removed =
                tx.execute("DELETE FROM classrooms WHERE teacher = ?", [authority])?;
        }
        ClassroomPolicy::Archive => {
            report.classrooms_archived = tx.execute(
                "UPDATE classrooms SET teacher = NULL, is_active = 0 WHERE teacher = ?",
                [authority],
            )?;
        }
    }
    report.memberships_removed =
        tx.execute("DELETE FROM classroom_students WHERE pubkey = ?", [authority])?;
    report.users_removed = tx.execute("DELETE FROM users WHERE authority = ?", [authority])?;
    tx.commit()?;

    match userdata::remove_scoped(workspace, authority) {
        Ok(n) => report.user_data_removed = n,
        Err(e) => {
            tracing::error!(authority, error = %e, "user data not removed after cascade delete");
            return Err(Error::PartialFailure {
                message: format!("records removed but user data was not: {}", e),
                applied: vec![Collection::Users, Collection::Grades, Collection::Classrooms],
                pending: vec![Collection::UserData],
            });
        }
    }

    tracing::info!(
        authority,
        grades = report.grades_removed,
        classrooms = report.classrooms_removed + report.classrooms_archived,
        "user deleted"
    );
    Ok(report)
}

fn str_field<'a>(v: &'a serde_json::Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| v.get(*k).and_then(|x| x.as_str()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn int_field(v: &serde_json::Value, key: &str) -> Option<i64> {
    let x = v.get(key)?;
    x.as_i64()
        .or_else(|| x.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        .or_else(|| x.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Normalises a loosely-shaped user record (role strings in any case, enum objects).
pub fn normalize_user(v: &serde_json::Value) -> std::result::Result<User, String> {
    let authority = str_field(v, &["authority"]).ok_or("missing authority")?;
    let username = str_field(v, &["username"]).ok_or("missing username")?;
    let role = v
        .get("role")
        .and_then(Role::from_value)
        .ok_or("missing or unknown role")?;
    let user = User {
        authority: authority.to_string(),
        username: username.to_string(),
        role,
        created_at: int_field(v, "createdAt").unwrap_or_else(|| Utc::now().timestamp()),
        is_active: v.get("isActive").and_then(|x| x.as_bool()).unwrap_or(true),
    };
    user.validate().map_err(|e| e.to_string())?;
    Ok(user)
}

pub fn normalize_classroom(v: &serde_json::Value) -> std::result::Result<Classroom, String> {
    let name = str_field(v, &["name"]).ok_or("missing name")?;
    let mut students = Vec::new();
    if let Some(list) = v.get("students").and_then(|s| s.as_array()) {
        for s in list {
            let pubkey = s
                .as_str()
                .or_else(|| s.get("pubkey").and_then(|p| p.as_str()))
                .ok_or("student entry without pubkey")?;
            if !students.iter().any(|x: &StudentRef| x.pubkey == pubkey) {
                students.push(StudentRef {
                    pubkey: pubkey.to_string(),
                });
            }
        }
    }
    let classroom = Classroom {
        id: str_field(v, &["id"])
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: name.to_string(),
        course: str_field(v, &["course"]).unwrap_or("").to_string(),
        teacher: str_field(v, &["teacher"]).map(str::to_string),
        students,
        created_at: int_field(v, "createdAt").unwrap_or_else(|| Utc::now().timestamp()),
        is_active: v.get("isActive").and_then(|x| x.as_bool()).unwrap_or(true),
    };
    classroom.validate().map_err(|e| e.to_string())?;
    Ok(classroom)
}

/// Accepts `teacherWallet` or `gradedBy`; any stored `percentage` is ignored.
pub fn normalize_grade(v: &serde_json::Value) -> std::result::Result<Grade, String> {
    let grade = int_field(v, "grade").ok_or("missing grade")?;
    let max_grade = int_field(v, "maxGrade").ok_or("missing maxGrade")?;
    let (grade, max_grade) = validate_score(grade, max_grade).map_err(|e| e.to_string())?;
    let g = Grade {
        id: str_field(v, &["id"])
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        student_wallet: str_field(v, &["studentWallet"])
            .ok_or("missing studentWallet")?
            .to_string(),
        teacher_wallet: str_field(v, &["teacherWallet", "gradedBy"])
            .ok_or("missing teacherWallet")?
            .to_string(),
        assignment_name: str_field(v, &["assignmentName"])
            .ok_or("missing assignmentName")?
            .to_string(),
        grade,
        max_grade,
        timestamp: int_field(v, "timestamp").unwrap_or_else(|| Utc::now().timestamp_millis()),
    };
    g.validate().map_err(|e| e.to_string())?;
    Ok(g)
}

fn quarantine(
    conn: &Connection,
    collection: Collection,
    key: Option<&str>,
    payload: &serde_json::Value,
    reason: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO quarantine(id, collection, record_key, payload, reason, quarantined_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            collection.as_str(),
            key,
            payload.to_string(),
            reason,
            now_rfc3339(),
        ),
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantinedRecord {
    pub id: String,
    pub collection: String,
    pub record_key: Option<String>,
    pub payload: serde_json::Value,
    pub reason: String,
    pub quarantined_at: String,
}

pub fn quarantine_list(conn: &Connection) -> Result<Vec<QuarantinedRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, collection, record_key, payload, reason, quarantined_at
         FROM quarantine
         ORDER BY quarantined_at, rowid",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let payload: String = r.get(3)?;
            Ok(QuarantinedRecord {
                id: r.get(0)?,
                collection: r.get(1)?,
                record_key: r.get(2)?,
                payload: serde_json::from_str(&payload)
                    .unwrap_or(serde_json::Value::String(payload)),
                reason: r.get(4)?,
                quarantined_at: r.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub users: usize,
    pub classrooms: usize,
    pub grades: usize,
    pub quarantined: usize,
}

/// Values in a browser storage dump are usually JSON encoded as strings.
fn decode_dump_value(v: &serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::String(s) => {
            serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.clone()))
        }
        other => other.clone(),
    }
}

fn dump_array(dump: &serde_json::Map<String, serde_json::Value>, key: &str) -> Vec<serde_json::Value> {
    match dump.get(key).map(decode_dump_value) {
        Some(serde_json::Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Imports a key/value dump of the browser-side store (`all_users`, `user_<authority>`,
/// `all_classrooms`, `all_grades`). Conforming records are inserted; anything else,
/// including keys already present in the workspace, goes to the quarantine table.
pub fn import_local_storage_dump(conn: &Connection, dump: &serde_json::Value) -> Result<ImportSummary> {
    let Some(map) = dump.as_object() else {
        return Err(Error::validation("dump must be a JSON object of key/value pairs"));
    };
    let mut summary = ImportSummary::default();
    let tx = conn.unchecked_transaction()?;

    let mut raw_users = dump_array(map, "all_users");
    let mut user_keys: Vec<&String> = map.keys().filter(|k| k.starts_with("user_")).collect();
    user_keys.sort();
    for k in user_keys {
        raw_users.push(decode_dump_value(&map[k.as_str()]));
    }
    let mut seen_users = HashSet::new();
    for raw in &raw_users {
        let key = str_field(raw, &["authority"]);
        let user = match normalize_user(raw) {
            Ok(u) => u,
            Err(reason) => {
                quarantine(&tx, Collection::Users, key, raw, &reason)?;
                summary.quarantined += 1;
                continue;
            }
        };
        // user_<authority> entries repeat all_users; the first copy wins.
        if !seen_users.insert(user.authority.clone()) {
            continue;
        }
        if user_exists(&tx, &user.authority)? {
            quarantine(&tx, Collection::Users, key, raw, "authority already registered")?;
            summary.quarantined += 1;
            continue;
        }
        put_user(&tx, &user)?;
        summary.users += 1;
    }

    for raw in dump_array(map, "all_classrooms") {
        let key = str_field(&raw, &["id", "name"]);
        let classroom = match normalize_classroom(&raw) {
            Ok(c) => c,
            Err(reason) => {
                quarantine(&tx, Collection::Classrooms, key, &raw, &reason)?;
                summary.quarantined += 1;
                continue;
            }
        };
        if get_classroom(&tx, &classroom.id)?.is_some() {
            quarantine(&tx, Collection::Classrooms, key, &raw, "classroom id already present")?;
            summary.quarantined += 1;
            continue;
        }
        put_classroom(&tx, &classroom)?;
        summary.classrooms += 1;
    }

    let mut seen_grades = HashSet::new();
    for raw in dump_array(map, "all_grades") {
        let key = str_field(&raw, &["id", "assignmentName"]);
        let grade = match normalize_grade(&raw) {
            Ok(g) => g,
            Err(reason) => {
                quarantine(&tx, Collection::Grades, key, &raw, &reason)?;
                summary.quarantined += 1;
                continue;
            }
        };
        let taken = !seen_grades.insert(grade.id.clone()) || grade_exists(&tx, &grade.id)?;
        if taken {
            quarantine(&tx, Collection::Grades, key, &raw, "grade id already present")?;
            summary.quarantined += 1;
            continue;
        }
        put_grade(&tx, &grade)?;
        summary.grades += 1;
    }

    tx.commit()?;
    tracing::info!(
        users = summary.users,
        classrooms = summary.classrooms,
        grades = summary.grades,
        quarantined = summary.quarantined,
        "local storage dump imported"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn addr(seed: &str) -> String {
        format!("{:1<44}", seed)
    }

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    fn user(seed: &str, role: Role) -> User {
        User {
            authority: addr(seed),
            username: seed.to_string(),
            role,
            created_at: 1,
            is_active: true,
        }
    }

    fn grade(id: &str, student: &str, teacher: &str) -> Grade {
        Grade {
            id: id.to_string(),
            student_wallet: addr(student),
            teacher_wallet: addr(teacher),
            assignment_name: "Quiz".to_string(),
            grade: 8,
            max_grade: 10,
            timestamp: 5,
        }
    }

    #[test]
    fn insert_user_rejects_duplicates() {
        let conn = mem();
        insert_user(&conn, &user("Ann", Role::Teacher)).expect("insert");
        let err = insert_user(&conn, &user("Ann", Role::Teacher)).expect_err("dup");
        assert_eq!(err.code(), "conflict");
        assert_eq!(read_users(&conn).expect("read").len(), 1);
    }

    #[test]
    fn corrupt_rows_are_skipped_on_read() {
        let conn = mem();
        insert_grade(&conn, &grade("g1", "Stu", "Tea")).expect("insert");
        conn.execute(
            "INSERT INTO grades(id, student_wallet, teacher_wallet, assignment_name, grade, max_grade, timestamp)
             VALUES('bad', ?, ?, 'Quiz', 5, 0, 1)",
            (addr("Stu"), addr("Tea")),
        )
        .expect("raw insert");
        conn.execute(
            "INSERT INTO users(authority, username, role, created_at) VALUES(?, 'x', 'Janitor', 0)",
            [addr("Jan")],
        )
        .expect("raw insert");
        let grades = read_grades(&conn).expect("read");
        assert_eq!(grades.len(), 1);
        assert_eq!(grades[0].id, "g1");
        assert!(read_users(&conn).expect("read").is_empty());
    }

    #[test]
    fn write_collection_is_all_or_nothing() {
        let conn = mem();
        insert_grade(&conn, &grade("g0", "Stu", "Tea")).expect("insert");
        let mut bad = grade("g2", "Stu", "Tea");
        bad.grade = 11;
        let records = CollectionRecords::Grades(vec![grade("g1", "Stu", "Tea"), bad]);
        assert!(write_collection(&conn, &records).is_err());
        let ids: Vec<String> = read_grades(&conn).expect("read").into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec!["g0".to_string()]);

        let records = CollectionRecords::Grades(vec![grade("g2", "Stu", "Tea"), grade("g1", "Stu", "Tea")]);
        assert_eq!(write_collection(&conn, &records).expect("write"), 2);
        let ids: Vec<String> = read_grades(&conn).expect("read").into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec!["g2".to_string(), "g1".to_string()]);
    }

    #[test]
    fn enrollment_keeps_order_and_rejects_duplicates() {
        let conn = mem();
        let c = Classroom {
            id: "c1".into(),
            name: "Algebra".into(),
            course: "MATH".into(),
            teacher: Some(addr("Tea")),
            students: vec![],
            created_at: 0,
            is_active: true,
        };
        insert_classroom(&conn, &c).expect("insert");
        enroll_student(&conn, "c1", &addr("Bob")).expect("enroll");
        let after = enroll_student(&conn, "c1", &addr("Amy")).expect("enroll");
        assert_eq!(after.students[0].pubkey, addr("Bob"));
        assert_eq!(after.students[1].pubkey, addr("Amy"));
        assert_eq!(
            enroll_student(&conn, "c1", &addr("Bob")).expect_err("dup").code(),
            "conflict"
        );
        assert_eq!(
            enroll_student(&conn, "nope", &addr("Bob")).expect_err("missing").code(),
            "not_found"
        );
        unenroll_student(&conn, "c1", &addr("Bob")).expect("unenroll");
        assert_eq!(get_classroom(&conn, "c1").expect("get").expect("some").students.len(), 1);
    }

    #[test]
    fn archive_policy_detaches_teacher() {
        let conn = mem();
        let dir = std::env::temp_dir().join(format!("gradebook-store-{}", Uuid::new_v4()));
        insert_user(&conn, &user("Tea", Role::Teacher)).expect("teacher");
        let c = Classroom {
            id: "c1".into(),
            name: "Algebra".into(),
            course: "MATH".into(),
            teacher: Some(addr("Tea")),
            students: vec![StudentRef { pubkey: addr("Stu") }],
            created_at: 0,
            is_active: true,
        };
        insert_classroom(&conn, &c).expect("classroom");
        let report =
            cascade_delete_user(&conn, &dir, &addr("Tea"), ClassroomPolicy::Archive).expect("delete");
        assert_eq!(report.classrooms_archived, 1);
        let kept = get_classroom(&conn, "c1").expect("get").expect("kept");
        assert_eq!(kept.teacher, None);
        assert!(!kept.is_active);
        assert_eq!(kept.students.len(), 1);
    }

    #[test]
    fn import_quarantines_bad_records() {
        let conn = mem();
        let dump = json!({
            "all_users": serde_json::to_string(&json!([
                { "authority": addr("Tea"), "username": "tea", "role": "teacher", "createdAt": 1 },
                { "authority": "bad", "username": "x", "role": "Student" }
            ])).expect("json"),
            "all_grades": [
                { "studentWallet": addr("Stu"), "gradedBy": addr("Tea"), "assignmentName": "Quiz",
                  "grade": 9, "maxGrade": 10, "percentage": 10, "timestamp": 3 },
                { "studentWallet": addr("Stu"), "teacherWallet": addr("Tea"), "assignmentName": "Quiz",
                  "grade": 12, "maxGrade": 10, "timestamp": 4 }
            ]
        });
        let mut dump = dump;
        dump[format!("user_{}", addr("Tea"))] =
            json!({ "authority": addr("Tea"), "username": "tea", "role": "Teacher" });
        let summary = import_local_storage_dump(&conn, &dump).expect("import");
        assert_eq!(summary.users, 1);
        assert_eq!(summary.grades, 1);
        assert_eq!(summary.quarantined, 2);
        let q = quarantine_list(&conn).expect("list");
        assert_eq!(q.len(), 2);
        assert!(q.iter().any(|r| r.collection == "grades"));
        let grades = read_grades(&conn).expect("grades");
        assert_eq!(grades[0].percentage(), Some(90));
    }
}
