use serde_json::json;
use uuid::Uuid;

use crate::calc;
use crate::error::{Error, Result};
use crate::ipc::error::respond;
use crate::ipc::handlers::classrooms::require_role;
use crate::ipc::handlers::{load, now_ms};
use crate::ipc::helpers::{i64_param, opt_str_param, str_param};
use crate::ipc::types::{AppState, Request};
use crate::model::{grade_rows, require_text, validate_authority, validate_score, Grade, Role};
use crate::source::Origin;
use crate::store;

fn handle_grades_list(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let loaded = load(state)?;
    let grades = if let Some(student) = opt_str_param(req, "student") {
        calc::grades_for_student(&loaded.snapshot.grades, &student)
    } else if let Some(teacher) = opt_str_param(req, "teacher") {
        calc::grades_for_teacher(&loaded.snapshot.grades, &teacher)
    } else {
        loaded.snapshot.grades.clone()
    };
    Ok(json!({
        "grades": grade_rows(&grades),
        "origin": loaded.origin,
        "notice": loaded.notice,
    }))
}

/// All checks run before anything is written.
fn handle_grades_assign(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let teacher = str_param(req, "teacher")?;
    let student = str_param(req, "student")?;
    validate_authority("teacher", &teacher)?;
    validate_authority("student", &student)?;
    let assignment_name = require_text(
        "assignmentName",
        &opt_str_param(req, "assignmentName").unwrap_or_default(),
    )?;
    let (grade, max_grade) = validate_score(i64_param(req, "grade")?, i64_param(req, "maxGrade")?)?;
    if teacher == student {
        return Err(Error::validation("a teacher cannot grade themselves"));
    }

    let loaded = load(state)?;
    require_role(&loaded.snapshot.users, &teacher, Role::Teacher)?;
    require_role(&loaded.snapshot.users, &student, Role::Student)?;

    if loaded.origin == Origin::Ledger {
        if let Some(ledger) = state.ledger() {
            let tx = ledger.add_grade(&teacher, &student, &assignment_name, grade, max_grade)?;
            return Ok(json!({ "origin": "ledger", "txId": tx }));
        }
    }

    let record = Grade {
        id: Uuid::new_v4().to_string(),
        student_wallet: student,
        teacher_wallet: teacher,
        assignment_name,
        grade,
        max_grade,
        timestamp: now_ms(),
    };
    store::insert_grade(state.conn()?, &record)?;
    tracing::info!(id = %record.id, student = %record.student_wallet, "grade assigned");
    Ok(json!({
        "origin": "local",
        "grade": grade_rows([&record]).pop(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.list" => handle_grades_list(state, req),
        "grades.assign" => handle_grades_assign(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
