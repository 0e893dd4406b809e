use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::calc;
use crate::error::{Error, Result};
use crate::ipc::error::respond;
use crate::ipc::handlers::load;
use crate::ipc::helpers::{opt_str_param, str_param};
use crate::ipc::types::{AppState, Request};
use crate::model::{require_text, validate_authority, Classroom, Role, User};
use crate::source::Origin;
use crate::store;

fn check_role(user: Option<&User>, authority: &str, role: Role) -> Result<()> {
    let user = user
        .ok_or_else(|| Error::not_found(format!("{} {}", role.as_str().to_lowercase(), authority)))?;
    if user.role != role {
        return Err(Error::validation(format!(
            "{} is a {}, not a {}",
            authority,
            user.role.as_str(),
            role.as_str()
        )));
    }
    Ok(())
}

/// The referenced user must exist with the given role.
pub(crate) fn require_role(users: &[User], authority: &str, role: Role) -> Result<()> {
    check_role(users.iter().find(|u| u.authority == authority), authority, role)
}

fn handle_classrooms_list(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let loaded = load(state)?;
    let classrooms = if let Some(teacher) = opt_str_param(req, "teacher") {
        calc::classrooms_for_teacher(&loaded.snapshot.classrooms, &teacher)
    } else if let Some(student) = opt_str_param(req, "student") {
        calc::classrooms_for_student(&loaded.snapshot.classrooms, &student)
    } else {
        loaded.snapshot.classrooms.clone()
    };
    Ok(json!({
        "classrooms": classrooms,
        "origin": loaded.origin,
        "notice": loaded.notice,
    }))
}

fn handle_classrooms_create(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let teacher = str_param(req, "teacher")?;
    validate_authority("teacher", &teacher)?;
    let name = require_text("name", &opt_str_param(req, "name").unwrap_or_default())?;
    let course = require_text("course", &opt_str_param(req, "course").unwrap_or_default())?;

    let loaded = load(state)?;
    require_role(&loaded.snapshot.users, &teacher, Role::Teacher)?;

    if loaded.origin == Origin::Ledger {
        if let Some(ledger) = state.ledger() {
            let tx = ledger.create_classroom(&teacher, &name, &course)?;
            return Ok(json!({ "origin": "ledger", "txId": tx }));
        }
    }

    let classroom = Classroom {
        id: Uuid::new_v4().to_string(),
        name,
        course,
        teacher: Some(teacher),
        students: Vec::new(),
        created_at: Utc::now().timestamp(),
        is_active: true,
    };
    store::insert_classroom(state.conn()?, &classroom)?;
    tracing::info!(id = %classroom.id, name = %classroom.name, "classroom created");
    Ok(json!({ "origin": "local", "classroom": classroom }))
}

fn handle_classrooms_enroll(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let classroom_id = str_param(req, "classroomId")?;
    let student = str_param(req, "student")?;
    validate_authority("student", &student)?;
    let conn = state.conn()?;
    check_role(store::get_user(conn, &student)?.as_ref(), &student, Role::Student)?;
    let classroom = store::enroll_student(conn, &classroom_id, &student)?;
    tracing::info!(classroom = %classroom_id, student = %student, "student enrolled");
    Ok(json!({ "classroom": classroom }))
}

fn handle_classrooms_unenroll(state: &AppState, req: &Request) -> Result<serde_json::Value> {
    let classroom_id = str_param(req, "classroomId")?;
    let student = str_param(req, "student")?;
    let conn = state.conn()?;
    store::unenroll_student(conn, &classroom_id, &student)?;
    let classroom = store::get_classroom(conn, &classroom_id)?;
    Ok(json!({ "classroom": classroom }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classrooms.list" => handle_classrooms_list(state, req),
        "classrooms.create" => handle_classrooms_create(state, req),
        "classrooms.enroll" => handle_classrooms_enroll(state, req),
        "classrooms.unenroll" => handle_classrooms_unenroll(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
