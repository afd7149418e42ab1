use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_required_id, require_db, snapshot_json};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::{json, Value};

fn ids(req: &Request) -> Result<(i64, i64), HandlerErr> {
    Ok((
        get_required_id(&req.params, "studentId")?,
        get_required_id(&req.params, "classId")?,
    ))
}

fn assignments_set(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let (student_id, class_id) = ids(req)?;
    store::assign_student(conn, student_id, class_id)?;
    Ok(json!({ "snapshot": snapshot_json(conn)? }))
}

fn assignments_remove(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let (student_id, class_id) = ids(req)?;
    let removed = store::unassign_student(conn, student_id, class_id)?;
    Ok(json!({
        "removed": removed,
        "snapshot": snapshot_json(conn)?
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "assignments.set" => assignments_set(state, req),
        "assignments.remove" => assignments_remove(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
