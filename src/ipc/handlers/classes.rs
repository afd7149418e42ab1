use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    get_id_list, get_required_id, get_required_str, require_db, snapshot_json,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Direction;
use crate::store;
use serde_json::{json, Value};

fn classes_list(state: &AppState) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "classes": [] }));
    };
    Ok(json!({ "classes": store::list_classes_with_members(conn)? }))
}

fn classes_create(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    // Blank names are left to the store, which reports invalid_input.
    let Some(name) = req.params.get("name").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing name"));
    };
    let class = store::create_class(conn, name)?;
    Ok(json!({
        "classId": class.id,
        "class": class,
        "snapshot": snapshot_json(conn)?
    }))
}

fn classes_reorder(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let ordered = get_id_list(&req.params, "orderedClassIds")?;
    store::reorder_classes(conn, &ordered)?;
    Ok(json!({ "snapshot": snapshot_json(conn)? }))
}

fn classes_move(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_id = get_required_id(&req.params, "classId")?;
    let direction = get_required_str(&req.params, "direction")?;
    let Some(direction) = Direction::parse(&direction) else {
        return Err(HandlerErr::bad_params("direction must be up or down"));
    };
    let moved = store::move_class(conn, class_id, direction)?;
    Ok(json!({
        "moved": moved,
        "snapshot": snapshot_json(conn)?
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "classes.list" => classes_list(state),
        "classes.create" => classes_create(state, req),
        "classes.reorder" => classes_reorder(state, req),
        "classes.move" => classes_move(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
