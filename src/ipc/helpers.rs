use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(|| HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".into(),
        details: None,
    })
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_id(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing/invalid {}", key)))
}

pub fn get_id_list(params: &Value, key: &str) -> Result<Vec<i64>, HandlerErr> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing/invalid {}", key)));
    };
    arr.iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integers", key)))
        })
        .collect()
}

/// Full roster state, returned after every mutation so callers can redraw.
pub fn snapshot_json(conn: &Connection) -> Result<Value, HandlerErr> {
    let snap = store::snapshot(conn)?;
    Ok(json!(snap))
}
