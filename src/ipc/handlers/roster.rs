use crate::ingest;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{require_db, snapshot_json};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::Path;

fn roster_snapshot(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    Ok(json!({ "snapshot": snapshot_json(conn)? }))
}

/// Upload-and-ingest. The file comes either from disk (`path`) or inline
/// (`csvText`); exactly one must be given.
fn roster_import(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let path = req.params.get("path").and_then(|v| v.as_str());
    let text = req.params.get("csvText").and_then(|v| v.as_str());

    let summary = match (path, text) {
        (Some(p), None) => ingest::ingest_file(conn, Path::new(p))?,
        (None, Some(t)) => ingest::ingest_csv(conn, t.as_bytes())?,
        (Some(_), Some(_)) => {
            return Err(HandlerErr::bad_params(
                "pass either path or csvText, not both",
            ))
        }
        (None, None) => return Err(HandlerErr::bad_params("missing path or csvText")),
    };

    Ok(json!({
        "inserted": summary.inserted,
        "skipped": summary.skipped,
        "snapshot": snapshot_json(conn)?
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "roster.snapshot" => roster_snapshot(state),
        "roster.import" => roster_import(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
