use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .env_remove("ROSTERD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value.pointer("/error/code").and_then(|v| v.as_str())
}

fn class_order(snapshot: &serde_json::Value) -> Vec<String> {
    snapshot
        .get("classes")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| c.get("name").and_then(|v| v.as_str()).map(|s| s.to_string()))
        .collect()
}

fn members_of(snapshot: &serde_json::Value, class_id: i64) -> Vec<String> {
    snapshot
        .get("classes")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .find(|c| c.get("id").and_then(|v| v.as_i64()) == Some(class_id))
        .and_then(|c| c.get("students").and_then(|v| v.as_array()).cloned())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| s.get("name").and_then(|v| v.as_str()).map(|s| s.to_string()))
        .collect()
}

fn pool(snapshot: &serde_json::Value) -> Vec<String> {
    snapshot
        .get("unassigned")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| s.get("name").and_then(|v| v.as_str()).map(|s| s.to_string()))
        .collect()
}

fn student_id_by_name(snapshot: &serde_json::Value, name: &str) -> i64 {
    snapshot
        .get("unassigned")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.get("name").and_then(|v| v.as_str()) == Some(name))
        .and_then(|s| s.get("id").and_then(|v| v.as_i64()))
        .expect("student in unassigned pool")
}

#[test]
fn assign_move_and_remove_students() {
    let workspace = temp_dir("rosterd-assignments");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.import",
        json!({ "csvText": "name,student_id,gender\nAlice,S1,M\nBob,S2,F\n" }),
    );
    let snap = imported.get("snapshot").expect("snapshot");
    let alice = student_id_by_name(snap, "Alice");
    let bob = student_id_by_name(snap, "Bob");

    let c1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "1A" }),
    )
    .get("classId")
    .and_then(|v| v.as_i64())
    .expect("1A id");
    let c2 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "name": "1B" }),
    )
    .get("classId")
    .and_then(|v| v.as_i64())
    .expect("1B id");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assignments.set",
        json!({ "studentId": alice, "classId": c1 }),
    );
    let snap = res.get("snapshot").expect("snapshot");
    assert_eq!(members_of(snap, c1), vec!["Alice"]);
    assert_eq!(pool(snap), vec!["Bob"]);

    // Assigning elsewhere moves rather than duplicates.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assignments.set",
        json!({ "studentId": alice, "classId": c2 }),
    );
    let snap = res.get("snapshot").expect("snapshot");
    assert!(members_of(snap, c1).is_empty());
    assert_eq!(members_of(snap, c2), vec!["Alice"]);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assignments.set",
        json!({ "studentId": bob, "classId": c2 }),
    );
    assert_eq!(
        members_of(res.get("snapshot").expect("snapshot"), c2),
        vec!["Alice", "Bob"]
    );

    // Removing from the wrong class is a no-op.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "assignments.remove",
        json!({ "studentId": bob, "classId": c1 }),
    );
    assert_eq!(res.get("removed"), Some(&json!(false)));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "assignments.remove",
        json!({ "studentId": bob, "classId": c2 }),
    );
    assert_eq!(res.get("removed"), Some(&json!(true)));
    let snap = res.get("snapshot").expect("snapshot");
    assert_eq!(members_of(snap, c2), vec!["Alice"]);
    assert_eq!(pool(snap), vec!["Bob"]);

    let missing = request(
        &mut stdin,
        &mut reader,
        "10",
        "assignments.set",
        json!({ "studentId": 9999, "classId": c1 }),
    );
    assert_eq!(error_code(&missing), Some("not_found"));
    assert_eq!(
        missing.pointer("/error/details/entity"),
        Some(&json!("student"))
    );

    let bad = request(
        &mut stdin,
        &mut reader,
        "11",
        "assignments.set",
        json!({ "studentId": "abc", "classId": c1 }),
    );
    assert_eq!(error_code(&bad), Some("bad_params"));
}

#[test]
fn classes_reorder_and_move() {
    let workspace = temp_dir("rosterd-class-order");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let mut ids = Vec::new();
    for (i, name) in ["1A", "1B", "1C"].iter().enumerate() {
        let res = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{i}"),
            "classes.create",
            json!({ "name": name }),
        );
        ids.push(res.get("classId").and_then(|v| v.as_i64()).expect("classId"));
    }

    let blank = request(
        &mut stdin,
        &mut reader,
        "blank",
        "classes.create",
        json!({ "name": "   " }),
    );
    assert_eq!(error_code(&blank), Some("invalid_input"));
    let nameless = request(
        &mut stdin,
        &mut reader,
        "nameless",
        "classes.create",
        json!({}),
    );
    assert_eq!(error_code(&nameless), Some("bad_params"));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.reorder",
        json!({ "orderedClassIds": [ids[1], ids[0]] }),
    );
    assert_eq!(
        class_order(res.get("snapshot").expect("snapshot")),
        vec!["1B", "1A", "1C"]
    );

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.move",
        json!({ "classId": ids[2], "direction": "up" }),
    );
    assert_eq!(res.get("moved"), Some(&json!(true)));
    assert_eq!(
        class_order(res.get("snapshot").expect("snapshot")),
        vec!["1B", "1C", "1A"]
    );

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.move",
        json!({ "classId": ids[1], "direction": "up" }),
    );
    assert_eq!(res.get("moved"), Some(&json!(false)));

    let unknown = request(
        &mut stdin,
        &mut reader,
        "5",
        "classes.reorder",
        json!({ "orderedClassIds": [ids[0], 424242] }),
    );
    assert_eq!(error_code(&unknown), Some("not_found"));
    let dup = request(
        &mut stdin,
        &mut reader,
        "6",
        "classes.reorder",
        json!({ "orderedClassIds": [ids[0], ids[0]] }),
    );
    assert_eq!(error_code(&dup), Some("invalid_input"));
    let sideways = request(
        &mut stdin,
        &mut reader,
        "7",
        "classes.move",
        json!({ "classId": ids[0], "direction": "left" }),
    );
    assert_eq!(error_code(&sideways), Some("bad_params"));

    let listed = request_ok(&mut stdin, &mut reader, "8", "classes.list", json!({}));
    assert_eq!(class_order(&listed), vec!["1B", "1C", "1A"]);
}
