use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_timetabled");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn timetabled");
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

#[test]
fn health_reports_before_any_workspace_is_selected() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"].as_bool(), Some(true));
    assert_eq!(health["result"]["status"].as_str(), Some("ok"));
    assert!(health["result"]["workspacePath"].is_null());
}

#[test]
fn store_backed_methods_are_gated_on_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let denied = request(
        &mut stdin,
        &mut reader,
        "1",
        "teachers.create",
        json!({ "name": "Ortiz" }),
    );
    assert_eq!(denied["ok"].as_bool(), Some(false));
    assert_eq!(denied["error"]["code"].as_str(), Some("no_workspace"));
}

#[test]
fn unknown_methods_get_a_stable_error_code() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let unknown = request(
        &mut stdin,
        &mut reader,
        "1",
        "timetable.optimize",
        json!({}),
    );
    assert_eq!(unknown["ok"].as_bool(), Some(false));
    assert_eq!(unknown["error"]["code"].as_str(), Some("not_implemented"));
}

#[test]
fn slot_catalogue_is_available_without_a_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let grid = request(&mut stdin, &mut reader, "1", "grid.slots", json!({}));
    assert_eq!(grid["ok"].as_bool(), Some(true));
    let result = &grid["result"];
    assert_eq!(
        result["weekdays"].as_array().map(|a| a.len()),
        Some(5),
        "{}",
        result
    );
    assert_eq!(result["morning"].as_array().map(|a| a.len()), Some(8));
    assert_eq!(result["afternoon"].as_array().map(|a| a.len()), Some(11));
}
