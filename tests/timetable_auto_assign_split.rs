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
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

#[test]
fn five_module_obligation_lands_as_three_plus_two() {
    let workspace = temp_dir("timetable-split");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let grid = request_ok(&mut stdin, &mut reader, "2", "grid.slots", json!({}));
    let morning: Vec<String> = grid["morning"]
        .as_array()
        .expect("morning slots")
        .iter()
        .map(|v| v.as_str().expect("slot label").to_string())
        .collect();

    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "name": "Mathematics" }),
    );
    let subject_id = str_field(&subject, "subjectId");
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.create",
        json!({ "name": "2nd Year A" }),
    );
    let course_id = str_field(&course, "courseId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.setCurriculum",
        json!({ "courseId": course_id, "subjectId": subject_id, "weeklyModules": 5 }),
    );

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.create",
        json!({ "name": "Rivera" }),
    );
    let teacher_id = str_field(&teacher, "teacherId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "teachers.assignSubject",
        json!({ "teacherId": teacher_id, "subjectId": subject_id, "courseId": course_id }),
    );

    // Monday slots 1-4 free, Tuesday slots 1-2 free.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "availability.setDay",
        json!({ "teacherId": teacher_id, "weekday": "mon", "slots": morning[0..4].to_vec() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "availability.setDay",
        json!({ "teacherId": teacher_id, "weekday": "tue", "slots": morning[0..2].to_vec() }),
    );

    let run = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "timetable.autoAssign",
        json!({ "teacherId": teacher_id }),
    );
    assert_eq!(run.get("placed").and_then(|v| v.as_i64()), Some(5));
    assert_eq!(
        run.get("errors").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    let week = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "timetable.week",
        json!({ "teacherId": teacher_id }),
    );
    let days = week["days"].as_array().expect("days");
    let cells_of = |day: &str| -> Vec<serde_json::Value> {
        days.iter()
            .find(|d| d["weekday"] == day)
            .expect("day present")["cells"]
            .as_array()
            .expect("cells")
            .clone()
    };

    // Monday 1-3 bound, Monday 4 still free, Tuesday 1-2 bound.
    let mon = cells_of("mon");
    for cell in mon.iter().take(3) {
        assert_eq!(cell["subjectId"].as_str(), Some(subject_id.as_str()));
        assert_eq!(cell["courseId"].as_str(), Some(course_id.as_str()));
    }
    assert_eq!(mon[3]["open"].as_bool(), Some(true));
    assert!(mon[3]["subjectId"].is_null());
    let tue = cells_of("tue");
    for cell in tue.iter().take(2) {
        assert_eq!(cell["subjectId"].as_str(), Some(subject_id.as_str()));
    }

    // Re-running with nothing left to place is a clean no-op.
    let rerun = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "timetable.autoAssign",
        json!({ "teacherId": teacher_id }),
    );
    assert_eq!(rerun.get("placed").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        rerun
            .get("errors")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}
