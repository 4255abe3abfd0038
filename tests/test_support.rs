#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        uuid::Uuid::new_v4().simple()
    ));
    std::fs::create_dir_all(&dir).expect("create temp workspace");
    dir
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_rollcalld"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollcalld sidecar");
    let stdin = child.stdin.take().expect("sidecar stdin");
    let reader = BufReader::new(child.stdout.take().expect("sidecar stdout"));
    (child, stdin, reader)
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let line = serde_json::json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");
    let mut resp_line = String::new();
    reader.read_line(&mut resp_line).expect("read response");
    serde_json::from_str(&resp_line).expect("parse response line")
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let resp = request(stdin, reader, id, method, params);
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "request {} failed: {}",
        method,
        resp
    );
    resp.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let resp = request(stdin, reader, id, method, params);
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "request {} unexpectedly succeeded: {}",
        method,
        resp
    );
    resp.get("error").cloned().unwrap_or(serde_json::Value::Null)
}

/// Select a fresh workspace and create one faculty + course; returns the
/// course id. Most scenarios start exactly here.
pub fn setup_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
    course_name: &str,
    course_code: &str,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        serde_json::json!({ "path": workspace.to_string_lossy() }),
    );
    let faculty = request_ok(
        stdin,
        reader,
        "setup-fac",
        "faculty.create",
        serde_json::json!({ "name": "Dr. Iyer" }),
    );
    let faculty_id = faculty
        .get("id")
        .and_then(|v| v.as_str())
        .expect("faculty id")
        .to_string();
    let course = request_ok(
        stdin,
        reader,
        "setup-course",
        "courses.create",
        serde_json::json!({ "name": course_name, "code": course_code, "facultyId": faculty_id }),
    );
    course
        .get("id")
        .and_then(|v| v.as_str())
        .expect("course id")
        .to_string()
}
