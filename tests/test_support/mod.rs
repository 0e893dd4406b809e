#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}-{}-{}",
        prefix,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

/// A 44-character base58 account address derived from `seed`.
pub fn authority(seed: &str) -> String {
    format!("{:1<44}", seed)
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with(&[], &[])
}

pub fn spawn_sidecar_with(
    args: &[&str],
    env: &[(&str, &str)],
) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut cmd = Command::new(exe);
    cmd.args(args)
        .env_remove("GRADEBOOKD_CONFIG")
        .env_remove("GRADEBOOKD_WORKSPACE")
        .env_remove("RUST_LOG")
        .env("NO_PROXY", "127.0.0.1,localhost")
        .env("no_proxy", "127.0.0.1,localhost")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    for (k, v) in env {
        cmd.env(k, v);
    }
    let mut child = cmd.spawn().expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_line_json(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read line");
    assert!(!line.trim().is_empty(), "sidecar closed its output");
    serde_json::from_str(line.trim()).expect("parse line json")
}

/// Sends one request and returns its response, skipping watch event lines.
pub fn request(
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
    loop {
        let value = read_line_json(reader);
        if value.get("event").is_some() {
            continue;
        }
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
        return value;
    }
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

/// Sends a request expected to fail and returns the error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().unwrap_or("").to_string()
}

pub fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    )
}

pub fn register(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    authority: &str,
    username: &str,
    role: &str,
) {
    let res = request_ok(
        stdin,
        reader,
        &format!("reg-{}", username),
        "users.register",
        json!({ "authority": authority, "username": username, "role": role }),
    );
    assert_eq!(res["origin"], "local");
}

pub fn assign(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    teacher: &str,
    student: &str,
    assignment: &str,
    grade: i64,
    max_grade: i64,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        &format!("assign-{}", assignment),
        "grades.assign",
        json!({
            "teacher": teacher,
            "student": student,
            "assignmentName": assignment,
            "grade": grade,
            "maxGrade": max_grade,
        }),
    )
}
