mod test_support;

use serde_json::json;
use std::io::Write;
use test_support::{
    authority, read_line_json, register, request, request_err, request_ok, select_workspace,
    spawn_sidecar, temp_dir,
};

#[test]
fn requests_before_workspace_select_are_rejected() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_null());
    assert_eq!(health["ledgerEnabled"], false);
    assert_eq!(
        request_err(&mut stdin, &mut reader, "2", "users.list", json!({})),
        "no_workspace"
    );
    assert_eq!(
        request_err(&mut stdin, &mut reader, "3", "grid.get", json!({})),
        "not_implemented"
    );
}

#[test]
fn malformed_lines_get_bad_json_and_the_loop_continues() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let resp = read_line_json(&mut reader);
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_json");
    let _ = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let teacher = authority("Teacher");
    let student = authority("Student");
    register(&mut stdin, &mut reader, &teacher, "ms-frizzle", "Teacher");
    register(&mut stdin, &mut reader, &student, "arnold", "Student");

    let calls = vec![
        ("users.list", json!({})),
        ("users.get", json!({ "authority": teacher })),
        ("classrooms.list", json!({})),
        ("grades.list", json!({})),
        ("store.readCollection", json!({ "name": "users" })),
        ("userData.get", json!({ "authority": student })),
        ("quarantine.list", json!({})),
        ("dashboard.admin", json!({})),
        ("dashboard.teacher", json!({ "authority": teacher })),
        ("dashboard.student", json!({ "authority": student })),
        ("dashboard.diagnostics", json!({})),
        ("analytics.rankings", json!({})),
        ("ledger.status", json!({})),
        (
            "export.json",
            json!({ "outPath": workspace.join("out.json").to_string_lossy() }),
        ),
        (
            "export.csv",
            json!({ "outPath": workspace.join("out.csv").to_string_lossy() }),
        ),
        (
            "backup.export",
            json!({ "outPath": workspace.join("backup.zip").to_string_lossy() }),
        ),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("c{}", i), method, params);
        assert_eq!(resp["ok"], true, "{} failed: {}", method, resp);
    }

    // Families whose happy path needs more setup still route.
    let routed = vec![
        ("classrooms.enroll", json!({ "classroomId": "missing", "student": student })),
        ("analytics.classAverage", json!({ "classroomId": "missing" })),
        ("ledger.network", json!({})),
        ("watch.stop", json!({ "watchId": "missing" })),
    ];
    for (i, (method, params)) in routed.into_iter().enumerate() {
        let code = request_err(&mut stdin, &mut reader, &format!("r{}", i), method, params);
        assert_ne!(code, "not_implemented", "{} is not routed", method);
    }

    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
