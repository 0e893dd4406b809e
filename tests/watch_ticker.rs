mod test_support;

use serde_json::json;
use std::io::Write;
use test_support::{
    authority, read_line_json, register, request, request_err, request_ok, select_workspace,
    spawn_sidecar, temp_dir,
};

#[test]
fn watch_pushes_ticks_until_stopped() {
    let workspace = temp_dir("gradebook-watch-ticks");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    register(&mut stdin, &mut reader, &authority("Teacher"), "frizzle", "Teacher");

    writeln!(
        stdin,
        "{}",
        json!({ "id": "w1", "method": "watch.start", "params": { "view": "admin", "intervalMs": 30 } })
    )
    .expect("write");
    stdin.flush().expect("flush");

    // The first tick may arrive before the response.
    let mut watch_id = None;
    let mut ticks = Vec::new();
    while watch_id.is_none() || ticks.len() < 3 {
        let line = read_line_json(&mut reader);
        if line["event"] == "watch.tick" {
            assert_eq!(line["result"]["totalUsers"], 1);
            assert_eq!(line["result"]["origin"], "local");
            ticks.push(line);
        } else {
            assert_eq!(line["id"], "w1");
            assert_eq!(line["ok"], true);
            watch_id = line["result"]["watchId"].as_str().map(str::to_string);
        }
    }
    let watch_id = watch_id.expect("watch id");
    for (i, t) in ticks.iter().enumerate() {
        assert_eq!(t["watchId"], watch_id.as_str());
        assert_eq!(t["tick"], i as u64 + 1);
    }

    let health = request_ok(&mut stdin, &mut reader, "h1", "health", json!({}));
    assert_eq!(health["watches"], 1);

    let stopped = request(
        &mut stdin,
        &mut reader,
        "s1",
        "watch.stop",
        json!({ "watchId": watch_id }),
    );
    assert_eq!(stopped["ok"], true);

    // Nothing is emitted once the stop response is out.
    std::thread::sleep(std::time::Duration::from_millis(150));
    writeln!(stdin, "{}", json!({ "id": "h2", "method": "health", "params": {} })).expect("write");
    stdin.flush().expect("flush");
    let next = read_line_json(&mut reader);
    assert!(next.get("event").is_none(), "tick after stop: {}", next);
    assert_eq!(next["id"], "h2");
    assert_eq!(next["result"]["watches"], 0);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "s2",
            "watch.stop",
            json!({ "watchId": watch_id })
        ),
        "not_found"
    );
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn watch_start_validates_its_parameters() {
    let workspace = temp_dir("gradebook-watch-params");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "0",
            "watch.start",
            json!({ "view": "admin" })
        ),
        "no_workspace"
    );
    select_workspace(&mut stdin, &mut reader, &workspace);
    let cases = vec![
        json!({ "view": "admin", "intervalMs": 5 }),
        json!({ "view": "grid" }),
        json!({ "view": "teacher" }),
        json!({}),
    ];
    for (i, params) in cases.into_iter().enumerate() {
        assert_eq!(
            request_err(&mut stdin, &mut reader, &format!("c{}", i), "watch.start", params),
            "bad_params"
        );
    }
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn selecting_a_workspace_stops_running_watches() {
    let workspace = temp_dir("gradebook-watch-reselect");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let started = request_ok(
        &mut stdin,
        &mut reader,
        "w",
        "watch.start",
        json!({ "view": "diagnostics", "intervalMs": 1000 }),
    );
    assert_eq!(started["intervalMs"], 1000);
    select_workspace(&mut stdin, &mut reader, &workspace);
    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(health["watches"], 0);
    let _ = std::fs::remove_dir_all(workspace);
}
