mod test_support;

use serde_json::json;
use test_support::{request_ok, select_workspace, spawn_sidecar, spawn_sidecar_with, temp_dir};

#[test]
fn cli_config_overrides_workspace_config() {
    let dir = temp_dir("gradebook-config-cli");
    let workspace = dir.join("ws");
    std::fs::create_dir_all(&workspace).expect("mkdir");
    std::fs::write(
        workspace.join("gradebookd.toml"),
        "[store]\nclassroom_policy = \"delete\"\n",
    )
    .expect("write workspace config");
    let cli_config = dir.join("pinned.toml");
    std::fs::write(
        &cli_config,
        "[store]\nclassroom_policy = \"archive\"\n[refresh]\ndiagnostics_secs = 3\n",
    )
    .expect("write cli config");

    let cfg_arg = cli_config.to_string_lossy().to_string();
    let (_child, mut stdin, mut reader) = spawn_sidecar_with(&["--config", &cfg_arg], &[]);
    let selected = select_workspace(&mut stdin, &mut reader, &workspace);
    assert_eq!(selected["classroomPolicy"], "archive");
    let diag = request_ok(&mut stdin, &mut reader, "d", "dashboard.diagnostics", json!({}));
    let refresh = diag["metrics"]
        .as_array()
        .expect("metrics")
        .iter()
        .find(|m| m["name"] == "Data Refresh Rate")
        .cloned()
        .expect("refresh metric");
    assert_eq!(refresh["value"], 3);
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn env_config_and_startup_workspace() {
    let dir = temp_dir("gradebook-config-env");
    let workspace = dir.join("ws");
    let cli_config = dir.join("env.toml");
    std::fs::write(&cli_config, "[store]\nclassroom_policy = \"archive\"\n").expect("write");
    let cfg = cli_config.to_string_lossy().to_string();
    let ws = workspace.to_string_lossy().to_string();
    let (_child, mut stdin, mut reader) = spawn_sidecar_with(
        &[],
        &[("GRADEBOOKD_CONFIG", &cfg), ("GRADEBOOKD_WORKSPACE", &ws)],
    );
    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(health["workspacePath"].as_str(), Some(ws.as_str()));
    assert!(workspace.join("gradebook.sqlite3").is_file());
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn broken_workspace_config_is_ignored() {
    let workspace = temp_dir("gradebook-config-broken");
    std::fs::write(
        workspace.join("gradebookd.toml"),
        "[analytics]\npass_mark = 250\n",
    )
    .expect("write");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let selected = select_workspace(&mut stdin, &mut reader, &workspace);
    assert_eq!(selected["classroomPolicy"], "delete");
    assert_eq!(selected["ledgerEnabled"], false);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_cli_config_fails_startup() {
    let dir = temp_dir("gradebook-config-invalid");
    let bad = dir.join("bad.toml");
    std::fs::write(&bad, "[refresh]\ndashboard_secs = 0\n").expect("write");
    let bad_arg = bad.to_string_lossy().to_string();
    let (mut child, stdin, _reader) = spawn_sidecar_with(&["--config", &bad_arg], &[]);
    drop(stdin);
    let status = child.wait().expect("wait");
    assert!(!status.success());
    let _ = std::fs::remove_dir_all(dir);
}
