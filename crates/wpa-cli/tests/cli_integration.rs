//! CLI subprocess integration tests.
//!
//! These tests invoke the `wpa` binary with the in-memory mock engine and
//! verify exit codes, stdout content, and JSON output.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn wpa_bin(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_wpa"));
    // Keep the user's settings file out of the tests.
    cmd.env("WPA_SETTINGS", home.join("settings.toml"));
    cmd.env_remove("WPA_LOG");
    cmd
}

fn write_suite(dir: &Path) -> PathBuf {
    let path = dir.join("wpa.toml");
    std::fs::write(
        &path,
        r#"config_version = 1

[stack]
app_image = "wordpress:6.4"
db_image = "mysql:5.7"
site_host = "shop.test"

[database]
wait_seconds = 5
"#,
    )
    .unwrap();
    path
}

fn json_of(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("invalid JSON ({e}): {stdout}"))
}

fn code(output: &Output) -> i32 {
    output.status.code().unwrap_or(-1)
}

#[test]
fn cli_version_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let output = wpa_bin(dir.path()).arg("--version").output().unwrap();
    assert!(output.status.success(), "wpa --version must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("wpa"), "version output must name the binary: {stdout}");
}

#[test]
fn cli_help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    let output = wpa_bin(dir.path()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["create", "destroy", "destroy-all", "list", "fingerprint", "doctor"] {
        assert!(stdout.contains(command), "help must list '{command}': {stdout}");
    }
}

#[test]
fn cli_create_with_mock_engine_builds_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let suite = write_suite(dir.path());
    let output = wpa_bin(dir.path())
        .args(["--engine", "mock", "--json", "create"])
        .arg(&suite)
        .args(["--env-id", "ci-run"])
        .output()
        .unwrap();
    assert_eq!(
        code(&output),
        0,
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json = json_of(&output);
    assert_eq!(json["env_id"], "ci-run");
    assert_eq!(json["strategy"], "build");
    assert_eq!(json["steps"].as_array().unwrap().len(), 10);
    assert_eq!(json["steps"][0], "create-network");
    assert_eq!(json["network"], "ci-run-wpa-network");
    assert_eq!(json["containers"]["app"]["name"], "ci-run-wpa-app");
    assert_eq!(json["kept"], false);
    assert!(json["command_exit_code"].is_null());
}

#[test]
fn cli_create_keep_reports_kept() {
    let dir = tempfile::tempdir().unwrap();
    let suite = write_suite(dir.path());
    let output = wpa_bin(dir.path())
        .args(["--engine", "mock", "--json", "create", "--keep"])
        .arg(&suite)
        .output()
        .unwrap();
    assert_eq!(code(&output), 0);
    let json = json_of(&output);
    assert_eq!(json["kept"], true);
    assert!(json["env_id"].as_str().is_some_and(|id| !id.is_empty()));
}

#[test]
fn cli_create_cache_keeps_environment_for_reuse() {
    let dir = tempfile::tempdir().unwrap();
    let suite = write_suite(dir.path());
    let output = wpa_bin(dir.path())
        .args(["--engine", "mock", "--json", "create", "--cache"])
        .arg(&suite)
        .args(["--env-id", "cached1"])
        .output()
        .unwrap();
    assert_eq!(
        code(&output),
        0,
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json = json_of(&output);
    assert_eq!(json["cacheable"], true);
    assert_eq!(json["kept"], true);
}

#[test]
fn cli_create_skip_cache_is_not_kept() {
    let dir = tempfile::tempdir().unwrap();
    let suite = write_suite(dir.path());
    let output = wpa_bin(dir.path())
        .args(["--engine", "mock", "--json", "create", "--cache", "--skip-cache"])
        .arg(&suite)
        .output()
        .unwrap();
    assert_eq!(code(&output), 0);
    let json = json_of(&output);
    assert_eq!(json["cacheable"], false);
    assert_eq!(json["kept"], false);
}

#[test]
fn cli_create_runs_command_with_environment_variables() {
    let dir = tempfile::tempdir().unwrap();
    let suite = write_suite(dir.path());
    let output = wpa_bin(dir.path())
        .args(["--engine", "mock", "create"])
        .arg(&suite)
        .args(["--env-id", "cmd1", "--"])
        .args([
            "sh",
            "-c",
            "test \"$WPA_ENV_ID\" = cmd1 && test \"$WPA_SITE_HOST\" = shop.test \
             && test \"$WPA_APP_CONTAINER\" = cmd1-wpa-app",
        ])
        .output()
        .unwrap();
    assert_eq!(
        code(&output),
        0,
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn cli_create_propagates_command_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let suite = write_suite(dir.path());
    let output = wpa_bin(dir.path())
        .args(["--engine", "mock", "--json", "create"])
        .arg(&suite)
        .args(["--", "sh", "-c", "exit 7"])
        .output()
        .unwrap();
    assert_eq!(code(&output), 7);
    let json = json_of(&output);
    assert_eq!(json["command_exit_code"], 7);
}

#[test]
fn cli_create_missing_config_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    let output = wpa_bin(dir.path())
        .args(["--engine", "mock", "create"])
        .arg(dir.path().join("absent.toml"))
        .output()
        .unwrap();
    assert_eq!(code(&output), 2);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("configuration error"), "stderr: {stderr}");
}

#[test]
fn cli_create_invalid_env_id_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    let suite = write_suite(dir.path());
    let output = wpa_bin(dir.path())
        .args(["--engine", "mock", "create"])
        .arg(&suite)
        .args(["--env-id", "has space"])
        .output()
        .unwrap();
    assert_eq!(code(&output), 2);
}

#[test]
fn cli_unknown_engine_exits_three() {
    let dir = tempfile::tempdir().unwrap();
    let output = wpa_bin(dir.path())
        .args(["--engine", "lxc", "list"])
        .output()
        .unwrap();
    assert_eq!(code(&output), 3);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("engine error"), "stderr: {stderr}");
}

#[test]
fn cli_invalid_settings_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("settings.toml"), "no_such_key = true\n").unwrap();
    let output = wpa_bin(dir.path()).arg("list").output().unwrap();
    assert_eq!(code(&output), 2);
}

#[test]
fn cli_settings_file_selects_engine() {
    let dir = tempfile::tempdir().unwrap();
    let settings = dir.path().join("custom.toml");
    std::fs::write(&settings, "engine = \"mock\"\n").unwrap();
    let output = wpa_bin(dir.path())
        .arg("--settings")
        .arg(&settings)
        .arg("list")
        .output()
        .unwrap();
    assert_eq!(code(&output), 0);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("no environments found"), "stdout: {stdout}");
}

#[test]
fn cli_destroy_unknown_environment_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let output = wpa_bin(dir.path())
        .args(["--engine", "mock", "--json", "destroy", "nothing-here"])
        .output()
        .unwrap();
    assert_eq!(code(&output), 0);
    let json = json_of(&output);
    assert_eq!(json["env_id"], "nothing-here");
    assert_eq!(json["status"], "destroyed");
}

#[test]
fn cli_destroy_all_with_nothing_to_do() {
    let dir = tempfile::tempdir().unwrap();
    let output = wpa_bin(dir.path())
        .args(["--engine", "mock", "--json", "destroy-all"])
        .output()
        .unwrap();
    assert_eq!(code(&output), 0);
    let json = json_of(&output);
    assert_eq!(json["destroyed"], serde_json::json!([]));
}

#[test]
fn cli_list_json_is_empty_array() {
    let dir = tempfile::tempdir().unwrap();
    let output = wpa_bin(dir.path())
        .args(["--engine", "mock", "--json", "list"])
        .output()
        .unwrap();
    assert_eq!(code(&output), 0);
    assert_eq!(json_of(&output), serde_json::json!([]));
}

#[test]
fn cli_fingerprint_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let suite = write_suite(dir.path());
    let run = || {
        wpa_bin(dir.path())
            .arg("fingerprint")
            .arg(&suite)
            .output()
            .unwrap()
    };
    let first = run();
    let second = run();
    assert_eq!(code(&first), 0);
    let fingerprint = String::from_utf8_lossy(&first.stdout).trim().to_owned();
    assert_eq!(fingerprint.len(), 64, "blake3 hex digest expected: {fingerprint}");
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn cli_fingerprint_changes_with_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let suite = write_suite(dir.path());
    let other_dir = dir.path().join("other");
    std::fs::create_dir(&other_dir).unwrap();
    let other = other_dir.join("wpa.toml");
    std::fs::write(
        &other,
        "config_version = 1\n[stack]\napp_image = \"wordpress:6.5\"\ndb_image = \"mysql:5.7\"\n",
    )
    .unwrap();

    let fp = |path: &Path| {
        let output = wpa_bin(dir.path())
            .args(["--json", "fingerprint"])
            .arg(path)
            .output()
            .unwrap();
        assert_eq!(code(&output), 0);
        json_of(&output)["fingerprint"].as_str().unwrap().to_owned()
    };
    assert_ne!(fp(&suite), fp(&other));
}

#[test]
fn cli_doctor_with_mock_engine_is_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let output = wpa_bin(dir.path())
        .args(["--engine", "mock", "--json", "doctor"])
        .output()
        .unwrap();
    assert_eq!(code(&output), 0);
    assert_eq!(json_of(&output)["healthy"], true);
}
