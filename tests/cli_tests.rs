// intent_core/tests/cli_tests.rs
// Smoke tests for the intent_cli binary

use assert_cmd::Command;

fn cli(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("intent_cli").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("config.yaml"))
        .env("HOME", dir.path());
    cmd
}

#[test]
fn test_classify_json() {
    let dir = tempfile::tempdir().unwrap();
    let output = cli(&dir)
        .args(["--ephemeral", "classify", "install", "firefox", "--json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["action"], "install_package");
    assert_eq!(value["engine"], "rule-based");
    assert_eq!(value["entities"][0]["type"], "package");
    assert_eq!(value["entities"][0]["value"], "firefox");
}

#[test]
fn test_diagnose_disk_space() {
    let dir = tempfile::tempdir().unwrap();
    let output = cli(&dir)
        .args(["--ephemeral", "diagnose", "no space left on device", "--json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["error_type"], "disk_space");
    assert_eq!(value["suggestions"][0]["requires_confirmation"], true);
}

#[test]
fn test_run_refuses_dangerous_commands() {
    let dir = tempfile::tempdir().unwrap();
    let output = cli(&dir)
        .args(["--ephemeral", "run", "--", "rm", "-rf", "/tmp/anything"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("disallowed"), "stderr: {}", stderr);
}

#[test]
fn test_corrections_are_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("store");
    std::fs::write(
        dir.path().join("config.yaml"),
        format!("learning:\n  store_dir: {}\n", store.display()),
    )
    .unwrap();

    cli(&dir)
        .args(["correct", "gimme fyrefox", "install", "--package", "firefox"])
        .assert()
        .success();
    assert!(store.join("intent-learning.json").exists());

    let output = cli(&dir).args(["suggest", "gimme"]).output().unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).contains("gimme fyrefox"));
}

#[test]
fn test_version() {
    let dir = tempfile::tempdir().unwrap();
    let output = cli(&dir).arg("version").output().unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).contains("intent_cli v"));
}
