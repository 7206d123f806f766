// intent_core/tests/sandbox_tests.rs
// Process-level sandbox behaviour: limits, cleanup and isolation
#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use intent_core::sandbox::{
    CommandSandbox, SandboxPolicy, KILL_GRACE, OUTPUT_DRAIN, TIMEOUT_MARKER, TRUNCATION_MARKER,
};

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_timeout_is_enforced() {
    let sandbox = CommandSandbox::new();
    let policy = SandboxPolicy {
        max_execution_time_ms: 200,
        ..SandboxPolicy::default()
    };

    let started = Instant::now();
    let result = sandbox.execute("sleep", &args(&["5"]), &policy).await.unwrap();
    let elapsed = started.elapsed();

    assert!(result.timed_out);
    assert!(!result.success);
    assert_eq!(result.exit_code, None);
    assert!(result.stderr.contains(TIMEOUT_MARKER));
    assert!(elapsed < KILL_GRACE + Duration::from_millis(1500));
    assert_eq!(sandbox.spawn_count(), 1);
}

#[tokio::test]
async fn test_term_ignoring_child_is_killed_after_grace() {
    let sandbox = CommandSandbox::new();
    let policy = SandboxPolicy {
        max_execution_time_ms: 300,
        ..SandboxPolicy::default()
    };

    let started = Instant::now();
    let result = sandbox
        .execute("sh", &args(&["-c", "trap '' TERM; sleep 30"]), &policy)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(result.timed_out);
    assert_eq!(result.exit_code, None);
    assert_eq!(result.signal, Some(9));
    assert!(elapsed >= KILL_GRACE);
    assert!(elapsed < Duration::from_millis(300) + KILL_GRACE + Duration::from_secs(2));
}

#[tokio::test]
async fn test_background_child_does_not_hold_the_call() {
    let sandbox = CommandSandbox::new();
    let policy = SandboxPolicy {
        max_execution_time_ms: 5_000,
        ..SandboxPolicy::default()
    };

    let started = Instant::now();
    let result = sandbox
        .execute("sh", &args(&["-c", "sleep 30 & echo started"]), &policy)
        .await
        .unwrap();

    assert!(started.elapsed() < OUTPUT_DRAIN + Duration::from_secs(2));
    assert!(result.success, "stderr: {}", result.stderr);
    assert!(!result.timed_out);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.stdout.trim(), "started");
    assert!(!result.stderr.contains(TIMEOUT_MARKER));
}

#[tokio::test]
async fn test_output_is_capped_once() {
    let sandbox = CommandSandbox::new();
    let policy = SandboxPolicy {
        max_output_bytes: 1000,
        ..SandboxPolicy::default()
    };

    let result = sandbox
        .execute("sh", &args(&["-c", "yes | head -c 200000"]), &policy)
        .await
        .unwrap();

    assert!(result.truncated);
    assert_eq!(result.stdout.matches(TRUNCATION_MARKER).count(), 1);
    assert!(result.stdout.len() <= 1000 + TRUNCATION_MARKER.len());
}

#[tokio::test]
async fn test_workspace_is_removed() {
    let sandbox = CommandSandbox::new();
    let result = sandbox
        .execute("pwd", &[], &SandboxPolicy::default())
        .await
        .unwrap();

    assert!(result.success, "stderr: {}", result.stderr);
    let dir = result.stdout.trim();
    assert!(dir.contains("intent-sandbox-"));
    assert!(!Path::new(dir).exists());
}

#[tokio::test]
async fn test_home_points_at_workspace() {
    let sandbox = CommandSandbox::new();
    let result = sandbox
        .execute("sh", &args(&["-c", "echo $HOME; echo ${USER:-unset}"]), &SandboxPolicy::default())
        .await
        .unwrap();

    let mut lines = result.stdout.lines();
    assert!(lines.next().unwrap_or_default().contains("intent-sandbox-"));
    assert_eq!(lines.next(), Some("unset"));
}

#[tokio::test]
async fn test_writes_need_permission() {
    let sandbox = CommandSandbox::new();

    let denied = sandbox
        .execute("sh", &args(&["-c", "echo hi > note.txt"]), &SandboxPolicy::default())
        .await
        .unwrap();
    assert!(!denied.success);

    let policy = SandboxPolicy {
        allow_file_write: true,
        ..SandboxPolicy::default()
    };
    let allowed = sandbox
        .execute("sh", &args(&["-c", "echo hi > note.txt && cat note.txt"]), &policy)
        .await
        .unwrap();
    assert!(allowed.success, "stderr: {}", allowed.stderr);
    assert_eq!(allowed.stdout.trim(), "hi");
}

#[tokio::test]
async fn test_exit_codes_are_reported() {
    let sandbox = CommandSandbox::new();
    let result = sandbox
        .execute("sh", &args(&["-c", "echo oops >&2; exit 3"]), &SandboxPolicy::default())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.stderr.trim(), "oops");
    assert!(!result.timed_out);
}

#[tokio::test]
async fn test_missing_binary_is_a_failed_result() {
    let sandbox = CommandSandbox::new();
    let result = sandbox
        .execute("intent-core-no-such-binary", &[], &SandboxPolicy::default())
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.stderr.contains("failed to start"));
    assert_eq!(sandbox.spawn_count(), 0);
}

#[tokio::test]
async fn test_secrets_never_reach_the_result() {
    let sandbox = CommandSandbox::new();
    let result = sandbox
        .execute("echo", &args(&["--password", "hunter2"]), &SandboxPolicy::default())
        .await
        .unwrap();

    assert_eq!(result.sanitized_command, "echo --password [REDACTED]");
}

#[tokio::test]
async fn test_rejections_never_spawn() {
    let sandbox = CommandSandbox::new();
    for (command, arguments) in [
        ("rm", vec!["-rf", "/"]),
        ("sh", vec!["-c", "dd if=/dev/zero of=/dev/sda"]),
        ("bash", vec!["-c", ":(){ :|:& };:"]),
        ("chmod", vec!["-R", "777", "/"]),
        ("env", vec!["rm", "-r", "/tmp/x"]),
        ("sudo", vec!["chmod", "-R", "777", "/home"]),
        ("cp", vec!["img", "/dev/sda"]),
        ("find", vec!["/", "-delete"]),
    ] {
        let err = sandbox
            .execute(command, &args(&arguments), &SandboxPolicy::default())
            .await
            .unwrap_err();
        assert!(err.is_rejection(), "{} should be rejected", command);
    }
    assert_eq!(sandbox.spawn_count(), 0);
}
