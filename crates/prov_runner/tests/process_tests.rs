//! Integration tests for the host process runner.
//!
//! These spawn `/bin/sh`, so they only run on unix hosts.

#![cfg(unix)]

use prov_runner::{CommandRunner, CommandSpec, ProcessRunner, ProcessRunnerOptions};
use tempfile::TempDir;

fn runner() -> ProcessRunner {
    ProcessRunner::new(ProcessRunnerOptions::default())
}

/// Exit code and both streams are captured.
#[tokio::test]
async fn test_captures_exit_code_and_streams() {
    let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);

    let output = runner().run(&spec).await.unwrap();

    assert_eq!(output.exit_code, 3);
    assert!(!output.success());
    assert_eq!(output.stdout.trim(), "out");
    assert_eq!(output.stderr.trim(), "err");
    assert_eq!(output.failure_summary(), "err");
}

/// Arguments reach the process verbatim, shell metacharacters included.
#[tokio::test]
async fn test_arguments_are_not_shell_interpreted() {
    let hostile = "shop'; DROP DATABASE x; -- $(touch /tmp/pwned)";
    let spec = CommandSpec::new("sh").args(["-c", "printf %s \"$1\"", "sh", hostile]);

    let output = runner().run(&spec).await.unwrap();

    assert!(output.success());
    assert_eq!(output.stdout, hostile);
}

/// Environment variables and working directory are applied.
#[tokio::test]
async fn test_env_and_cwd() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "here").unwrap();

    let spec = CommandSpec::new("sh")
        .args(["-c", "printf %s \"$PROV_TEST_VALUE\"; cat marker.txt"])
        .env("PROV_TEST_VALUE", "value-")
        .cwd(dir.path());

    let output = runner().run(&spec).await.unwrap();

    assert!(output.success());
    assert_eq!(output.stdout, "value-here");
}

/// `sh` is on every unix PATH; a random name is not.
#[tokio::test]
async fn test_command_exists_against_real_path() {
    let runner = runner();
    assert!(runner.command_exists("sh").await);
    assert!(!runner.command_exists("prov-no-such-command-4711").await);
}
