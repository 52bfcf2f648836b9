//! End-to-end tests for the spanloom binary
//!
//! These build and run the real binary, so they are gated behind the
//! `integration` feature flag. Run with:
//!
//! ```sh
//! cargo test -p spanloom-cli --features integration
//! ```

#![cfg(feature = "integration")]

use std::io::Write;
use std::process::{Command, Stdio};

#[test]
fn spanloom_help_lists_commands() {
    let output = Command::new("cargo")
        .args(["run", "-p", "spanloom-cli", "--", "--help"])
        .output()
        .expect("Failed to run spanloom --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("serve"));
    assert!(stdout.contains("send"));
    assert!(stdout.contains("config"));
}

#[test]
fn spanloom_config_show_works_without_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = Command::new("cargo")
        .args(["run", "-p", "spanloom-cli", "--", "config", "show"])
        .env("SPANLOOM_PROJECT_CONFIG_DIR", dir.path())
        .output()
        .expect("Failed to run spanloom config show");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[export]"));
    assert!(stdout.contains("[gc]"));
}

#[test]
fn spanloom_send_without_receiver_does_not_fail() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut child = Command::new("cargo")
        .args(["run", "-p", "spanloom-cli", "--", "send", "--socket"])
        .arg(dir.path().join("missing.sock"))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to run spanloom send");

    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"{\"type\":\"session.created\",\"id\":\"u1\"}\n")
        .unwrap();

    assert!(child.wait().unwrap().success());
}
