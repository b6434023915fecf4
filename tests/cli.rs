//! Runs the conterm binary against real programs

#![cfg(unix)]

use std::io::Write;
use std::process::{Command, Output};

fn conterm(args: &[&str]) -> Output {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "timeout_secs = 5.0").unwrap();

    Command::new(env!("CARGO_BIN_EXE_conterm"))
        .arg("--config")
        .arg(config.path())
        .args(args)
        .env_remove("CONTERM_SHELL")
        .env_remove("CONTERM_PALETTE")
        .env_remove("CONTERM_FONT_SIZE")
        .output()
        .unwrap()
}

#[test]
fn test_prints_final_screen() {
    let output = conterm(&["--", "/bin/sh", "-c", "printf 'one\\ntwo\\n'"]);
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert_eq!(text, "one\ntwo\n");
}

#[test]
fn test_json_report() {
    let output = conterm(&["--json", "--columns", "40", "--rows", "5", "--", "/bin/sh", "-c", "printf hi"]);
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["screen"]["cols"], 40);
    assert_eq!(report["screen"]["rows"], 5);
    assert_eq!(report["screen"]["lines"][0], "hi");
    assert_eq!(report["ended"], "EndOfStream");
    assert_eq!(report["timed_out"], false);
}

#[test]
fn test_send_line_reaches_child() {
    let output = conterm(&["--send-line", "ping", "--timeout", "1", "--", "cat"]);
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("ping\nping"), "unexpected screen: {:?}", text);
}

#[test]
fn test_missing_program_fails() {
    let output = conterm(&["--", "/nonexistent/conterm-program"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to start session"));
}

#[test]
fn test_invalid_palette_fails() {
    let output = conterm(&["--palette", "neon", "--", "true"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("palette"));
}
