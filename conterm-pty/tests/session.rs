//! Integration tests against real child processes

#![cfg(unix)]

use std::thread;
use std::time::{Duration, Instant};

use conterm_pty::{ChildExit, CommandSpec, Error, ReadOutcome, Session, WindowSize};

/// Read until `done` accepts the collected output, end-of-stream, or timeout
fn read_until(session: &mut Session, done: impl Fn(&[u8]) -> bool) -> (Vec<u8>, bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut output = Vec::new();
    let mut buf = [0u8; 1024];
    while Instant::now() < deadline {
        match session.read(&mut buf).expect("read") {
            ReadOutcome::Data(n) => {
                output.extend_from_slice(&buf[..n]);
                if done(&output) {
                    return (output, false);
                }
            }
            ReadOutcome::WouldBlock => thread::sleep(Duration::from_millis(10)),
            ReadOutcome::EndOfStream => return (output, true),
        }
    }
    (output, false)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn test_cat_echoes_input() {
    let mut session = Session::spawn(&CommandSpec::new("cat"), WindowSize::new(80, 24)).unwrap();
    assert!(session.process_id().is_some());

    session.send(b"hello\n").unwrap();
    let (output, _) = read_until(&mut session, |out| contains(out, b"hello"));
    assert!(
        contains(&output, b"hello"),
        "expected echo, got {:?}",
        String::from_utf8_lossy(&output)
    );

    session.close().unwrap();
}

#[test]
fn test_resize_is_visible_to_the_device() {
    let mut session = Session::spawn(&CommandSpec::new("cat"), WindowSize::new(80, 24)).unwrap();
    assert_eq!(session.window_size().unwrap(), WindowSize::new(80, 24));

    assert!(session.resize(WindowSize::new(100, 30)).unwrap());
    let size = session.window_size().unwrap();
    assert_eq!((size.cols, size.rows), (100, 30));
    assert_eq!(session.size(), WindowSize::new(100, 30));
}

#[test]
fn test_child_exit_is_end_of_stream() {
    let command = CommandSpec::new("/bin/sh").args(["-c", "exit 3"]);
    let mut session = Session::spawn(&command, WindowSize::default()).unwrap();

    let (_, eos) = read_until(&mut session, |_| false);
    assert!(eos, "expected end-of-stream after the child exited");

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut exit = None;
    while exit.is_none() && Instant::now() < deadline {
        exit = session.try_wait().unwrap();
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(exit, Some(ChildExit::Exited(3)));
}

#[test]
fn test_close_is_idempotent() {
    let mut session = Session::spawn(&CommandSpec::new("cat"), WindowSize::default()).unwrap();
    session.close().unwrap();
    session.close().unwrap();
    assert!(session.is_closed());
    assert_eq!(
        session.read(&mut [0u8; 16]).unwrap(),
        ReadOutcome::EndOfStream
    );
}

#[test]
fn test_missing_program_is_spawn_error() {
    let command = CommandSpec::new("/nonexistent/conterm-test-binary");
    match Session::spawn(&command, WindowSize::default()) {
        Err(Error::Spawn { program, .. }) => {
            assert_eq!(program, "/nonexistent/conterm-test-binary")
        }
        Err(other) => panic!("expected a spawn error, got {}", other),
        Ok(_) => panic!("spawning a missing program succeeded"),
    }
}

#[test]
fn test_exec_failure_is_reported() {
    // A directory is never executable
    let dir = std::env::temp_dir();
    let command = CommandSpec::new(&dir);
    assert!(matches!(
        Session::spawn(&command, WindowSize::default()),
        Err(Error::Spawn { .. })
    ));
}

#[test]
fn test_term_is_exported() {
    let command = CommandSpec::new("/bin/sh")
        .args(["-c", "printf '%s\\n' \"$TERM\""])
        .term("vt100");
    let mut session = Session::spawn(&command, WindowSize::default()).unwrap();
    let (output, _) = read_until(&mut session, |out| contains(out, b"vt100"));
    assert!(contains(&output, b"vt100"));
}
