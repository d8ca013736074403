//! Prompt-detection protocol against fake escalation children
//!
//! The scripts below stand in for sudo: they print a prompt (or a
//! success marker, or nothing), optionally read the secret from stdin,
//! and react to it. This exercises the non-blocking poll loop without
//! requiring real privilege escalation.

use std::path::Path;
use std::time::Duration;

use nsrun::escalate::BecomeCommand;
use nsrun::runner::{execute_one, EscalationRequest, RunnerConfig};
use nsrun::Error;
use tempfile::TempDir;

use crate::helpers::write_script;

const SECRET: &str = "s3cret";

fn config(timeout_ms: u64) -> RunnerConfig {
    RunnerConfig {
        basedir: std::env::temp_dir(),
        timeout: Duration::from_millis(timeout_ms),
    }
}

fn request(script: &Path, prompt: &str, marker: &str) -> EscalationRequest {
    EscalationRequest {
        command: BecomeCommand {
            launch_line: script.display().to_string(),
            prompt: prompt.to_string(),
            success_marker: marker.to_string(),
        },
        password: Some(SECRET.to_string()),
    }
}

#[test]
fn delivers_secret_when_prompt_matches() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        dir.path(),
        "fake-sudo",
        r#"#!/bin/sh
printf 'Password: ' >&2
read -r secret
if [ "$secret" = "s3cret" ]; then
    echo authenticated
else
    echo denied >&2
    exit 1
fi
"#,
    );

    let escalation = request(&script, "Password: ", "NEVER-PRINTED");
    let result = execute_one("unused", None, Some(&escalation), &config(5000)).unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "authenticated\n");
}

#[test]
fn wrong_prompt_shape_is_caught_by_heuristic() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        dir.path(),
        "fake-su",
        r#"#!/bin/sh
printf 'Password:' >&2
read -r secret
if [ "$secret" = "s3cret" ]; then
    echo let-in
else
    exit 1
fi
"#,
    );

    // No configured prompt: only the generic heuristic can break the loop.
    let escalation = request(&script, "", "NEVER-PRINTED");
    let result = execute_one("unused", None, Some(&escalation), &config(5000)).unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "let-in\n");
}

#[test]
fn success_marker_skips_password_delivery() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        dir.path(),
        "fake-nopasswd",
        r#"#!/bin/sh
echo BECOME-OK
if read -r line; then
    echo "got:$line"
else
    echo stdin-empty
fi
"#,
    );

    let escalation = request(&script, "Prompt-Not-Used: ", "BECOME-OK");
    let result = execute_one("unused", None, Some(&escalation), &config(5000)).unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(
        result.stdout.contains("stdin-empty"),
        "marker present, no secret may be written: {:?}",
        result.stdout
    );
    assert!(!result.stdout.contains("got:"));
}

#[test]
fn silent_child_times_out() {
    let escalation = EscalationRequest {
        command: BecomeCommand {
            launch_line: "sleep 1".to_string(),
            prompt: "Password: ".to_string(),
            success_marker: "NEVER-PRINTED".to_string(),
        },
        password: Some(SECRET.to_string()),
    };
    let err = execute_one("unused", None, Some(&escalation), &config(100)).unwrap_err();
    match err {
        Error::PromptTimeout { output } => assert!(output.is_empty()),
        other => panic!("expected PromptTimeout, got {other:?}"),
    }
}

#[test]
fn timeout_error_carries_observed_output() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        dir.path(),
        "fake-noise",
        r#"#!/bin/sh
echo unrelated noise
sleep 1
"#,
    );

    let escalation = request(&script, "Password-For-Admin: ", "NEVER-PRINTED");
    let err = execute_one("unused", None, Some(&escalation), &config(200)).unwrap_err();
    match err {
        Error::PromptTimeout { output } => assert!(output.contains("unrelated noise")),
        other => panic!("expected PromptTimeout, got {other:?}"),
    }
}

#[test]
fn exiting_child_is_stream_closed() {
    let escalation = EscalationRequest {
        command: BecomeCommand {
            launch_line: "true".to_string(),
            prompt: "Password: ".to_string(),
            success_marker: "NEVER-PRINTED".to_string(),
        },
        password: Some(SECRET.to_string()),
    };
    let err = execute_one("unused", None, Some(&escalation), &config(5000)).unwrap_err();
    assert!(matches!(err, Error::StreamClosed { .. }));
}

#[test]
fn escalation_without_password_skips_the_protocol() {
    let dir = TempDir::new().unwrap();
    let script = write_script(
        dir.path(),
        "fake-plain",
        r#"#!/bin/sh
echo ran-anyway
"#,
    );

    let escalation = EscalationRequest {
        command: BecomeCommand {
            launch_line: script.display().to_string(),
            prompt: "Password: ".to_string(),
            success_marker: "NEVER-PRINTED".to_string(),
        },
        password: None,
    };
    let result = execute_one("unused", None, Some(&escalation), &config(100)).unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "ran-anyway\n");
}
