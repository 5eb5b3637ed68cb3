//! Tests for `StreamingCommandRunner` output forwarding and capture.

use super::super::*;
use rstest::rstest;

fn run_script(script: &str) -> CommandOutput {
    StreamingCommandRunner
        .run("sh", &[OsString::from("-c"), OsString::from(script)])
        .expect("command should execute successfully")
}

#[rstest]
fn streaming_runner_captures_output() {
    let output = run_script("printf out && printf err 1>&2");

    assert_eq!(output.code, Some(0));
    assert_eq!(output.stdout, "out");
    assert_eq!(output.stderr, "err");
}

#[rstest]
fn streaming_runner_propagates_non_zero_exit_code() {
    let output = run_script("printf partial; exit 42");

    assert_eq!(output.code, Some(42));
    assert_eq!(output.stdout, "partial");
    assert_eq!(output.status_text(), "42");
}

#[rstest]
fn process_runner_captures_without_streaming() {
    let output = ProcessCommandRunner
        .run("sh", &[OsString::from("-c"), OsString::from("echo hi")])
        .expect("command should execute successfully");

    assert!(output.is_success());
    assert_eq!(output.stdout, "hi\n");
}

#[rstest]
fn failed_spawn_returns_spawn_error() {
    let result = StreamingCommandRunner.run("definitely-not-a-real-binary-xyz", &[]);

    match result {
        Err(ExecError::Spawn { program, .. }) => {
            assert_eq!(program, "definitely-not-a-real-binary-xyz");
        }
        other => panic!("expected ExecError::Spawn, got {other:?}"),
    }
}
