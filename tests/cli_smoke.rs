//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn help_lists_the_lifecycle_commands() {
    let mut cmd = cargo_bin_cmd!("blimp");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(contains("start"))
        .stdout(contains("destroy"));
}

#[test]
fn bare_invocation_prints_usage() {
    let mut cmd = cargo_bin_cmd!("blimp");
    cmd.assert().failure().stderr(contains("Usage"));
}

#[test]
fn malformed_tag_is_rejected_before_any_provider_call() {
    let mut cmd = cargo_bin_cmd!("blimp");
    cmd.args(["start", "--tag", "novalue"])
        .assert()
        .failure()
        .stderr(contains("invalid tag 'novalue'"));
}
