//! Unit tests for the `aws` CLI provider.

use std::collections::BTreeMap;

use super::*;
use crate::provider::InstanceStatus;
use crate::test_support::ScriptedRunner;
use rstest::{fixture, rstest};

#[fixture]
fn runner() -> ScriptedRunner {
    ScriptedRunner::new()
}

fn provider(runner: &ScriptedRunner) -> AwsCliProvider<ScriptedRunner> {
    AwsCliProvider::new(DEFAULT_AWS_BIN, runner.clone()).expect("provider should build")
}

fn handle() -> InstanceHandle {
    InstanceHandle {
        id: String::from("i-123"),
        region: String::from("us-west-2"),
    }
}

fn last_command(runner: &ScriptedRunner) -> String {
    runner
        .invocations()
        .last()
        .map(crate::test_support::CommandInvocation::command_string)
        .expect("a command should have been recorded")
}

fn request() -> InstanceRequest {
    let mut tags = BTreeMap::new();
    tags.insert(String::from("Name"), String::from("test1"));
    InstanceRequest::builder()
        .region("us-west-2")
        .image_id("ami-ec0b86dc")
        .key_name("blimp")
        .security_group("default")
        .tags(&tags)
        .build()
        .expect("request should build")
}

const DESCRIBE_RUNNING: &str = r#"{
  "Reservations": [{
    "Instances": [{
      "InstanceId": "i-123",
      "PublicDnsName": "ec2-1-2-3-4.us-west-2.compute.amazonaws.com",
      "PrivateDnsName": "ip-10-0-0-1.us-west-2.compute.internal",
      "State": {"Code": 16, "Name": "running"}
    }]
  }]
}"#;

#[rstest]
fn rejects_blank_binary(runner: ScriptedRunner) {
    let err = AwsCliProvider::new("  ", runner).expect_err("blank binary should fail");
    assert_eq!(
        err,
        AwsProviderError::InvalidConfig {
            field: String::from("aws_bin")
        }
    );
}

#[rstest]
fn create_instance_builds_run_instances_call(runner: ScriptedRunner) {
    runner.push_output(
        Some(0),
        r#"{"Instances":[{"InstanceId":"i-123","State":{"Name":"pending"}}]}"#,
        "",
    );
    let handle = provider(&runner)
        .create_instance(&request())
        .expect("create should succeed");

    assert_eq!(handle.id, "i-123");
    assert_eq!(handle.region, "us-west-2");
    let command = last_command(&runner);
    assert!(command.starts_with("aws ec2 run-instances --region us-west-2 --image-id ami-ec0b86dc"));
    assert!(command.contains("--key-name blimp --count 1 --security-groups default"));
    assert!(command.contains(
        r#"--tag-specifications [{"ResourceType":"instance","Tags":[{"Key":"Name","Value":"test1"}]}]"#
    ));
    assert!(command.ends_with("--output json"));
}

#[rstest]
fn create_instance_without_instances_fails(runner: ScriptedRunner) {
    runner.push_output(Some(0), r#"{"Instances":[]}"#, "");
    let err = provider(&runner)
        .create_instance(&request())
        .expect_err("empty response should fail");
    assert!(matches!(err, AwsProviderError::MissingInstance { .. }));
}

#[rstest]
#[case::stop("stop-instances")]
#[case::start("start-instances")]
#[case::destroy("terminate-instances")]
fn instance_actions_target_the_handle(runner: ScriptedRunner, #[case] action: &str) {
    runner.push_success();
    let aws = provider(&runner);
    let result = match action {
        "stop-instances" => aws.stop(&handle()),
        "start-instances" => aws.start(&handle()),
        _ => aws.destroy(&handle()),
    };

    result.expect("action should succeed");
    assert_eq!(
        last_command(&runner),
        format!("aws ec2 {action} --region us-west-2 --instance-ids i-123 --output json")
    );
}

#[rstest]
fn failed_action_reports_status_and_stderr(runner: ScriptedRunner) {
    runner.push_output(Some(254), "", "An error occurred (UnauthorizedOperation)");
    let err = provider(&runner)
        .stop(&handle())
        .expect_err("non-zero exit should fail");

    let AwsProviderError::CommandFailure {
        action,
        status,
        stderr,
        ..
    } = err
    else {
        panic!("expected command failure, got {err:?}");
    };
    assert_eq!(action, "stop-instances");
    assert_eq!(status, Some(254));
    assert!(stderr.contains("UnauthorizedOperation"));
}

#[rstest]
fn describe_maps_instance_fields(runner: ScriptedRunner) {
    runner.push_output(Some(0), DESCRIBE_RUNNING, "");
    let descriptor = provider(&runner)
        .describe(&handle())
        .expect("describe should succeed")
        .expect("instance should be known");

    assert_eq!(descriptor.id, "i-123");
    assert_eq!(
        descriptor.dns_name,
        "ec2-1-2-3-4.us-west-2.compute.amazonaws.com"
    );
    assert_eq!(
        descriptor.internal_dns_name,
        "ip-10-0-0-1.us-west-2.compute.internal"
    );
    assert_eq!(descriptor.status, InstanceStatus::Running);
}

#[rstest]
fn describe_unknown_instance_is_absent(runner: ScriptedRunner) {
    runner.push_output(
        Some(254),
        "",
        "An error occurred (InvalidInstanceID.NotFound) when calling the DescribeInstances operation",
    );
    let descriptor = provider(&runner)
        .describe(&handle())
        .expect("not found should not be an error");
    assert!(descriptor.is_none());
}

#[rstest]
fn describe_rejects_malformed_json(runner: ScriptedRunner) {
    runner.push_output(Some(0), "not json", "");
    let err = provider(&runner)
        .describe(&handle())
        .expect_err("bad json should fail");
    assert!(matches!(err, AwsProviderError::Parse { ref action, .. } if action == "describe-instances"));
}

#[rstest]
fn resolves_security_group_by_name(runner: ScriptedRunner) {
    runner.push_output(
        Some(0),
        r#"{"SecurityGroups":[{"GroupId":"sg-42","GroupName":"default"}]}"#,
        "",
    );
    let group = provider(&runner)
        .resolve_security_group("us-west-2", "default")
        .expect("lookup should succeed");

    assert_eq!(group.as_deref(), Some("sg-42"));
    assert!(last_command(&runner).contains("describe-security-groups --region us-west-2 --group-names default"));
}

#[rstest]
fn unknown_security_group_is_absent(runner: ScriptedRunner) {
    runner.push_output(Some(254), "", "An error occurred (InvalidGroup.NotFound)");
    let group = provider(&runner)
        .resolve_security_group("us-west-2", "missing")
        .expect("not found should not be an error");
    assert!(group.is_none());
}

#[rstest]
fn existing_key_pair_is_not_reimported(runner: ScriptedRunner) {
    runner.push_output(Some(0), r#"{"KeyPairs":[{"KeyName":"blimp"}]}"#, "");
    provider(&runner)
        .import_key_pair("us-west-2", &KeyPair::new("blimp", "/keys/id.pub"))
        .expect("import should succeed");

    assert_eq!(runner.invocations().len(), 1);
}

#[rstest]
fn missing_key_pair_is_imported_from_file(runner: ScriptedRunner) {
    runner.push_output(Some(254), "", "An error occurred (InvalidKeyPair.NotFound)");
    runner.push_success();
    provider(&runner)
        .import_key_pair("us-west-2", &KeyPair::new("blimp", "/keys/id.pub"))
        .expect("import should succeed");

    assert_eq!(runner.invocations().len(), 2);
    assert_eq!(
        last_command(&runner),
        "aws ec2 import-key-pair --region us-west-2 --key-name blimp \
         --public-key-material fileb:///keys/id.pub --output json"
    );
}
