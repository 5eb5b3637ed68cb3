//! [`ComputeProvider`] backed by the `aws` command line client.
//!
//! Every call shells out to `aws ec2 <action> --region <region> --output json`
//! and parses stdout with `serde_json`. Credentials are whatever the CLI
//! resolves from its own profile and environment. Lookups that the CLI
//! answers with a `*.NotFound` error code are reported as absent rather than
//! failed.

use std::ffi::OsString;

use serde_json::json;
use tracing::{debug, info};

use crate::exec::{CommandOutput, CommandRunner, ProcessCommandRunner, expand_tilde};
use crate::provider::{
    ComputeProvider, InstanceDescriptor, InstanceHandle, InstanceRequest, KeyPair,
};

mod error;
mod types;

pub use error::AwsProviderError;
use types::{
    DescribeInstancesOutput, DescribeKeyPairsOutput, DescribeSecurityGroupsOutput,
    RunInstancesOutput,
};

/// Default `aws` CLI binary name.
pub const DEFAULT_AWS_BIN: &str = "aws";

/// Instance type requested for new boxes.
pub const DEFAULT_INSTANCE_TYPE: &str = "t2.micro";

const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";
const GROUP_NOT_FOUND: &str = "InvalidGroup.NotFound";
const KEY_PAIR_NOT_FOUND: &str = "InvalidKeyPair.NotFound";

/// Manages EC2 instances by shelling out to `aws`.
#[derive(Clone, Debug)]
pub struct AwsCliProvider<R: CommandRunner> {
    aws_bin: String,
    instance_type: String,
    runner: R,
}

impl AwsCliProvider<ProcessCommandRunner> {
    /// Creates a provider wired to the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`AwsProviderError::InvalidConfig`] when `aws_bin` is blank.
    pub fn with_process_runner(aws_bin: impl Into<String>) -> Result<Self, AwsProviderError> {
        Self::new(aws_bin, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> AwsCliProvider<R> {
    /// Creates a provider that runs `aws_bin` through `runner`.
    ///
    /// # Errors
    ///
    /// Returns [`AwsProviderError::InvalidConfig`] when `aws_bin` is blank.
    pub fn new(aws_bin: impl Into<String>, runner: R) -> Result<Self, AwsProviderError> {
        let trimmed_aws_bin = aws_bin.into().trim().to_owned();
        if trimmed_aws_bin.is_empty() {
            return Err(AwsProviderError::InvalidConfig {
                field: String::from("aws_bin"),
            });
        }
        Ok(Self {
            aws_bin: trimmed_aws_bin,
            instance_type: String::from(DEFAULT_INSTANCE_TYPE),
            runner,
        })
    }

    /// Overrides the instance type used by `run-instances`.
    #[must_use]
    pub fn with_instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_type = instance_type.into();
        self
    }

    fn build_args(action: &str, region: &str, extra: Vec<OsString>) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("ec2"),
            OsString::from(action),
            OsString::from("--region"),
            OsString::from(region),
        ];
        args.extend(extra);
        args.push(OsString::from("--output"));
        args.push(OsString::from("json"));
        args
    }

    fn run_aws(
        &self,
        action: &str,
        region: &str,
        extra: Vec<OsString>,
    ) -> Result<CommandOutput, AwsProviderError> {
        let args = Self::build_args(action, region, extra);
        debug!(action, region, "invoking aws cli");
        Ok(self.runner.run(&self.aws_bin, &args)?)
    }

    fn check_output(
        &self,
        action: &str,
        output: CommandOutput,
    ) -> Result<CommandOutput, AwsProviderError> {
        if output.is_success() {
            return Ok(output);
        }
        Err(AwsProviderError::CommandFailure {
            program: self.aws_bin.clone(),
            action: action.to_owned(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }

    fn run_checked(
        &self,
        action: &str,
        region: &str,
        extra: Vec<OsString>,
    ) -> Result<CommandOutput, AwsProviderError> {
        let output = self.run_aws(action, region, extra)?;
        self.check_output(action, output)
    }

    fn instance_action(
        &self,
        action: &str,
        handle: &InstanceHandle,
    ) -> Result<(), AwsProviderError> {
        let extra = vec![
            OsString::from("--instance-ids"),
            OsString::from(&handle.id),
        ];
        self.run_checked(action, &handle.region, extra)?;
        info!(action, instance_id = %handle.id, region = %handle.region, "instance action accepted");
        Ok(())
    }

    fn key_pair_exists(&self, region: &str, name: &str) -> Result<bool, AwsProviderError> {
        let action = "describe-key-pairs";
        let extra = vec![OsString::from("--key-names"), OsString::from(name)];
        let raw = self.run_aws(action, region, extra)?;
        if is_not_found(&raw, KEY_PAIR_NOT_FOUND) {
            return Ok(false);
        }
        let output = self.check_output(action, raw)?;
        let parsed: DescribeKeyPairsOutput = parse_json(action, &output.stdout)?;
        Ok(parsed.key_pairs.iter().any(|key| key.key_name == name))
    }
}

impl<R: CommandRunner> ComputeProvider for AwsCliProvider<R> {
    type Error = AwsProviderError;

    fn create_instance(&self, request: &InstanceRequest) -> Result<InstanceHandle, Self::Error> {
        let action = "run-instances";
        let mut extra = vec![
            OsString::from("--image-id"),
            OsString::from(&request.image_id),
            OsString::from("--instance-type"),
            OsString::from(&self.instance_type),
            OsString::from("--key-name"),
            OsString::from(&request.key_name),
            OsString::from("--count"),
            OsString::from("1"),
        ];
        if !request.security_groups.is_empty() {
            extra.push(OsString::from("--security-groups"));
            extra.extend(request.security_groups.iter().map(OsString::from));
        }
        if !request.tags.is_empty() {
            extra.push(OsString::from("--tag-specifications"));
            extra.push(OsString::from(tag_specifications(request)));
        }

        let output = self.run_checked(action, &request.region, extra)?;
        let parsed: RunInstancesOutput = parse_json(action, &output.stdout)?;
        let instance = parsed
            .instances
            .into_iter()
            .next()
            .ok_or_else(|| AwsProviderError::MissingInstance {
                action: action.to_owned(),
            })?;

        info!(instance_id = %instance.instance_id, region = %request.region, "created instance");
        Ok(InstanceHandle {
            id: instance.instance_id,
            region: request.region.clone(),
        })
    }

    fn stop(&self, handle: &InstanceHandle) -> Result<(), Self::Error> {
        self.instance_action("stop-instances", handle)
    }

    fn start(&self, handle: &InstanceHandle) -> Result<(), Self::Error> {
        self.instance_action("start-instances", handle)
    }

    fn destroy(&self, handle: &InstanceHandle) -> Result<(), Self::Error> {
        self.instance_action("terminate-instances", handle)
    }

    fn describe(&self, handle: &InstanceHandle) -> Result<Option<InstanceDescriptor>, Self::Error> {
        let action = "describe-instances";
        let extra = vec![
            OsString::from("--instance-ids"),
            OsString::from(&handle.id),
        ];
        let raw = self.run_aws(action, &handle.region, extra)?;
        if is_not_found(&raw, INSTANCE_NOT_FOUND) {
            return Ok(None);
        }
        let output = self.check_output(action, raw)?;
        let parsed: DescribeInstancesOutput = parse_json(action, &output.stdout)?;
        Ok(parsed
            .reservations
            .into_iter()
            .flat_map(|reservation| reservation.instances)
            .find(|instance| instance.instance_id == handle.id)
            .map(InstanceDescriptor::from))
    }

    fn resolve_security_group(
        &self,
        region: &str,
        name: &str,
    ) -> Result<Option<String>, Self::Error> {
        let action = "describe-security-groups";
        let extra = vec![OsString::from("--group-names"), OsString::from(name)];
        let raw = self.run_aws(action, region, extra)?;
        if is_not_found(&raw, GROUP_NOT_FOUND) {
            return Ok(None);
        }
        let output = self.check_output(action, raw)?;
        let parsed: DescribeSecurityGroupsOutput = parse_json(action, &output.stdout)?;
        Ok(parsed
            .security_groups
            .into_iter()
            .find(|group| group.group_name == name)
            .map(|group| group.group_id))
    }

    fn import_key_pair(&self, region: &str, key: &KeyPair) -> Result<(), Self::Error> {
        if self.key_pair_exists(region, &key.name)? {
            debug!(key_name = %key.name, region, "key pair already registered");
            return Ok(());
        }

        let material = expand_tilde(key.public_key_path.as_str());
        let extra = vec![
            OsString::from("--key-name"),
            OsString::from(&key.name),
            OsString::from("--public-key-material"),
            OsString::from(format!("fileb://{material}")),
        ];
        self.run_checked("import-key-pair", region, extra)?;
        info!(key_name = %key.name, region, "imported key pair");
        Ok(())
    }
}

fn tag_specifications(request: &InstanceRequest) -> String {
    let tags = request
        .tags
        .iter()
        .map(|(key, value)| json!({ "Key": key, "Value": value }))
        .collect::<Vec<_>>();
    json!([{ "ResourceType": "instance", "Tags": tags }]).to_string()
}

fn is_not_found(output: &CommandOutput, code: &str) -> bool {
    !output.is_success() && output.stderr.contains(code)
}

fn parse_json<T>(action: &str, stdout: &str) -> Result<T, AwsProviderError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(stdout).map_err(|err| AwsProviderError::Parse {
        action: action.to_owned(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests;
