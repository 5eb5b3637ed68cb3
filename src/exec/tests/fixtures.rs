//! Shared fixtures for remote shell tests.

use super::super::*;
use rstest::fixture;

#[fixture]
pub fn base_config() -> ShellConfig {
    ShellConfig {
        ssh_bin: String::from("ssh"),
        scp_bin: String::from("scp"),
        ssh_port: DEFAULT_SSH_PORT,
        ssh_batch_mode: true,
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        ssh_identity_file: None,
    }
}

#[fixture]
pub fn target() -> RemoteTarget {
    RemoteTarget::new("ubuntu", "ec2-1-2-3-4.us-west-2.compute.amazonaws.com")
}

pub fn as_strings(args: &[OsString]) -> Vec<String> {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}
