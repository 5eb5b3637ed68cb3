//! Remote shell and file transfer against a box.
//!
//! Every invocation takes an explicit [`ExecMode`]: either the remote command
//! replaces the current process (interactive `ssh`), or it runs as a child and
//! its exit status is handed back (readiness probes, bootstrap steps).

use std::ffi::OsString;
use std::fmt;

use camino::Utf8Path;
use tracing::debug;

mod config;
mod types;
mod util;

pub use config::{DEFAULT_SSH_PORT, ExecError, ShellConfig};
pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner, StreamingCommandRunner};
pub use util::expand_tilde;

/// How a remote command relates to the current process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecMode {
    /// The remote command becomes the current process; nothing runs after a
    /// successful launch.
    ReplaceProcess,
    /// The remote command runs as a child and its exit status is returned.
    RunAndWait,
}

/// Login and host used to reach a box.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTarget {
    /// Remote login name.
    pub user: String,
    /// Externally resolvable host name.
    pub host: String,
}

impl RemoteTarget {
    /// Builds a target from a user and host.
    #[must_use]
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// Invokes `ssh` and `scp` against a [`RemoteTarget`].
#[derive(Clone, Debug)]
pub struct RemoteShell<R: CommandRunner> {
    config: ShellConfig,
    runner: R,
}

impl RemoteShell<StreamingCommandRunner> {
    /// Convenience constructor that forwards remote output to the terminal.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::InvalidConfig`] when validation fails.
    pub fn with_streaming_runner(config: ShellConfig) -> Result<Self, ExecError> {
        Self::new(config, StreamingCommandRunner)
    }
}

impl<R: CommandRunner> RemoteShell<R> {
    /// Creates a remote shell using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: ShellConfig, runner: R) -> Result<Self, ExecError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Runs `ssh` against `target` with `args` appended after the host.
    ///
    /// In [`ExecMode::ReplaceProcess`] a successful launch never returns.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] when `ssh` cannot be started or exec'd.
    ///
    /// # Security
    ///
    /// `args` reach the remote shell verbatim; callers must quote untrusted
    /// input.
    pub fn ssh(
        &self,
        target: &RemoteTarget,
        args: &[String],
        mode: ExecMode,
    ) -> Result<CommandOutput, ExecError> {
        let ssh_args = self.build_ssh_args(target, args);
        self.invoke(&self.config.ssh_bin, &ssh_args, mode)
    }

    /// Copies `file` into the home directory of `target` with `scp`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] when `scp` cannot be started or exec'd.
    pub fn scp(
        &self,
        target: &RemoteTarget,
        file: &Utf8Path,
        mode: ExecMode,
    ) -> Result<CommandOutput, ExecError> {
        let scp_args = self.build_scp_args(target, file);
        self.invoke(&self.config.scp_bin, &scp_args, mode)
    }

    /// Runs the trivial `true` command quietly and reports whether it
    /// succeeded. Always waits for the child, whatever mode the caller
    /// normally uses.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] when `ssh` cannot be started.
    pub fn probe(&self, target: &RemoteTarget) -> Result<bool, ExecError> {
        let args = [String::from("-q"), String::from("true")];
        self.ssh(target, &args, ExecMode::RunAndWait)
            .map(|output| output.is_success())
    }

    fn invoke(
        &self,
        program: &str,
        args: &[OsString],
        mode: ExecMode,
    ) -> Result<CommandOutput, ExecError> {
        debug!(program, ?mode, arg_count = args.len(), "invoking remote command");
        match mode {
            ExecMode::ReplaceProcess => Err(self.runner.exec(program, args)),
            ExecMode::RunAndWait => self.runner.run(program, args),
        }
    }

    fn build_ssh_args(&self, target: &RemoteTarget, args: &[String]) -> Vec<OsString> {
        let mut ssh_args = vec![
            OsString::from("-p"),
            OsString::from(self.config.ssh_port.to_string()),
        ];
        ssh_args.extend(self.common_options());
        ssh_args.push(OsString::from("-l"));
        ssh_args.push(OsString::from(&target.user));
        ssh_args.push(OsString::from(&target.host));
        ssh_args.extend(args.iter().map(OsString::from));
        ssh_args
    }

    fn build_scp_args(&self, target: &RemoteTarget, file: &Utf8Path) -> Vec<OsString> {
        let mut scp_args = vec![
            OsString::from("-P"),
            OsString::from(self.config.ssh_port.to_string()),
        ];
        scp_args.extend(self.common_options());
        scp_args.push(OsString::from(file.as_str()));
        scp_args.push(OsString::from(format!("{target}:")));
        scp_args
    }

    fn common_options(&self) -> Vec<OsString> {
        let mut args = Vec::new();

        if let Some(ref identity_file) = self.config.ssh_identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.config.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args
    }
}

#[cfg(test)]
mod tests;
