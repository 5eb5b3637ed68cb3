//! Error types for the `aws` CLI provider.

use thiserror::Error;

use crate::exec::ExecError;

/// Errors raised by [`super::AwsCliProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AwsProviderError {
    /// Raised when the provider is constructed with blank settings.
    #[error("missing {field}")]
    InvalidConfig {
        /// Name of the missing or invalid field.
        field: String,
    },
    /// Raised when the CLI exits non-zero.
    #[error("{program} {action} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed (typically `aws`).
        program: String,
        /// EC2 subcommand being run (for example `run-instances`).
        action: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when JSON output from the CLI cannot be parsed.
    #[error("failed to parse {action} output: {message}")]
    Parse {
        /// EC2 subcommand whose output was rejected.
        action: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when a call that must return an instance returned none.
    #[error("{action} returned no instance")]
    MissingInstance {
        /// EC2 subcommand that came back empty.
        action: String,
    },
    /// Raised when command execution fails.
    #[error(transparent)]
    Runner(#[from] ExecError),
}
