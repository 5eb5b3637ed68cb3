//! Remote shell configuration and error types.
//!
//! [`ShellConfig`] holds the `ssh`/`scp` settings used to reach a box. It is
//! loaded via `ortho-config`, which merges defaults, configuration files, and
//! environment variables.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default SSH port for freshly provisioned instances.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH and SCP settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BLIMP_SSH",
    discovery(
        app_name = "blimp",
        env_var = "BLIMP_CONFIG_PATH",
        config_file_name = "blimp.toml",
        dotfile_name = ".blimp.toml",
        project_file_name = "blimp.toml"
    )
)]
pub struct ShellConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// TCP port the remote shell service listens on.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,
    /// Whether to force batch mode so SSH never prompts for a password.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking; disabled by default because
    /// every box gets a fresh host key.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null` for ephemeral hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Private key used to authenticate. Supports tilde expansion. When
    /// absent SSH falls back to its default identities.
    pub ssh_identity_file: Option<String>,
}

impl ShellConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::InvalidConfig`] when any required field is empty.
    pub fn validate(&self) -> Result<(), ExecError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        if self.ssh_port == 0 {
            return Err(ExecError::InvalidConfig {
                field: String::from("ssh_port"),
            });
        }
        Ok(())
    }

    /// Loads configuration from defaults, configuration files, and
    /// environment variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::ConfigLoad`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ExecError> {
        Self::load_from_iter([std::ffi::OsString::from("blimp")]).map_err(|err| {
            ExecError::ConfigLoad {
                message: err.to_string(),
            }
        })
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), ExecError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(ExecError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), ExecError> {
        Self::require_optional_value(Some(value), field)
    }
}

/// Errors surfaced while running local or remote commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when configuration is missing required values.
    #[error("missing {field}: set BLIMP_SSH_{env_suffix} or add {field} to blimp.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when layered configuration cannot be merged.
    #[error("shell configuration parsing failed: {message}")]
    ConfigLoad {
        /// Loader error message.
        message: String,
    },
    /// Raised when a command cannot be spawned or exec'd.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
}
