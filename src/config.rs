//! Configuration loading via `ortho-config`.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::aws::DEFAULT_AWS_BIN;
use crate::cloud_box::{
    ALLOWED_REGIONS, BoxOptions, DEFAULT_IMAGE_ID, DEFAULT_NAME, DEFAULT_REGION, DEFAULT_USERNAME,
};
use crate::exec::expand_tilde;
use crate::livery::{DEFAULT_TAR_BIN, LiverySource};
use crate::provider::KeyPair;
use crate::state::{DEFAULT_STATE_DIR, StateStore};

/// Key pair name registered with the provider by default.
pub const DEFAULT_KEY_NAME: &str = "blimp";

/// Public key uploaded when the key pair is missing.
pub const DEFAULT_PUBLIC_KEY_PATH: &str = "~/.ssh/id_rsa.pub";

/// Box settings derived from environment variables and configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BLIMP",
    discovery(
        app_name = "blimp",
        env_var = "BLIMP_CONFIG_PATH",
        config_file_name = "blimp.toml",
        dotfile_name = ".blimp.toml",
        project_file_name = "blimp.toml"
    )
)]
pub struct BlimpConfig {
    /// Region new boxes are created in.
    #[ortho_config(default = DEFAULT_REGION.to_owned())]
    pub region: String,
    /// Machine image for new boxes.
    #[ortho_config(default = DEFAULT_IMAGE_ID.to_owned())]
    pub image_id: String,
    /// Security group name. When absent the provider default applies and
    /// pre-flight validation is skipped.
    pub security_group: Option<String>,
    /// Remote login name.
    #[ortho_config(default = DEFAULT_USERNAME.to_owned())]
    pub username: String,
    /// Fleet or batch identifier tagged onto new boxes.
    #[ortho_config(default = 0)]
    pub fleet_id: u64,
    /// Directory holding one state file per box.
    #[ortho_config(default = DEFAULT_STATE_DIR.to_owned())]
    pub state_dir: String,
    /// Name of the key pair installed for the login user.
    #[ortho_config(default = DEFAULT_KEY_NAME.to_owned())]
    pub key_name: String,
    /// Public key imported when the key pair does not exist yet. Supports
    /// tilde expansion.
    #[ortho_config(default = DEFAULT_PUBLIC_KEY_PATH.to_owned())]
    pub public_key_path: String,
    /// Path to the `aws` executable.
    #[ortho_config(default = DEFAULT_AWS_BIN.to_owned())]
    pub aws_bin: String,
    /// Path to the `tar` executable.
    #[ortho_config(default = DEFAULT_TAR_BIN.to_owned())]
    pub tar_bin: String,
    /// Where livery bundles are written; the system temp dir when absent.
    pub bundle_dir: Option<String>,
    /// Whether `start` delivers the current directory as a livery.
    #[ortho_config(default = false)]
    pub bootstrap_livery: bool,
    /// Upper bound on the readiness wait. Absent means wait indefinitely.
    pub readiness_timeout_secs: Option<u64>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl BlimpConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to blimp.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("blimp")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages say how to supply the
    /// value through the environment or `blimp.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidValue`] when the region or timeout is out of
    /// range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.region,
                FieldMetadata::new("region", "BLIMP_REGION", "region"),
            ),
            (
                &self.image_id,
                FieldMetadata::new("machine image", "BLIMP_IMAGE_ID", "image_id"),
            ),
            (
                &self.username,
                FieldMetadata::new("login user", "BLIMP_USERNAME", "username"),
            ),
            (
                &self.state_dir,
                FieldMetadata::new("state directory", "BLIMP_STATE_DIR", "state_dir"),
            ),
            (
                &self.key_name,
                FieldMetadata::new("key pair name", "BLIMP_KEY_NAME", "key_name"),
            ),
            (
                &self.public_key_path,
                FieldMetadata::new(
                    "public key path",
                    "BLIMP_PUBLIC_KEY_PATH",
                    "public_key_path",
                ),
            ),
            (
                &self.aws_bin,
                FieldMetadata::new("aws executable", "BLIMP_AWS_BIN", "aws_bin"),
            ),
            (
                &self.tar_bin,
                FieldMetadata::new("tar executable", "BLIMP_TAR_BIN", "tar_bin"),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }

        if !ALLOWED_REGIONS.contains(&self.region.trim()) {
            return Err(ConfigError::InvalidValue(format!(
                "region '{}' is not supported; set BLIMP_REGION to one of: {}",
                self.region,
                ALLOWED_REGIONS.join(", ")
            )));
        }
        if self.readiness_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(String::from(
                "readiness_timeout_secs must be positive; unset BLIMP_READINESS_TIMEOUT_SECS \
                 to wait indefinitely",
            )));
        }
        Ok(())
    }

    /// Box settings for a new box named `name`, or the default name.
    #[must_use]
    pub fn box_options(&self, name: Option<&str>) -> BoxOptions {
        BoxOptions {
            name: name.map_or_else(|| String::from(DEFAULT_NAME), str::to_owned),
            region: self.region.trim().to_owned(),
            image_id: self.image_id.trim().to_owned(),
            security_group: self
                .security_group
                .as_deref()
                .map(str::trim)
                .filter(|group| !group.is_empty())
                .map(str::to_owned),
            fleet_id: self.fleet_id,
            username: self.username.trim().to_owned(),
            livery: self
                .bootstrap_livery
                .then_some(LiverySource::CurrentDirectory),
            ..BoxOptions::default()
        }
    }

    /// Key pair to install on new boxes, with the public key path expanded.
    #[must_use]
    pub fn key_pair(&self) -> KeyPair {
        KeyPair::new(
            self.key_name.trim(),
            expand_tilde(self.public_key_path.trim()),
        )
    }

    /// State store rooted at the configured directory.
    #[must_use]
    pub fn state_store(&self) -> StateStore {
        StateStore::new(expand_tilde(self.state_dir.trim()))
    }

    /// Directory livery bundles are written to.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the system temp directory
    /// is not valid UTF-8.
    pub fn bundle_dir(&self) -> Result<Utf8PathBuf, ConfigError> {
        if let Some(dir) = self.bundle_dir.as_deref().map(str::trim)
            && !dir.is_empty()
        {
            return Ok(Utf8PathBuf::from(expand_tilde(dir)));
        }
        let temp = Utf8PathBuf::from_path_buf(std::env::temp_dir()).map_err(|path| {
            ConfigError::InvalidValue(format!(
                "temporary directory {} is not valid UTF-8; set BLIMP_BUNDLE_DIR",
                path.display()
            ))
        })?;
        Ok(temp.join("blimp"))
    }

    /// Hard timeout for the readiness wait, if configured.
    #[must_use]
    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout_secs.map(Duration::from_secs)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value is present but unusable.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
