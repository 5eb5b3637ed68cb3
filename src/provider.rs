//! Compute provider abstraction for a single disposable instance.
//!
//! The box lifecycle only needs create, stop, start, destroy, and a
//! point-in-time describe, plus two setup lookups (security group and key
//! pair). Implementations are injected into [`crate::CloudBox`] so tests can
//! substitute a fake.

use std::collections::BTreeMap;
use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Parameters required to create a new instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRequest {
    /// Region the instance is created in (for example `us-west-2`).
    pub region: String,
    /// Machine image identifier (for example `ami-ec0b86dc`).
    pub image_id: String,
    /// Name of the key pair installed for the login user.
    pub key_name: String,
    /// Security groups applied to the instance; empty means provider default.
    pub security_groups: Vec<String>,
    /// Tags attached to the instance.
    pub tags: BTreeMap<String, String>,
}

impl InstanceRequest {
    /// Starts a builder for an [`InstanceRequest`].
    #[must_use]
    pub fn builder() -> InstanceRequestBuilder {
        InstanceRequestBuilder::new()
    }

    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] when a required string is empty.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.region.is_empty() {
            return Err(RequestError::Validation(String::from("region")));
        }
        if self.image_id.is_empty() {
            return Err(RequestError::Validation(String::from("image_id")));
        }
        if self.key_name.is_empty() {
            return Err(RequestError::Validation(String::from("key_name")));
        }
        if self.security_groups.iter().any(String::is_empty) {
            return Err(RequestError::Validation(String::from("security_groups")));
        }
        Ok(())
    }
}

/// Builder for [`InstanceRequest`] that trims and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceRequestBuilder {
    region: String,
    image_id: String,
    key_name: String,
    security_groups: Vec<String>,
    tags: BTreeMap<String, String>,
}

impl InstanceRequestBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the region.
    #[must_use]
    pub fn region(mut self, value: impl Into<String>) -> Self {
        self.region = value.into();
        self
    }

    /// Sets the image identifier.
    #[must_use]
    pub fn image_id(mut self, value: impl Into<String>) -> Self {
        self.image_id = value.into();
        self
    }

    /// Sets the key pair name.
    #[must_use]
    pub fn key_name(mut self, value: impl Into<String>) -> Self {
        self.key_name = value.into();
        self
    }

    /// Adds a security group.
    #[must_use]
    pub fn security_group(mut self, value: impl Into<String>) -> Self {
        self.security_groups.push(value.into());
        self
    }

    /// Merges `tags` into the request; later keys win.
    #[must_use]
    pub fn tags(mut self, tags: &BTreeMap<String, String>) -> Self {
        self.tags
            .extend(tags.iter().map(|(key, value)| (key.clone(), value.clone())));
        self
    }

    /// Sets a single tag, replacing any previous value for `key`.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Builds and validates the [`InstanceRequest`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<InstanceRequest, RequestError> {
        let request = InstanceRequest {
            region: self.region.trim().to_owned(),
            image_id: self.image_id.trim().to_owned(),
            key_name: self.key_name.trim().to_owned(),
            security_groups: self
                .security_groups
                .iter()
                .map(|group| group.trim().to_owned())
                .collect(),
            tags: self.tags,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Errors raised while assembling provider requests.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Handle returned by a provider once an instance has been created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceHandle {
    /// Provider specific identifier for the instance.
    pub id: String,
    /// Region in which the instance lives.
    pub region: String,
}

/// Lifecycle status reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceStatus {
    /// Booting.
    Pending,
    /// Running; the remote shell may still be starting.
    Running,
    /// Shutting down towards `Stopped`.
    Stopping,
    /// Powered off but retained.
    Stopped,
    /// Being terminated.
    ShuttingDown,
    /// Gone.
    Terminated,
    /// Any status this crate does not model.
    Other(String),
}

impl InstanceStatus {
    /// Maps a provider status name onto an [`InstanceStatus`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Returns the provider status name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceDescriptor {
    /// Provider specific identifier.
    pub id: String,
    /// Externally resolvable DNS name; empty until assigned.
    pub dns_name: String,
    /// DNS name inside the provider's network; empty until assigned.
    pub internal_dns_name: String,
    /// Current lifecycle status.
    pub status: InstanceStatus,
}

/// Key pair installed on new instances for the login user.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPair {
    /// Name the key is registered under with the provider.
    pub name: String,
    /// Local path to the OpenSSH public key.
    pub public_key_path: Utf8PathBuf,
}

impl KeyPair {
    /// Builds a key pair description.
    #[must_use]
    pub fn new(name: impl Into<String>, public_key_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            public_key_path: public_key_path.into(),
        }
    }
}

/// Minimal interface implemented by compute providers.
///
/// Every call blocks until the provider answers. Implementations perform no
/// retries; failures surface to the caller unchanged.
pub trait ComputeProvider {
    /// Provider specific error type.
    type Error: std::error::Error + 'static;

    /// Creates a new instance and returns a handle for subsequent calls.
    ///
    /// # Errors
    ///
    /// Returns the provider error when creation fails.
    fn create_instance(&self, request: &InstanceRequest) -> Result<InstanceHandle, Self::Error>;

    /// Powers the instance off, retaining its disks.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the call fails.
    fn stop(&self, handle: &InstanceHandle) -> Result<(), Self::Error>;

    /// Powers a stopped instance back on.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the call fails.
    fn start(&self, handle: &InstanceHandle) -> Result<(), Self::Error>;

    /// Terminates the instance.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the call fails.
    fn destroy(&self, handle: &InstanceHandle) -> Result<(), Self::Error>;

    /// Looks the instance up, returning `None` when the provider does not
    /// know it.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the lookup itself fails.
    fn describe(&self, handle: &InstanceHandle) -> Result<Option<InstanceDescriptor>, Self::Error>;

    /// Resolves a security group name to its identifier.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the lookup itself fails.
    fn resolve_security_group(&self, region: &str, name: &str)
    -> Result<Option<String>, Self::Error>;

    /// Registers `key` with the provider. Importing a key that already
    /// exists is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the import fails.
    fn import_key_pair(&self, region: &str, key: &KeyPair) -> Result<(), Self::Error>;
}
