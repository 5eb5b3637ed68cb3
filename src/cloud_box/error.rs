//! Error types for the box lifecycle.

use thiserror::Error;

use crate::exec::ExecError;
use crate::livery::LiveryError;
use crate::provider::InstanceStatus;
use crate::state::StateError;

/// Errors raised by [`super::CloudBox`], generic over the provider error.
#[derive(Debug, Error)]
pub enum BoxError<E> {
    /// Raised when a region outside the allowed set is requested.
    #[error("invalid region '{region}'; expected one of: {allowed}")]
    InvalidRegion {
        /// Rejected region.
        region: String,
        /// Comma separated list of allowed regions.
        allowed: String,
    },
    /// Raised when box configuration does not check out against the
    /// provider, for example an unknown security group.
    #[error("box validation failed: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },
    /// Raised when an operation needs a backing instance and there is none.
    #[error("cannot {operation}: box has no backing instance")]
    MissingInstance {
        /// Operation that was attempted.
        operation: &'static str,
    },
    /// Raised when `start` is called on a box that already has an instance.
    #[error("box already started as instance {instance_id}")]
    AlreadyStarted {
        /// Identifier of the existing instance.
        instance_id: String,
    },
    /// Raised when the provider no longer knows the backing instance.
    #[error("provider has no record of instance {instance_id}")]
    UnknownInstance {
        /// Provider instance identifier.
        instance_id: String,
    },
    /// Raised when the instance has no external DNS name to connect to.
    #[error("instance {instance_id} has no public DNS name yet")]
    MissingDns {
        /// Provider instance identifier.
        instance_id: String,
    },
    /// Raised when a provider call fails.
    #[error("provider call failed: {0}")]
    Provider(#[source] E),
    /// Raised when the state record cannot be read or written.
    #[error(transparent)]
    State(#[from] StateError),
    /// Raised when the instance was destroyed but its state file remains.
    #[error("instance {instance_id} destroyed but its state file could not be removed: {source}")]
    StateCleanup {
        /// Identifier of the destroyed instance.
        instance_id: String,
        /// Underlying state store failure.
        source: StateError,
    },
    /// Raised when a remote command cannot be started.
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// Raised when livery delivery or the bootstrap script fails.
    #[error(transparent)]
    Bootstrap(#[from] LiveryError),
    /// Raised when a bounded readiness wait gives up.
    #[error(
        "remote shell on instance {instance_id} not reachable after {attempts} attempts \
         ({elapsed_secs}s)"
    )]
    ShellTimeout {
        /// Provider instance identifier.
        instance_id: String,
        /// Probe attempts made.
        attempts: u32,
        /// Whole seconds spent waiting.
        elapsed_secs: u64,
    },
    /// Raised when the instance does not reach the requested status in time.
    #[error(
        "instance {instance_id} did not reach '{target}' within {timeout_secs}s \
         (last seen '{last_seen}')"
    )]
    StateTimeout {
        /// Provider instance identifier.
        instance_id: String,
        /// Status being waited for.
        target: InstanceStatus,
        /// Last status reported by the provider.
        last_seen: InstanceStatus,
        /// Timeout that elapsed.
        timeout_secs: u64,
    },
}
