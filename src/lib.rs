//! Core library for Blimp, a manager for one disposable cloud instance.
//!
//! A [`CloudBox`] drives the lifecycle of a single instance: create it through
//! a [`ComputeProvider`], wait until its remote shell answers, deliver and run
//! a bootstrap livery, stop and resume it, and finally destroy it. A small
//! state file per instance lets later invocations reattach by instance id.
//!
//! Every operation is synchronous and blocks the calling thread. External
//! programs (`aws`, `ssh`, `scp`, `tar`) run through a [`CommandRunner`], so
//! tests can substitute the doubles in [`test_support`].

pub mod aws;
pub mod cloud_box;
pub mod config;
pub mod exec;
pub mod livery;
pub mod provider;
pub mod readiness;
pub mod state;
pub mod test_support;

pub use aws::{AwsCliProvider, AwsProviderError};
pub use cloud_box::{BoxError, BoxOptions, CloudBox, Collaborators};
pub use config::{BlimpConfig, ConfigError};
pub use exec::{
    CommandOutput, CommandRunner, ExecError, ExecMode, ProcessCommandRunner, RemoteShell,
    RemoteTarget, ShellConfig, StreamingCommandRunner,
};
pub use livery::{BootstrapDeliverer, Bundle, LiveryError, LiverySource, TarballPackager};
pub use provider::{
    ComputeProvider, InstanceDescriptor, InstanceHandle, InstanceRequest, InstanceRequestBuilder,
    InstanceStatus, KeyPair, RequestError,
};
pub use readiness::{Clock, PollReport, ReadinessError, ReadinessPoller, SystemClock};
pub use state::{StateError, StateRecord, StateStore};
