//! Lifecycle state machine for a single disposable instance.
//!
//! A [`CloudBox`] starts out unprovisioned. [`CloudBox::start`] creates the
//! backing instance and persists a state record; [`CloudBox::bootstrap`]
//! waits for the remote shell and delivers the livery; [`CloudBox::stop`] and
//! [`CloudBox::resume`] toggle power any number of times; and
//! [`CloudBox::destroy`] terminates the instance and deletes the record,
//! after which the box is inert again.
//!
//! Operations that need a backing instance either no-op (stop, resume,
//! destroy, DNS lookups, status waits) or fail with
//! [`BoxError::MissingInstance`] (state file path, remote commands).

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::exec::{CommandOutput, CommandRunner, ExecMode, RemoteShell, RemoteTarget};
use crate::livery::{BootstrapDeliverer, LiverySource};
use crate::provider::{
    ComputeProvider, InstanceDescriptor, InstanceHandle, InstanceRequest, InstanceStatus, KeyPair,
};
use crate::readiness::{Clock, POLL_INTERVAL, ReadinessError, ReadinessPoller, SystemClock};
use crate::state::{StateRecord, StateStore};

mod error;

pub use error::BoxError;

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "us-west-2";

/// Machine image used when none is configured.
pub const DEFAULT_IMAGE_ID: &str = "ami-ec0b86dc";

/// Remote login name used when none is configured.
pub const DEFAULT_USERNAME: &str = "ubuntu";

/// Display name used when none is configured.
pub const DEFAULT_NAME: &str = "Unnamed Box";

/// Sentinel reported by DNS accessors when there is no backing instance.
pub const NO_NAME: &str = "no name";

/// Value of the `CreatedBy` tag on every instance this crate creates.
pub const CREATED_BY: &str = "Blimp";

/// Regions a box may be placed in.
pub const ALLOWED_REGIONS: [&str; 3] = ["us-west-1", "us-west-2", "us-east-1"];

/// How long [`CloudBox::wait_for_state`] waits for a provider status.
pub const STATE_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

const NAME_TAG: &str = "Name";
const CREATED_BY_TAG: &str = "CreatedBy";
const FLEET_ID_TAG: &str = "FleetId";

/// User supplied settings for a box.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BoxOptions {
    /// Display name, also used as the `Name` tag.
    pub name: String,
    /// Region; must be one of [`ALLOWED_REGIONS`].
    pub region: String,
    /// Machine image identifier.
    pub image_id: String,
    /// Security group name, resolved by [`CloudBox::validate`].
    pub security_group: Option<String>,
    /// Fleet or batch identifier recorded as the `FleetId` tag.
    pub fleet_id: u64,
    /// Extra tags; the reserved keys are overridden on creation.
    pub tags: BTreeMap<String, String>,
    /// Remote login name.
    pub username: String,
    /// Livery delivered by [`CloudBox::bootstrap`]; `None` disables it.
    pub livery: Option<LiverySource>,
}

impl Default for BoxOptions {
    fn default() -> Self {
        Self {
            name: String::from(DEFAULT_NAME),
            region: String::from(DEFAULT_REGION),
            image_id: String::from(DEFAULT_IMAGE_ID),
            security_group: None,
            fleet_id: 0,
            tags: BTreeMap::new(),
            username: String::from(DEFAULT_USERNAME),
            livery: None,
        }
    }
}

/// Everything a box talks to, injected at construction.
#[derive(Debug)]
pub struct Collaborators<P, R, C = SystemClock>
where
    P: ComputeProvider,
    R: CommandRunner,
    C: Clock,
{
    /// Compute provider managing the backing instance.
    pub provider: P,
    /// Remote shell used for probes, bootstrap and interactive sessions.
    pub shell: RemoteShell<R>,
    /// Packages and runs the livery.
    pub deliverer: BootstrapDeliverer<R>,
    /// Where state records live.
    pub state: StateStore,
    /// Readiness policy; its clock also paces status waits.
    pub poller: ReadinessPoller<C>,
    /// Key pair installed for the login user.
    pub key_pair: KeyPair,
}

/// A single leased instance and its local bookkeeping.
#[derive(Debug)]
pub struct CloudBox<P, R, C = SystemClock>
where
    P: ComputeProvider,
    R: CommandRunner,
    C: Clock,
{
    options: BoxOptions,
    handle: Option<InstanceHandle>,
    shell_reachable: bool,
    collaborators: Collaborators<P, R, C>,
}

impl<P, R, C> CloudBox<P, R, C>
where
    P: ComputeProvider,
    R: CommandRunner,
    C: Clock,
{
    /// Creates an unprovisioned box.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::InvalidRegion`] when `options.region` is not one
    /// of [`ALLOWED_REGIONS`].
    pub fn new(
        options: BoxOptions,
        collaborators: Collaborators<P, R, C>,
    ) -> Result<Self, BoxError<P::Error>> {
        check_region(&options.region)?;
        Ok(Self {
            options,
            handle: None,
            shell_reachable: false,
            collaborators,
        })
    }

    /// Reattaches to an instance created by an earlier run.
    ///
    /// Name and region come from the persisted record for `instance_id`; the
    /// remaining settings come from `options`. Returns `Ok(None)` when the
    /// provider does not know the instance.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::State`] when the record cannot be read,
    /// [`BoxError::InvalidRegion`] when it names a disallowed region, or
    /// [`BoxError::Provider`] when the lookup fails.
    pub fn from_instance_id(
        instance_id: &str,
        options: BoxOptions,
        collaborators: Collaborators<P, R, C>,
    ) -> Result<Option<Self>, BoxError<P::Error>> {
        let record = collaborators.state.read(instance_id)?;
        let handle = InstanceHandle {
            id: instance_id.to_owned(),
            region: record.region.clone(),
        };
        let known = collaborators
            .provider
            .describe(&handle)
            .map_err(BoxError::Provider)?;
        if known.is_none() {
            debug!(instance_id, "provider does not know instance");
            return Ok(None);
        }

        let mut cloud_box = Self::new(
            BoxOptions {
                name: record.name,
                region: record.region,
                ..options
            },
            collaborators,
        )?;
        cloud_box.handle = Some(handle);
        Ok(Some(cloud_box))
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Sets the display name; takes effect on the next state write.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.options.name = name.into();
    }

    /// Current region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.options.region
    }

    /// Changes the region used by the next [`CloudBox::start`].
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::InvalidRegion`] and leaves the region unchanged
    /// when `region` is not allowed.
    pub fn set_region(&mut self, region: impl Into<String>) -> Result<(), BoxError<P::Error>> {
        let candidate = region.into();
        check_region(&candidate)?;
        self.options.region = candidate;
        Ok(())
    }

    /// Settings the box was built with.
    #[must_use]
    pub const fn options(&self) -> &BoxOptions {
        &self.options
    }

    /// Sets or clears the livery delivered by [`CloudBox::bootstrap`].
    pub fn set_livery(&mut self, livery: Option<LiverySource>) {
        self.options.livery = livery;
    }

    /// Backing instance, if started.
    #[must_use]
    pub const fn handle(&self) -> Option<&InstanceHandle> {
        self.handle.as_ref()
    }

    /// Backing instance identifier, if started.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        self.handle.as_ref().map(|handle| handle.id.as_str())
    }

    /// Whether the readiness probe has succeeded for this box.
    #[must_use]
    pub const fn is_shell_reachable(&self) -> bool {
        self.shell_reachable
    }

    /// Injected collaborators.
    #[must_use]
    pub const fn collaborators(&self) -> &Collaborators<P, R, C> {
        &self.collaborators
    }

    /// Checks that the configured security group exists.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Validation`] when no group is configured or the
    /// provider cannot resolve it, and [`BoxError::Provider`] when the lookup
    /// itself fails.
    pub fn validate(&self) -> Result<(), BoxError<P::Error>> {
        let Some(group) = self.options.security_group.as_deref() else {
            return Err(BoxError::Validation {
                message: String::from("no security group configured"),
            });
        };
        let resolved = self
            .collaborators
            .provider
            .resolve_security_group(&self.options.region, group)
            .map_err(BoxError::Provider)?;
        match resolved {
            Some(group_id) => {
                debug!(group, group_id, region = %self.options.region, "security group resolved");
                Ok(())
            }
            None => Err(BoxError::Validation {
                message: format!(
                    "security group '{group}' does not exist in {}",
                    self.options.region
                ),
            }),
        }
    }

    /// Creates the backing instance and persists its state record.
    ///
    /// No rollback is attempted: if the record cannot be written the
    /// instance keeps running and the box keeps its handle.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::AlreadyStarted`] when the box has an instance,
    /// [`BoxError::Provider`] when key import or creation fails, and
    /// [`BoxError::State`] when the record cannot be written.
    pub fn start(&mut self) -> Result<&InstanceHandle, BoxError<P::Error>> {
        if let Some(existing) = &self.handle {
            return Err(BoxError::AlreadyStarted {
                instance_id: existing.id.clone(),
            });
        }

        self.collaborators.state.ensure_dir()?;
        let request = self.instance_request()?;
        let provider = &self.collaborators.provider;
        provider
            .import_key_pair(&request.region, &self.collaborators.key_pair)
            .map_err(BoxError::Provider)?;
        let created = provider
            .create_instance(&request)
            .map_err(BoxError::Provider)?;
        info!(
            instance_id = %created.id,
            region = %created.region,
            name = %self.options.name,
            "box started"
        );

        let handle = self.handle.insert(created);
        let record = StateRecord::new(&self.options.name, &self.options.region);
        self.collaborators.state.write(&handle.id, &record)?;
        Ok(handle)
    }

    fn instance_request(&self) -> Result<InstanceRequest, BoxError<P::Error>> {
        let mut builder = InstanceRequest::builder()
            .region(&self.options.region)
            .image_id(&self.options.image_id)
            .key_name(&self.collaborators.key_pair.name)
            .tags(&self.options.tags)
            .tag(NAME_TAG, &self.options.name)
            .tag(CREATED_BY_TAG, CREATED_BY)
            .tag(FLEET_ID_TAG, self.options.fleet_id.to_string());
        if let Some(group) = &self.options.security_group {
            builder = builder.security_group(group);
        }
        builder.build().map_err(|err| BoxError::Validation {
            message: err.to_string(),
        })
    }

    /// Path of the state file for the backing instance.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::MissingInstance`] when the box has not started.
    pub fn state_file(&self) -> Result<Utf8PathBuf, BoxError<P::Error>> {
        let handle = self.require_handle("locate the state file")?;
        Ok(self.collaborators.state.path_for(&handle.id)?)
    }

    /// Overwrites the state record with the current name and region.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::MissingInstance`] when the box has not started and
    /// [`BoxError::State`] when the write fails.
    pub fn write_state_file(&self) -> Result<Utf8PathBuf, BoxError<P::Error>> {
        let handle = self.require_handle("write the state file")?;
        let record = StateRecord::new(&self.options.name, &self.options.region);
        Ok(self.collaborators.state.write(&handle.id, &record)?)
    }

    /// Records the instance's DNS names in its state file.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::MissingInstance`] when the box has not started,
    /// [`BoxError::UnknownInstance`] when the provider lost the instance, and
    /// [`BoxError::State`] when the record cannot be updated.
    pub fn mark_online(&self) -> Result<StateRecord, BoxError<P::Error>> {
        let handle = self.require_handle("mark the box online")?;
        let descriptor = self.describe_known(handle)?;
        let record = self.collaborators.state.record_online(
            &handle.id,
            &descriptor.dns_name,
            &descriptor.internal_dns_name,
        )?;
        info!(instance_id = %handle.id, dns = %descriptor.dns_name, "box online");
        Ok(record)
    }

    /// Waits for the remote shell, then delivers and runs the livery.
    ///
    /// Does nothing when no livery is configured. Returns whether a livery
    /// was delivered.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError`] when the readiness wait fails or delivery fails
    /// at any step.
    pub fn bootstrap<W: Write>(&mut self, progress: &mut W) -> Result<bool, BoxError<P::Error>> {
        let Some(livery) = self.options.livery.clone() else {
            debug!(name = %self.options.name, "no livery configured; skipping bootstrap");
            return Ok(false);
        };

        self.wait_for_shell(progress)?;
        let target = self.target()?;
        let source = livery.resolve()?;
        self.collaborators
            .deliverer
            .deliver(&self.collaborators.shell, &target, &source)?;
        info!(instance_id = ?self.instance_id(), "bootstrap complete");
        Ok(true)
    }

    /// Blocks until the remote shell accepts a trivial command.
    ///
    /// Idempotent: returns at once when a previous wait succeeded. The
    /// external DNS name is re-read on every attempt; while it is empty the
    /// attempt counts as a failure.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::MissingInstance`] when the box has not started,
    /// probe failures unchanged, and [`BoxError::ShellTimeout`] when the
    /// poller has a hard timeout that elapses.
    pub fn wait_for_shell<W: Write>(&mut self, progress: &mut W) -> Result<(), BoxError<P::Error>> {
        if self.shell_reachable {
            return Ok(());
        }
        let handle = self.require_handle("wait for the remote shell")?.clone();

        let outcome = self
            .collaborators
            .poller
            .wait(&self.options.name, progress, || self.probe_shell(&handle));
        match outcome {
            Ok(_) => {
                self.shell_reachable = true;
                Ok(())
            }
            Err(ReadinessError::Probe(err)) => Err(err),
            Err(ReadinessError::Timeout {
                attempts,
                elapsed_secs,
            }) => Err(BoxError::ShellTimeout {
                instance_id: handle.id,
                attempts,
                elapsed_secs,
            }),
        }
    }

    fn probe_shell(&self, handle: &InstanceHandle) -> Result<bool, BoxError<P::Error>> {
        let descriptor = self.describe_known(handle)?;
        if descriptor.dns_name.is_empty() {
            return Ok(false);
        }
        let target = RemoteTarget::new(&self.options.username, descriptor.dns_name);
        Ok(self.collaborators.shell.probe(&target)?)
    }

    /// Powers the instance off. No-op without a backing instance.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Provider`] when the provider call fails.
    pub fn stop(&mut self) -> Result<(), BoxError<P::Error>> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        self.collaborators
            .provider
            .stop(handle)
            .map_err(BoxError::Provider)?;
        self.shell_reachable = false;
        info!(instance_id = %handle.id, "box stopped");
        Ok(())
    }

    /// Powers a stopped instance back on. No-op without a backing instance.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Provider`] when the provider call fails.
    pub fn resume(&mut self) -> Result<(), BoxError<P::Error>> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        self.collaborators
            .provider
            .start(handle)
            .map_err(BoxError::Provider)?;
        info!(instance_id = %handle.id, "box resumed");
        Ok(())
    }

    /// Terminates the instance and deletes its state record. No-op without
    /// a backing instance.
    ///
    /// The handle is released as soon as the provider accepts the destroy,
    /// so the box is inert even when removing the record fails.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Provider`] when the destroy call fails (the box
    /// keeps its handle) and [`BoxError::StateCleanup`] when the record
    /// cannot be removed afterwards.
    pub fn destroy(&mut self) -> Result<(), BoxError<P::Error>> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        self.collaborators
            .provider
            .destroy(handle)
            .map_err(BoxError::Provider)?;
        info!(instance_id = %handle.id, "box destroyed");

        let instance_id = handle.id.clone();
        self.handle = None;
        self.shell_reachable = false;
        self.collaborators
            .state
            .remove(&instance_id)
            .map_err(|source| {
                warn!(instance_id, error = %source, "state file left behind");
                BoxError::StateCleanup {
                    instance_id: instance_id.clone(),
                    source,
                }
            })
    }

    /// External DNS name as currently reported by the provider, or
    /// [`NO_NAME`] without a backing instance.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Provider`] when the lookup fails and
    /// [`BoxError::UnknownInstance`] when the provider lost the instance.
    pub fn dns_name(&self) -> Result<String, BoxError<P::Error>> {
        self.describe_field(|descriptor| descriptor.dns_name)
    }

    /// Internal DNS name as currently reported by the provider, or
    /// [`NO_NAME`] without a backing instance.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::Provider`] when the lookup fails and
    /// [`BoxError::UnknownInstance`] when the provider lost the instance.
    pub fn internal_dns_name(&self) -> Result<String, BoxError<P::Error>> {
        self.describe_field(|descriptor| descriptor.internal_dns_name)
    }

    fn describe_field(
        &self,
        field: impl FnOnce(InstanceDescriptor) -> String,
    ) -> Result<String, BoxError<P::Error>> {
        let Some(handle) = &self.handle else {
            return Ok(String::from(NO_NAME));
        };
        self.describe_known(handle).map(field)
    }

    /// Blocks until the provider reports `target`, invoking `probe` before
    /// every check. No-op without a backing instance.
    ///
    /// Checks are paced by [`POLL_INTERVAL`] on the poller's clock.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::StateTimeout`] after [`STATE_WAIT_TIMEOUT`],
    /// [`BoxError::UnknownInstance`] when the instance disappears, and
    /// [`BoxError::Provider`] when a lookup fails.
    pub fn wait_for_state<F>(
        &self,
        target: &InstanceStatus,
        mut probe: F,
    ) -> Result<(), BoxError<P::Error>>
    where
        F: FnMut(),
    {
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        let clock = self.collaborators.poller.clock();
        let started = clock.now();

        loop {
            probe();
            let descriptor = self.describe_known(handle)?;
            if &descriptor.status == target {
                debug!(instance_id = %handle.id, status = %target, "instance reached status");
                return Ok(());
            }

            let elapsed = clock.now().saturating_duration_since(started);
            if elapsed >= STATE_WAIT_TIMEOUT {
                return Err(BoxError::StateTimeout {
                    instance_id: handle.id.clone(),
                    target: target.clone(),
                    last_seen: descriptor.status,
                    timeout_secs: STATE_WAIT_TIMEOUT.as_secs(),
                });
            }
            clock.sleep(POLL_INTERVAL);
        }
    }

    /// Runs `ssh` against the box with `args` as the remote command.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::MissingInstance`] or [`BoxError::MissingDns`] when
    /// there is nothing to connect to, and [`BoxError::Exec`] when `ssh`
    /// cannot be started.
    pub fn ssh_into(
        &self,
        args: &[String],
        mode: ExecMode,
    ) -> Result<CommandOutput, BoxError<P::Error>> {
        let target = self.target()?;
        Ok(self.collaborators.shell.ssh(&target, args, mode)?)
    }

    /// Copies `file` into the login user's home directory on the box.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::MissingInstance`] or [`BoxError::MissingDns`] when
    /// there is nothing to connect to, and [`BoxError::Exec`] when `scp`
    /// cannot be started.
    pub fn scp_file(
        &self,
        file: &Utf8Path,
        mode: ExecMode,
    ) -> Result<CommandOutput, BoxError<P::Error>> {
        let target = self.target()?;
        Ok(self.collaborators.shell.scp(&target, file, mode)?)
    }

    /// Login and external host for the box.
    ///
    /// # Errors
    ///
    /// Returns [`BoxError::MissingInstance`] when the box has not started and
    /// [`BoxError::MissingDns`] when the provider has not assigned a name.
    pub fn target(&self) -> Result<RemoteTarget, BoxError<P::Error>> {
        let handle = self.require_handle("connect to the box")?;
        let descriptor = self.describe_known(handle)?;
        if descriptor.dns_name.is_empty() {
            return Err(BoxError::MissingDns {
                instance_id: handle.id.clone(),
            });
        }
        Ok(RemoteTarget::new(
            &self.options.username,
            descriptor.dns_name,
        ))
    }

    fn require_handle(
        &self,
        operation: &'static str,
    ) -> Result<&InstanceHandle, BoxError<P::Error>> {
        self.handle
            .as_ref()
            .ok_or(BoxError::MissingInstance { operation })
    }

    fn describe_known(
        &self,
        handle: &InstanceHandle,
    ) -> Result<InstanceDescriptor, BoxError<P::Error>> {
        self.collaborators
            .provider
            .describe(handle)
            .map_err(BoxError::Provider)?
            .ok_or_else(|| BoxError::UnknownInstance {
                instance_id: handle.id.clone(),
            })
    }
}

fn check_region<E>(region: &str) -> Result<(), BoxError<E>> {
    if ALLOWED_REGIONS.contains(&region) {
        return Ok(());
    }
    Err(BoxError::InvalidRegion {
        region: region.to_owned(),
        allowed: ALLOWED_REGIONS.join(", "),
    })
}

#[cfg(test)]
mod tests;
