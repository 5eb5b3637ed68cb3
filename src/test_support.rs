//! Test support utilities shared across unit and integration tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ffi::OsString;
use std::rc::Rc;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use thiserror::Error;

use crate::cloud_box::Collaborators;
use crate::exec::{
    CommandOutput, CommandRunner, DEFAULT_SSH_PORT, ExecError, RemoteShell, ShellConfig,
};
use crate::livery::{BootstrapDeliverer, DEFAULT_TAR_BIN, TarballPackager};
use crate::provider::{
    ComputeProvider, InstanceDescriptor, InstanceHandle, InstanceRequest, InstanceStatus, KeyPair,
};
use crate::readiness::{Clock, ReadinessPoller};
use crate::state::StateStore;

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// How a [`ScriptedRunner`] was asked to run a command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvocationKind {
    /// Child process, output captured.
    Run,
    /// Process replacement.
    Exec,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Whether the command was run or exec'd.
    pub kind: InvocationKind,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }

    fn record(&self, program: &str, args: &[OsString], kind: InvocationKind) {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            kind,
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        self.record(program, args, InvocationKind::Run);
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ExecError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }

    fn exec(&self, program: &str, args: &[OsString]) -> ExecError {
        self.record(program, args, InvocationKind::Exec);
        ExecError::Spawn {
            program: program.to_owned(),
            message: String::from("process replacement is not available in tests"),
        }
    }
}

/// Clock whose time only moves when slept on or advanced explicitly.
#[derive(Clone, Debug)]
pub struct FakeClock {
    origin: Instant,
    offset: Rc<Cell<Duration>>,
    sleeps: Rc<RefCell<Vec<Duration>>>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Rc::new(Cell::new(Duration::ZERO)),
            sleeps: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Moves time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get().saturating_add(by));
    }

    /// Returns every sleep requested so far.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }

    /// Time elapsed since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }
}

/// Provider operations that [`FakeProvider`] can be told to fail.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ProviderOp {
    /// `create_instance`.
    Create,
    /// `stop`.
    Stop,
    /// `start`.
    Start,
    /// `destroy`.
    Destroy,
    /// `describe`.
    Describe,
    /// `resolve_security_group`.
    ResolveSecurityGroup,
    /// `import_key_pair`.
    ImportKeyPair,
}

/// A call recorded by [`FakeProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// Instance creation with the full request.
    Create(InstanceRequest),
    /// Stop of the given instance id.
    Stop(String),
    /// Start of the given instance id.
    Start(String),
    /// Destroy of the given instance id.
    Destroy(String),
    /// Describe of the given instance id.
    Describe(String),
    /// Security group lookup by name.
    ResolveSecurityGroup {
        /// Region searched.
        region: String,
        /// Group name.
        name: String,
    },
    /// Key pair import.
    ImportKeyPair {
        /// Region the key is imported into.
        region: String,
        /// Key name.
        name: String,
    },
}

/// Error returned by [`FakeProvider`] for operations marked as failing.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("simulated provider failure during {op:?}")]
pub struct FakeProviderError {
    /// Operation that failed.
    pub op: ProviderOp,
}

#[derive(Debug)]
struct FakeProviderState {
    next_id: String,
    dns_name: String,
    internal_dns_name: String,
    instances: BTreeMap<String, InstanceDescriptor>,
    statuses: VecDeque<InstanceStatus>,
    security_groups: BTreeMap<String, String>,
    failing: BTreeSet<ProviderOp>,
    calls: Vec<ProviderCall>,
}

/// In-memory [`ComputeProvider`] that records every call.
///
/// Created instances get the configured id and DNS names and start out
/// `pending`. Scripted statuses, when queued, are applied one per
/// `describe` call before falling back to the last known status.
#[derive(Clone, Debug)]
pub struct FakeProvider {
    state: Rc<RefCell<FakeProviderState>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new("i-123")
    }
}

impl FakeProvider {
    /// Creates a provider that hands out `instance_id` on creation.
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        let id = instance_id.into();
        Self {
            state: Rc::new(RefCell::new(FakeProviderState {
                dns_name: format!("{id}.compute.example.com"),
                internal_dns_name: format!("{id}.internal"),
                next_id: id,
                instances: BTreeMap::new(),
                statuses: VecDeque::new(),
                security_groups: BTreeMap::new(),
                failing: BTreeSet::new(),
                calls: Vec::new(),
            })),
        }
    }

    /// Overrides the DNS names assigned to created and known instances.
    pub fn set_dns_names(&self, dns_name: impl Into<String>, internal: impl Into<String>) {
        let mut state = self.state.borrow_mut();
        state.dns_name = dns_name.into();
        state.internal_dns_name = internal.into();
        let (dns, internal_dns) = (state.dns_name.clone(), state.internal_dns_name.clone());
        for descriptor in state.instances.values_mut() {
            descriptor.dns_name.clone_from(&dns);
            descriptor.internal_dns_name.clone_from(&internal_dns);
        }
    }

    /// Registers a security group the provider can resolve.
    pub fn add_security_group(&self, name: impl Into<String>, id: impl Into<String>) {
        self.state
            .borrow_mut()
            .security_groups
            .insert(name.into(), id.into());
    }

    /// Registers an existing instance, as if created by an earlier run.
    pub fn insert_instance(&self, id: impl Into<String>, status: InstanceStatus) {
        let mut state = self.state.borrow_mut();
        let instance_id = id.into();
        let descriptor = InstanceDescriptor {
            id: instance_id.clone(),
            dns_name: state.dns_name.clone(),
            internal_dns_name: state.internal_dns_name.clone(),
            status,
        };
        state.instances.insert(instance_id, descriptor);
    }

    /// Queues statuses returned by successive `describe` calls.
    pub fn push_statuses(&self, statuses: impl IntoIterator<Item = InstanceStatus>) {
        self.state.borrow_mut().statuses.extend(statuses);
    }

    /// Makes every subsequent call of `op` fail.
    pub fn fail_on(&self, op: ProviderOp) {
        self.state.borrow_mut().failing.insert(op);
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.borrow().calls.clone()
    }

    /// Instance ids passed to `destroy`, in call order.
    #[must_use]
    pub fn destroy_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::Destroy(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Returns the current status of `id`, if known.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<InstanceStatus> {
        self.state
            .borrow()
            .instances
            .get(id)
            .map(|descriptor| descriptor.status.clone())
    }

    fn enter(&self, op: ProviderOp, call: ProviderCall) -> Result<(), FakeProviderError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        if state.failing.contains(&op) {
            return Err(FakeProviderError { op });
        }
        Ok(())
    }

    fn set_status(&self, id: &str, status: InstanceStatus) {
        if let Some(descriptor) = self.state.borrow_mut().instances.get_mut(id) {
            descriptor.status = status;
        }
    }
}

impl ComputeProvider for FakeProvider {
    type Error = FakeProviderError;

    fn create_instance(&self, request: &InstanceRequest) -> Result<InstanceHandle, Self::Error> {
        self.enter(ProviderOp::Create, ProviderCall::Create(request.clone()))?;
        let id = self.state.borrow().next_id.clone();
        self.insert_instance(id.clone(), InstanceStatus::Pending);
        Ok(InstanceHandle {
            id,
            region: request.region.clone(),
        })
    }

    fn stop(&self, handle: &InstanceHandle) -> Result<(), Self::Error> {
        self.enter(ProviderOp::Stop, ProviderCall::Stop(handle.id.clone()))?;
        self.set_status(&handle.id, InstanceStatus::Stopped);
        Ok(())
    }

    fn start(&self, handle: &InstanceHandle) -> Result<(), Self::Error> {
        self.enter(ProviderOp::Start, ProviderCall::Start(handle.id.clone()))?;
        self.set_status(&handle.id, InstanceStatus::Running);
        Ok(())
    }

    fn destroy(&self, handle: &InstanceHandle) -> Result<(), Self::Error> {
        self.enter(ProviderOp::Destroy, ProviderCall::Destroy(handle.id.clone()))?;
        self.set_status(&handle.id, InstanceStatus::Terminated);
        Ok(())
    }

    fn describe(&self, handle: &InstanceHandle) -> Result<Option<InstanceDescriptor>, Self::Error> {
        self.enter(ProviderOp::Describe, ProviderCall::Describe(handle.id.clone()))?;
        let mut state = self.state.borrow_mut();
        let next_status = if state.instances.contains_key(&handle.id) {
            state.statuses.pop_front()
        } else {
            None
        };
        let Some(descriptor) = state.instances.get_mut(&handle.id) else {
            return Ok(None);
        };
        if let Some(status) = next_status {
            descriptor.status = status;
        }
        Ok(Some(descriptor.clone()))
    }

    fn resolve_security_group(
        &self,
        region: &str,
        name: &str,
    ) -> Result<Option<String>, Self::Error> {
        self.enter(
            ProviderOp::ResolveSecurityGroup,
            ProviderCall::ResolveSecurityGroup {
                region: region.to_owned(),
                name: name.to_owned(),
            },
        )?;
        Ok(self.state.borrow().security_groups.get(name).cloned())
    }

    fn import_key_pair(&self, region: &str, key: &KeyPair) -> Result<(), Self::Error> {
        self.enter(
            ProviderOp::ImportKeyPair,
            ProviderCall::ImportKeyPair {
                region: region.to_owned(),
                name: key.name.clone(),
            },
        )
    }
}

/// Shell settings used across tests: batch mode, no host key checking.
#[must_use]
pub fn shell_config() -> ShellConfig {
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

/// Wires box collaborators entirely to doubles.
///
/// `runner` backs both the remote shell and the livery packager, so its
/// scripted responses are consumed in call order across both.
///
/// # Errors
///
/// Returns [`ExecError`] when [`shell_config`] fails validation.
pub fn fake_collaborators(
    provider: &FakeProvider,
    runner: &ScriptedRunner,
    clock: &FakeClock,
    state_root: &Utf8Path,
    bundle_dir: &Utf8Path,
) -> Result<Collaborators<FakeProvider, ScriptedRunner, FakeClock>, ExecError> {
    Ok(Collaborators {
        provider: provider.clone(),
        shell: RemoteShell::new(shell_config(), runner.clone())?,
        deliverer: BootstrapDeliverer::new(TarballPackager::new(
            DEFAULT_TAR_BIN,
            bundle_dir,
            runner.clone(),
        )),
        state: StateStore::new(state_root),
        poller: ReadinessPoller::new(clock.clone()),
        key_pair: KeyPair::new("blimp", "/keys/blimp.pub"),
    })
}
