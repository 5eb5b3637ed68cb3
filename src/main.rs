//! Binary entry point for the Blimp CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use blimp::{
    AwsCliProvider, AwsProviderError, BlimpConfig, BootstrapDeliverer, BoxError, CloudBox,
    Collaborators, ExecMode, InstanceStatus, LiverySource, ProcessCommandRunner,
    ReadinessPoller, RemoteShell, ShellConfig, StreamingCommandRunner, TarballPackager,
};

mod cli;

use cli::{Cli, InstanceArg, ScpCommand, SshCommand, StartCommand};

/// Environment variable holding the `tracing` filter directive.
const LOG_ENV: &str = "BLIMP_LOG";

type Provider = AwsCliProvider<ProcessCommandRunner>;
type LiveBox = CloudBox<Provider, StreamingCommandRunner>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("provider error: {0}")]
    Provider(#[from] AwsProviderError),
    #[error(transparent)]
    Lifecycle(#[from] BoxError<AwsProviderError>),
    #[error("no box with instance id {instance_id} is known to the provider")]
    UnknownBox { instance_id: String },
    #[error("invalid tag '{0}': expected KEY=VALUE")]
    InvalidTag(String),
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    #[error("remote command terminated without an exit status")]
    MissingExitCode,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Start(command) => start(&command),
        Cli::List => list(),
        Cli::Ssh(command) => ssh(&command),
        Cli::Scp(command) => scp(&command),
        Cli::Stop(target) => {
            reattach(&target)?.stop()?;
            Ok(0)
        }
        Cli::Resume(target) => {
            reattach(&target)?.resume()?;
            Ok(0)
        }
        Cli::Destroy(target) => {
            reattach(&target)?.destroy()?;
            Ok(0)
        }
    }
}

fn load_config() -> Result<BlimpConfig, CliError> {
    let config =
        BlimpConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    Ok(config)
}

fn collaborators(
    config: &BlimpConfig,
) -> Result<Collaborators<Provider, StreamingCommandRunner>, CliError> {
    let shell_config =
        ShellConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let shell = RemoteShell::with_streaming_runner(shell_config)
        .map_err(|err| CliError::Config(err.to_string()))?;
    let bundle_dir = config
        .bundle_dir()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let mut poller = ReadinessPoller::default();
    if let Some(timeout) = config.readiness_timeout() {
        poller = poller.with_hard_timeout(timeout);
    }

    Ok(Collaborators {
        provider: AwsCliProvider::with_process_runner(&config.aws_bin)?,
        shell,
        deliverer: BootstrapDeliverer::new(TarballPackager::new(
            &config.tar_bin,
            bundle_dir,
            StreamingCommandRunner,
        )),
        state: config.state_store(),
        poller,
        key_pair: config.key_pair(),
    })
}

fn reattach(target: &InstanceArg) -> Result<LiveBox, CliError> {
    let config = load_config()?;
    let parts = collaborators(&config)?;
    CloudBox::from_instance_id(&target.instance_id, config.box_options(None), parts)?.ok_or_else(
        || CliError::UnknownBox {
            instance_id: target.instance_id.clone(),
        },
    )
}

fn start(command: &StartCommand) -> Result<i32, CliError> {
    let tags = command
        .tags
        .iter()
        .map(|raw| parse_tag(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let config = load_config()?;
    let mut options = config.box_options(command.name.as_deref());
    options.tags.extend(tags);
    if command.bootstrap {
        options.livery = Some(LiverySource::CurrentDirectory);
    }

    let mut cloud_box: LiveBox = CloudBox::new(options, collaborators(&config)?)?;
    if cloud_box.options().security_group.is_some() {
        cloud_box.validate()?;
    }
    let instance_id = cloud_box.start()?.id.clone();
    writeln!(io::stderr(), "started {instance_id}; waiting for it to run").ok();

    cloud_box.wait_for_state(&InstanceStatus::Running, || {
        write!(io::stderr(), ".").ok();
    })?;
    writeln!(io::stderr()).ok();
    let record = cloud_box.mark_online()?;
    cloud_box.bootstrap(&mut io::stderr())?;

    writeln!(
        io::stdout(),
        "{instance_id}\t{}",
        record.dns.unwrap_or_default()
    )
    .ok();
    Ok(0)
}

fn list() -> Result<i32, CliError> {
    let config = load_config()?;
    let store = config.state_store();
    let ids = store
        .instance_ids()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let mut stdout = io::stdout();
    for id in ids {
        let record = store
            .read(&id)
            .map_err(|err| CliError::Config(err.to_string()))?;
        writeln!(
            stdout,
            "{id}\t{}\t{}\t{}",
            record.name,
            record.region,
            record.dns.as_deref().unwrap_or("-")
        )
        .ok();
    }
    Ok(0)
}

fn ssh(command: &SshCommand) -> Result<i32, CliError> {
    validate_command_args(&command.command)?;
    let cloud_box = reattach(&InstanceArg {
        instance_id: command.instance_id.clone(),
    })?;

    if command.command.is_empty() {
        // Only returns when ssh could not be exec'd.
        cloud_box.ssh_into(&[], ExecMode::ReplaceProcess)?;
        return Err(CliError::MissingExitCode);
    }

    let remote_command = render_remote_command(&command.command);
    let output = cloud_box.ssh_into(&[remote_command], ExecMode::RunAndWait)?;
    output.code.ok_or(CliError::MissingExitCode)
}

fn scp(command: &ScpCommand) -> Result<i32, CliError> {
    let cloud_box = reattach(&InstanceArg {
        instance_id: command.instance_id.clone(),
    })?;
    let file = Utf8PathBuf::from(&command.file);
    let output = cloud_box.scp_file(&file, ExecMode::RunAndWait)?;
    output.code.ok_or(CliError::MissingExitCode)
}

fn parse_tag(raw: &str) -> Result<(String, String), CliError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.trim().to_owned()))
        }
        _ => Err(CliError::InvalidTag(raw.to_owned())),
    }
}

fn render_remote_command(args: &[String]) -> String {
    args.iter()
        .map(|arg| escape(arg.as_str().into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn validate_command_args(args: &[String]) -> Result<(), CliError> {
    for arg in args {
        if arg
            .chars()
            .any(|ch| matches!(ch, '\u{0000}'..='\u{001F}' | '\u{007F}'))
        {
            return Err(CliError::InvalidCommand(String::from(concat!(
                "command arguments must not contain control characters (ASCII ",
                "0x00-0x1F or 0x7F, e.g. newline, carriage return, tab, NUL)"
            ))));
        }
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
