//! Command-line interface definitions for the `blimp` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `blimp` binary.
#[derive(Debug, Parser)]
#[command(
    name = "blimp",
    about = "Provision, bootstrap, and tear down a disposable cloud instance",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a box, wait for it to come online, and optionally bootstrap it.
    #[command(name = "start", about = "Create a box and wait for it to come online")]
    Start(StartCommand),
    /// List boxes recorded in the state directory.
    #[command(name = "list", about = "List boxes recorded in the state directory")]
    List,
    /// Open an SSH session on a box, or run a command there.
    #[command(name = "ssh", about = "Open an SSH session on a box")]
    Ssh(SshCommand),
    /// Copy a local file into the login user's home directory on a box.
    #[command(name = "scp", about = "Copy a file to a box")]
    Scp(ScpCommand),
    /// Power a box off, keeping its disks.
    #[command(name = "stop", about = "Power a box off")]
    Stop(InstanceArg),
    /// Power a stopped box back on.
    #[command(name = "resume", about = "Power a stopped box back on")]
    Resume(InstanceArg),
    /// Terminate a box and forget it.
    #[command(name = "destroy", about = "Terminate a box and delete its state file")]
    Destroy(InstanceArg),
}

/// Arguments for the `blimp start` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct StartCommand {
    /// Display name for the box, also used as its `Name` tag.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Extra tag applied to the instance; repeatable.
    #[arg(long = "tag", value_name = "KEY=VALUE")]
    pub(crate) tags: Vec<String>,
    /// Deliver the current directory as a livery and run its `bootstrap.sh`.
    #[arg(long)]
    pub(crate) bootstrap: bool,
}

/// A box identified by its instance id.
#[derive(Debug, Parser)]
pub(crate) struct InstanceArg {
    /// Instance id, as printed by `blimp start` or `blimp list`.
    #[arg(value_name = "INSTANCE_ID")]
    pub(crate) instance_id: String,
}

/// Arguments for the `blimp ssh` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct SshCommand {
    /// Instance id of the box.
    #[arg(value_name = "INSTANCE_ID")]
    pub(crate) instance_id: String,
    /// Run this command and wait for it instead of opening a session (use --
    /// to separate flags).
    #[arg(trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}

/// Arguments for the `blimp scp` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ScpCommand {
    /// Instance id of the box.
    #[arg(value_name = "INSTANCE_ID")]
    pub(crate) instance_id: String,
    /// Local file to copy.
    #[arg(value_name = "FILE")]
    pub(crate) file: String,
}
