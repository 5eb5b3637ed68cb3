//! Command runner abstraction shared by remote shell and provider calls.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};

use super::ExecError;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status, `unknown` when the process was killed.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` as a child process and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError>;

    /// Replaces the current process image with `program`.
    ///
    /// On success this never returns; the returned error describes why the
    /// replacement could not happen.
    fn exec(&self, program: &str, args: &[OsString]) -> ExecError;
}

/// Real command runner that captures output without echoing it.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| spawn_error(program, &err))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn exec(&self, program: &str, args: &[OsString]) -> ExecError {
        replace_process(program, args)
    }
}

/// Command runner that forwards child output to the terminal as it arrives
/// while also capturing it.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamingCommandRunner;

impl CommandRunner for StreamingCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;

        let stdout = child
            .stdout
            .take()
            .map(|pipe| thread::spawn(move || tee(pipe, io::stdout())));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| thread::spawn(move || tee(pipe, io::stderr())));

        let status = child.wait().map_err(|err| spawn_error(program, &err))?;

        Ok(CommandOutput {
            code: status.code(),
            stdout: join_capture(stdout),
            stderr: join_capture(stderr),
        })
    }

    fn exec(&self, program: &str, args: &[OsString]) -> ExecError {
        replace_process(program, args)
    }
}

fn tee<R: Read, W: Write>(mut source: R, mut sink: W) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut buffer = [0_u8; 8192];
    loop {
        match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => {
                let chunk = buffer.get(..read).unwrap_or_default();
                sink.write_all(chunk).ok();
                sink.flush().ok();
                captured.extend_from_slice(chunk);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
    captured
}

fn join_capture(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|reader| reader.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(unix)]
fn replace_process(program: &str, args: &[OsString]) -> ExecError {
    use std::os::unix::process::CommandExt;

    let err = Command::new(program).args(args).exec();
    spawn_error(program, &err)
}

#[cfg(not(unix))]
fn replace_process(program: &str, args: &[OsString]) -> ExecError {
    match Command::new(program).args(args).status() {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(err) => spawn_error(program, &err),
    }
}

fn spawn_error(program: &str, err: &io::Error) -> ExecError {
    ExecError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}
