//! Livery packaging and bootstrap delivery.
//!
//! A livery is a local directory containing a `bootstrap.sh` script. It is
//! packed into a gzipped tarball, copied into the login user's home directory
//! on the box, unpacked there, and the script is run with `sudo`.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::info;

use crate::exec::{CommandOutput, CommandRunner, ExecError, ExecMode, RemoteShell, RemoteTarget};

/// Script run from the root of the unpacked livery.
pub const BOOTSTRAP_SCRIPT: &str = "bootstrap.sh";

/// Suffix appended to the livery directory name to form the bundle name.
pub const BUNDLE_SUFFIX: &str = ".tar.gz";

/// Default `tar` executable.
pub const DEFAULT_TAR_BIN: &str = "tar";

/// Where the livery comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LiverySource {
    /// The process working directory at bootstrap time.
    CurrentDirectory,
    /// An explicit directory.
    Directory(Utf8PathBuf),
}

impl LiverySource {
    /// Resolves the source to a concrete directory.
    ///
    /// # Errors
    ///
    /// Returns [`LiveryError::InvalidSource`] when the working directory
    /// cannot be determined or is not valid UTF-8.
    pub fn resolve(&self) -> Result<Utf8PathBuf, LiveryError> {
        match self {
            Self::Directory(path) => Ok(path.clone()),
            Self::CurrentDirectory => {
                let cwd = std::env::current_dir().map_err(|err| LiveryError::InvalidSource {
                    path: Utf8PathBuf::from("."),
                    message: err.to_string(),
                })?;
                Utf8PathBuf::from_path_buf(cwd).map_err(|path| LiveryError::InvalidSource {
                    path: Utf8PathBuf::from(path.to_string_lossy().into_owned()),
                    message: String::from("working directory is not valid UTF-8"),
                })
            }
        }
    }
}

/// Errors raised while packaging or delivering a livery.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LiveryError {
    /// Raised when the livery source is not a usable directory.
    #[error("livery source {path} is not usable: {message}")]
    InvalidSource {
        /// Offending path.
        path: Utf8PathBuf,
        /// Why it was rejected.
        message: String,
    },
    /// Raised when the bundle output directory cannot be prepared.
    #[error("failed to prepare bundle directory {path}: {message}")]
    BundleDir {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when `tar` exits non-zero.
    #[error("packaging {path} failed with status {status_text}: {stderr}")]
    Package {
        /// Directory being packaged.
        path: Utf8PathBuf,
        /// Human readable exit status.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
    /// Raised when copying the bundle to the box fails.
    #[error("copying {bundle} to {target} failed with status {status_text}: {stderr}")]
    Transfer {
        /// Bundle file name.
        bundle: String,
        /// Remote target.
        target: String,
        /// Human readable exit status.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
    /// Raised when the remote bootstrap script fails.
    #[error("bootstrap script on {target} failed with status {status_text}: {stderr}")]
    Script {
        /// Remote target.
        target: String,
        /// Human readable exit status.
        status_text: String,
        /// Captured stderr.
        stderr: String,
    },
    /// Raised when a command cannot be started.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// A packaged livery ready for transfer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bundle {
    /// Local path of the tarball.
    pub path: Utf8PathBuf,
    /// Tarball file name, as it lands in the remote home directory.
    pub file_name: String,
    /// Name of the top-level directory inside the tarball.
    pub directory_name: String,
}

/// Packs a directory into `<output_dir>/<dir-name>.tar.gz` using `tar`.
#[derive(Clone, Debug)]
pub struct TarballPackager<R: CommandRunner> {
    tar_bin: String,
    output_dir: Utf8PathBuf,
    runner: R,
}

impl<R: CommandRunner> TarballPackager<R> {
    /// Creates a packager writing bundles into `output_dir`.
    #[must_use]
    pub fn new(tar_bin: impl Into<String>, output_dir: impl Into<Utf8PathBuf>, runner: R) -> Self {
        Self {
            tar_bin: tar_bin.into(),
            output_dir: output_dir.into(),
            runner,
        }
    }

    /// Packages `source` and returns the resulting bundle.
    ///
    /// # Errors
    ///
    /// Returns [`LiveryError`] when `source` is not a directory, the output
    /// directory cannot be created, or `tar` fails.
    pub fn package(&self, source: &Utf8Path) -> Result<Bundle, LiveryError> {
        if !source.is_dir() {
            return Err(LiveryError::InvalidSource {
                path: source.to_path_buf(),
                message: String::from("not a directory"),
            });
        }
        let (parent, directory_name) = split_source(source)?;

        Dir::create_ambient_dir_all(&self.output_dir, ambient_authority()).map_err(|err| {
            LiveryError::BundleDir {
                path: self.output_dir.clone(),
                message: err.to_string(),
            }
        })?;

        let file_name = format!("{directory_name}{BUNDLE_SUFFIX}");
        let path = self.output_dir.join(&file_name);
        let args = [
            OsString::from("-czf"),
            OsString::from(path.as_str()),
            OsString::from("-C"),
            OsString::from(parent.as_str()),
            OsString::from(&directory_name),
        ];
        let output = self.runner.run(&self.tar_bin, &args)?;
        if !output.is_success() {
            return Err(LiveryError::Package {
                path: source.to_path_buf(),
                status_text: output.status_text(),
                stderr: output.stderr,
            });
        }

        info!(source = %source, bundle = %path, "packaged livery");
        Ok(Bundle {
            path,
            file_name,
            directory_name,
        })
    }
}

fn split_source(source: &Utf8Path) -> Result<(Utf8PathBuf, String), LiveryError> {
    let absolute = if source.is_absolute() {
        source.to_path_buf()
    } else {
        let cwd = LiverySource::CurrentDirectory.resolve()?;
        cwd.join(source)
    };
    let name = absolute
        .file_name()
        .filter(|name| *name != "..")
        .ok_or_else(|| LiveryError::InvalidSource {
            path: source.to_path_buf(),
            message: String::from("cannot determine the directory name"),
        })?
        .to_owned();
    let parent = absolute
        .parent()
        .map_or_else(|| Utf8PathBuf::from("/"), Utf8Path::to_path_buf);
    Ok((parent, name))
}

/// Builds the remote command that unpacks `bundle` and runs the bootstrap
/// script with elevated privilege.
#[must_use]
pub fn bootstrap_command(bundle: &Bundle) -> String {
    let file_name = escape(bundle.file_name.as_str().into());
    let directory = escape(bundle.directory_name.as_str().into());
    format!("tar -zxf {file_name} && cd {directory} && sudo ./{BOOTSTRAP_SCRIPT}")
}

/// Packages a livery, copies it to a box, and runs its bootstrap script.
#[derive(Clone, Debug)]
pub struct BootstrapDeliverer<R: CommandRunner> {
    packager: TarballPackager<R>,
}

impl<R: CommandRunner> BootstrapDeliverer<R> {
    /// Creates a deliverer around `packager`.
    #[must_use]
    pub const fn new(packager: TarballPackager<R>) -> Self {
        Self { packager }
    }

    /// Delivers the livery at `source` to `target` and bootstraps it.
    ///
    /// No partial-bootstrap recovery is attempted; re-running is safe only if
    /// the remote script is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`LiveryError`] when packaging, transfer, or the remote
    /// script fails.
    pub fn deliver<S: CommandRunner>(
        &self,
        shell: &RemoteShell<S>,
        target: &RemoteTarget,
        source: &Utf8Path,
    ) -> Result<Bundle, LiveryError> {
        let bundle = self.packager.package(source)?;

        let copied = shell.scp(target, &bundle.path, ExecMode::RunAndWait)?;
        ensure_success(copied, |output| LiveryError::Transfer {
            bundle: bundle.file_name.clone(),
            target: target.to_string(),
            status_text: output.status_text(),
            stderr: output.stderr,
        })?;

        info!(target = %target, bundle = %bundle.file_name, "bootstrapping the livery");
        let command = bootstrap_command(&bundle);
        let ran = shell.ssh(target, &[command], ExecMode::RunAndWait)?;
        ensure_success(ran, |output| LiveryError::Script {
            target: target.to_string(),
            status_text: output.status_text(),
            stderr: output.stderr,
        })?;

        Ok(bundle)
    }
}

fn ensure_success(
    output: CommandOutput,
    on_failure: impl FnOnce(CommandOutput) -> LiveryError,
) -> Result<(), LiveryError> {
    if output.is_success() {
        Ok(())
    } else {
        Err(on_failure(output))
    }
}
