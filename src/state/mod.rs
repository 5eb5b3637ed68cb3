//! Persisted per-instance records used to reattach to a box.
//!
//! Each instance gets one `<instance-id>.blimp` file under the state
//! directory holding `key: value` lines: `name` and `region` on creation,
//! then `dns` and `internal_dns` once the instance is online.

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::debug;

/// Default state directory, relative to the working directory.
pub const DEFAULT_STATE_DIR: &str = ".blimp.d";

/// Extension of state record files.
pub const STATE_FILE_EXTENSION: &str = "blimp";

const NAME_KEY: &str = "name";
const REGION_KEY: &str = "region";
const DNS_KEY: &str = "dns";
const INTERNAL_DNS_KEY: &str = "internal_dns";

/// Errors raised while reading or writing state records.
#[derive(Debug, Error)]
pub enum StateError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when an instance identifier cannot be used as a file name.
    #[error("instance id '{instance_id}' cannot be used as a state file name")]
    InvalidInstanceId {
        /// Offending identifier.
        instance_id: String,
    },
    /// Raised when a record lacks a required key.
    #[error("state record {path} is missing '{key}'")]
    MissingKey {
        /// Record that failed to parse.
        path: Utf8PathBuf,
        /// Key that was expected.
        key: String,
    },
}

/// Contents of one state file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StateRecord {
    /// Display name of the box.
    pub name: String,
    /// Region the instance lives in.
    pub region: String,
    /// External DNS name, recorded once the instance is online.
    pub dns: Option<String>,
    /// Internal DNS name, recorded once the instance is online.
    pub internal_dns: Option<String>,
}

impl StateRecord {
    /// Builds the record written when a box starts.
    #[must_use]
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            dns: None,
            internal_dns: None,
        }
    }

    /// Renders the record as `key: value` lines.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = format!(
            "{NAME_KEY}: {}\n{REGION_KEY}: {}\n",
            self.name, self.region
        );
        if let Some(dns) = &self.dns {
            rendered.push_str(&format!("{DNS_KEY}: {dns}\n"));
        }
        if let Some(internal_dns) = &self.internal_dns {
            rendered.push_str(&format!("{INTERNAL_DNS_KEY}: {internal_dns}\n"));
        }
        rendered
    }

    /// Parses `key: value` lines. Unknown keys and malformed lines are
    /// ignored; later duplicates win.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::MissingKey`] when `name` or `region` is absent.
    pub fn parse(path: &Utf8Path, contents: &str) -> Result<Self, StateError> {
        let mut values: BTreeMap<&str, &str> = contents
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim(), value.trim()))
            .collect();

        let mut require = |key: &str| {
            values
                .remove(key)
                .map(str::to_owned)
                .ok_or_else(|| StateError::MissingKey {
                    path: path.to_path_buf(),
                    key: key.to_owned(),
                })
        };
        let name = require(NAME_KEY)?;
        let region = require(REGION_KEY)?;

        Ok(Self {
            name,
            region,
            dns: values.remove(DNS_KEY).map(str::to_owned),
            internal_dns: values.remove(INTERNAL_DNS_KEY).map(str::to_owned),
        })
    }
}

/// Directory of state records, one file per instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateStore {
    root: Utf8PathBuf,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}

impl StateStore {
    /// Builds a store rooted at `root`. Nothing touches the disk until a
    /// record is written.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the state directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Creates the state directory if it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] when the directory cannot be created.
    pub fn ensure_dir(&self) -> Result<(), StateError> {
        Dir::create_ambient_dir_all(&self.root, ambient_authority())
            .map_err(|err| io_error(&self.root, &err))
    }

    /// Returns the path of the record for `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidInstanceId`] when the identifier is not a
    /// plain file name.
    pub fn path_for(&self, instance_id: &str) -> Result<Utf8PathBuf, StateError> {
        Ok(self.root.join(file_name_for(instance_id)?))
    }

    /// Writes `record`, replacing any previous contents.
    ///
    /// The record is written to a temporary sibling and renamed into place so
    /// readers never observe a partial file.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the directory cannot be opened or the file
    /// cannot be written.
    pub fn write(&self, instance_id: &str, record: &StateRecord) -> Result<Utf8PathBuf, StateError> {
        let file_name = file_name_for(instance_id)?;
        let path = self.root.join(&file_name);
        let temp_name = format!("{file_name}.tmp");
        let dir = self.open_dir()?;

        dir.write(&temp_name, record.render())
            .map_err(|err| io_error(&self.root.join(&temp_name), &err))?;
        dir.rename(&temp_name, &dir, &file_name)
            .map_err(|err| io_error(&path, &err))?;

        debug!(instance_id, path = %path, "wrote state record");
        Ok(path)
    }

    /// Reads the record for `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the file is missing or malformed.
    pub fn read(&self, instance_id: &str) -> Result<StateRecord, StateError> {
        let file_name = file_name_for(instance_id)?;
        let path = self.root.join(&file_name);
        let contents = self
            .open_dir()?
            .read_to_string(&file_name)
            .map_err(|err| io_error(&path, &err))?;
        StateRecord::parse(&path, &contents)
    }

    /// Records the DNS names of an instance that has come online.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the existing record cannot be read or the
    /// updated one cannot be written.
    pub fn record_online(
        &self,
        instance_id: &str,
        dns: &str,
        internal_dns: &str,
    ) -> Result<StateRecord, StateError> {
        let mut record = self.read(instance_id)?;
        record.dns = Some(dns.to_owned());
        record.internal_dns = Some(internal_dns.to_owned());
        self.write(instance_id, &record)?;
        Ok(record)
    }

    /// Deletes the record for `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] when the file cannot be removed, including
    /// when it does not exist.
    pub fn remove(&self, instance_id: &str) -> Result<(), StateError> {
        let file_name = file_name_for(instance_id)?;
        let path = self.root.join(&file_name);
        self.open_dir()?
            .remove_file(&file_name)
            .map_err(|err| io_error(&path, &err))?;
        debug!(instance_id, path = %path, "removed state record");
        Ok(())
    }

    /// Returns `true` when a record exists for `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the directory cannot be inspected.
    pub fn contains(&self, instance_id: &str) -> Result<bool, StateError> {
        let file_name = file_name_for(instance_id)?;
        match Dir::open_ambient_dir(&self.root, ambient_authority()) {
            Ok(dir) => dir
                .try_exists(&file_name)
                .map_err(|err| io_error(&self.root.join(&file_name), &err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&self.root, &err)),
        }
    }

    /// Lists the instance identifiers with a record, sorted.
    ///
    /// A missing state directory yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] when the directory cannot be read.
    pub fn instance_ids(&self) -> Result<Vec<String>, StateError> {
        let dir = match Dir::open_ambient_dir(&self.root, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&self.root, &err)),
        };

        let suffix = format!(".{STATE_FILE_EXTENSION}");
        let mut ids = Vec::new();
        for item in dir.entries().map_err(|err| io_error(&self.root, &err))? {
            let entry = item.map_err(|err| io_error(&self.root, &err))?;
            let Ok(name) = entry.file_name() else {
                continue;
            };
            if let Some(id) = name.strip_suffix(&suffix)
                && !id.is_empty()
            {
                ids.push(id.to_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn open_dir(&self) -> Result<Dir, StateError> {
        Dir::open_ambient_dir(&self.root, ambient_authority())
            .map_err(|err| io_error(&self.root, &err))
    }
}

fn file_name_for(instance_id: &str) -> Result<String, StateError> {
    let trimmed = instance_id.trim();
    let valid = !trimmed.is_empty()
        && trimmed == instance_id
        && !trimmed.starts_with('.')
        && !trimmed.contains(['/', '\\']);
    if valid {
        Ok(format!("{instance_id}.{STATE_FILE_EXTENSION}"))
    } else {
        Err(StateError::InvalidInstanceId {
            instance_id: instance_id.to_owned(),
        })
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StateError {
    StateError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
