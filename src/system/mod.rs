//! Capability ports over the host's account database and filesystem.
//!
//! The provisioning state machine never touches the OS directly. It drives
//! an [`AccountsPort`] (users, groups, passwords, SSH host keys) and a
//! [`FilesystemPort`] (directories, config files, ownership, modes), so the
//! same sequencing can run against the real host or the in-memory fakes in
//! [`crate::test_support`].

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::command::CommandError;

mod host;

pub use host::{
    AccountTools, DEFAULT_GROUP_PATH, DEFAULT_PASSWD_PATH, HostFilesystem, NOLOGIN_SHELL,
    ShellAccounts,
};

/// Directory `ssh-keygen -A` writes host keys into. The baseline
/// `sshd_config` names its `HostKey` files here.
pub const HOST_KEY_DIR: &str = "/etc/ssh";

/// Prefix shared by every host key file generated by `ssh-keygen -A`.
pub const HOST_KEY_PREFIX: &str = "ssh_host_";

/// An account as listed from the account database.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Account {
    /// Login name.
    pub username: String,
    /// Home directory.
    pub home: Utf8PathBuf,
    /// Name of the primary group.
    pub group: String,
}

/// Parameters for a new chrooted, shell-less account.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NewAccount<'a> {
    /// Login name.
    pub username: &'a str,
    /// Home directory, which doubles as the chroot root.
    pub home: &'a Utf8Path,
    /// Primary group.
    pub group: &'a str,
    /// Login shell, normally a `nologin` binary.
    pub shell: &'a str,
}

/// Errors raised by the host ports.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SystemError {
    /// Raised when an underlying system command fails.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Raised when filesystem access fails.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a primary group id cannot be resolved to a name.
    #[error("group with GID {gid} not found")]
    UnknownGroup {
        /// Numeric group id from the passwd entry.
        gid: String,
    },
    /// Raised by test doubles to simulate a rejected operation.
    #[error("{operation} rejected: {message}")]
    Rejected {
        /// Operation that was rejected.
        operation: String,
        /// Reason reported by the port.
        message: String,
    },
}

impl SystemError {
    pub(crate) fn io(path: &Utf8Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Account database operations needed by provisioning and reset.
pub trait AccountsPort {
    /// Lists every account with its primary group resolved to a name.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] when the database cannot be read or a group id
    /// cannot be resolved.
    fn list_accounts(&self) -> Result<Vec<Account>, SystemError>;

    /// Creates a group.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] when the group cannot be created, for example
    /// because it already exists.
    fn create_group(&self, group: &str) -> Result<(), SystemError>;

    /// Deletes a group.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] when the group cannot be removed.
    fn delete_group(&self, group: &str) -> Result<(), SystemError>;

    /// Creates a shell-less account bound to a primary group.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] when the account cannot be created.
    fn create_account(&self, account: &NewAccount<'_>) -> Result<(), SystemError>;

    /// Sets the account password.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] when the password cannot be applied.
    fn set_password(&self, username: &str, password: &str) -> Result<(), SystemError>;

    /// Deletes an account.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] when the account cannot be removed.
    fn delete_account(&self, username: &str) -> Result<(), SystemError>;

    /// Generates any missing SSH host keys.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] when key generation fails.
    fn generate_host_keys(&self) -> Result<(), SystemError>;

    /// Removes previously generated SSH host keys.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] when the key files cannot be removed.
    fn remove_host_keys(&self) -> Result<(), SystemError>;
}

/// Filesystem operations needed by provisioning and reset.
pub trait FilesystemPort {
    /// Creates a directory and all of its parents.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Io`] when creation fails.
    fn create_dir_all(&self, path: &Utf8Path) -> Result<(), SystemError>;

    /// Replaces `path` with `contents`, removing any previous file first.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Io`] when the file cannot be written.
    fn replace_file(&self, path: &Utf8Path, contents: &str) -> Result<(), SystemError>;

    /// Appends `contents` to an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Io`] when the file is missing or not writable.
    fn append_file(&self, path: &Utf8Path, contents: &str) -> Result<(), SystemError>;

    /// Removes a file; a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Io`] when removal fails for another reason.
    fn remove_file(&self, path: &Utf8Path) -> Result<(), SystemError>;

    /// Reports whether `path` exists.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Io`] when existence cannot be determined.
    fn exists(&self, path: &Utf8Path) -> Result<bool, SystemError>;

    /// Changes the owner and group of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] when ownership cannot be changed.
    fn set_owner(&self, path: &Utf8Path, user: &str, group: &str) -> Result<(), SystemError>;

    /// Sets the permission bits of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Io`] when the mode cannot be applied.
    fn set_mode(&self, path: &Utf8Path, mode: u32) -> Result<(), SystemError>;
}

/// A parsed `/etc/passwd` line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PasswdEntry {
    /// Login name.
    pub username: String,
    /// Primary group id.
    pub gid: String,
    /// Home directory.
    pub home: Utf8PathBuf,
}

/// Parses `/etc/passwd` content, skipping lines with fewer than 7 fields.
#[must_use]
pub fn parse_passwd(contents: &str) -> Vec<PasswdEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            match fields.as_slice() {
                [username, _, _, gid, _, home, _, ..] => Some(PasswdEntry {
                    username: (*username).to_owned(),
                    gid: (*gid).to_owned(),
                    home: Utf8PathBuf::from(*home),
                }),
                _ => None,
            }
        })
        .collect()
}

/// Finds the group name for `gid` in `/etc/group` content.
#[must_use]
pub fn group_name_for_gid<'a>(contents: &'a str, gid: &str) -> Option<&'a str> {
    contents.lines().find_map(|line| {
        let mut fields = line.split(':');
        let name = fields.next()?;
        let _password = fields.next()?;
        let line_gid = fields.next()?;
        (line_gid == gid).then_some(name)
    })
}

/// Joins passwd entries with group names.
///
/// # Errors
///
/// Returns [`SystemError::UnknownGroup`] when a primary group id has no
/// matching `/etc/group` line.
pub fn resolve_accounts(passwd: &str, group: &str) -> Result<Vec<Account>, SystemError> {
    parse_passwd(passwd)
        .into_iter()
        .map(|entry| {
            let name = group_name_for_gid(group, &entry.gid).ok_or_else(|| {
                SystemError::UnknownGroup {
                    gid: entry.gid.clone(),
                }
            })?;
            Ok(Account {
                username: entry.username,
                home: entry.home,
                group: name.to_owned(),
            })
        })
        .collect()
}
