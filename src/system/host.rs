//! Host-backed implementations of the system ports.

use std::io::{self, Write as _};
use std::os::unix::fs::PermissionsExt as _;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::{OpenOptions, Permissions};
use cap_std::{ambient_authority, fs_utf8::Dir};
use shell_escape::unix::escape;
use tracing::debug;

use super::{
    Account, AccountsPort, FilesystemPort, HOST_KEY_DIR, HOST_KEY_PREFIX, NewAccount,
    SystemError, resolve_accounts,
};
use crate::command::{CommandRunner, NamedCommand};

/// Location of the account database.
pub const DEFAULT_PASSWD_PATH: &str = "/etc/passwd";
/// Location of the group database.
pub const DEFAULT_GROUP_PATH: &str = "/etc/group";
/// Shell assigned to SFTP-only accounts.
pub const NOLOGIN_SHELL: &str = "/sbin/nologin";

/// Binaries and paths used by [`ShellAccounts`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountTools {
    /// `adduser` binary.
    pub adduser_bin: String,
    /// `addgroup` binary.
    pub addgroup_bin: String,
    /// `deluser` binary.
    pub deluser_bin: String,
    /// `delgroup` binary.
    pub delgroup_bin: String,
    /// `chpasswd` binary, fed through `sh -c`.
    pub chpasswd_bin: String,
    /// `ssh-keygen` binary.
    pub ssh_keygen_bin: String,
    /// Account database.
    pub passwd_path: Utf8PathBuf,
    /// Group database.
    pub group_path: Utf8PathBuf,
    /// Directory holding the SSH host keys.
    pub ssh_dir: Utf8PathBuf,
}

impl Default for AccountTools {
    fn default() -> Self {
        Self {
            adduser_bin: String::from("adduser"),
            addgroup_bin: String::from("addgroup"),
            deluser_bin: String::from("deluser"),
            delgroup_bin: String::from("delgroup"),
            chpasswd_bin: String::from("chpasswd"),
            ssh_keygen_bin: String::from("ssh-keygen"),
            passwd_path: Utf8PathBuf::from(DEFAULT_PASSWD_PATH),
            group_path: Utf8PathBuf::from(DEFAULT_GROUP_PATH),
            ssh_dir: Utf8PathBuf::from(HOST_KEY_DIR),
        }
    }
}

/// [`AccountsPort`] driving busybox-style account tools.
#[derive(Clone, Debug)]
pub struct ShellAccounts<R: CommandRunner> {
    tools: AccountTools,
    runner: R,
}

impl<R: CommandRunner> ShellAccounts<R> {
    /// Creates the port around a command runner.
    pub const fn new(tools: AccountTools, runner: R) -> Self {
        Self { tools, runner }
    }

    /// Tools and paths in use.
    pub const fn tools(&self) -> &AccountTools {
        &self.tools
    }
}

impl<R: CommandRunner> AccountsPort for ShellAccounts<R> {
    fn list_accounts(&self) -> Result<Vec<Account>, SystemError> {
        let passwd = read_file(&self.tools.passwd_path)?;
        let group = read_file(&self.tools.group_path)?;
        resolve_accounts(&passwd, &group)
    }

    fn create_group(&self, group: &str) -> Result<(), SystemError> {
        NamedCommand::new("create group", &self.tools.addgroup_bin)
            .arg(group)
            .run(&self.runner)?;
        Ok(())
    }

    fn delete_group(&self, group: &str) -> Result<(), SystemError> {
        NamedCommand::new("delete group", &self.tools.delgroup_bin)
            .arg(group)
            .run(&self.runner)?;
        Ok(())
    }

    fn create_account(&self, account: &NewAccount<'_>) -> Result<(), SystemError> {
        NamedCommand::new("add user", &self.tools.adduser_bin)
            .arg("-D")
            .arg("-h")
            .arg(account.home.as_str())
            .arg("-s")
            .arg(account.shell)
            .arg("-G")
            .arg(account.group)
            .arg(account.username)
            .run(&self.runner)?;
        Ok(())
    }

    fn set_password(&self, username: &str, password: &str) -> Result<(), SystemError> {
        let credentials = format!("{username}:{password}");
        let script = format!(
            "printf '%s\\n' {} | {}",
            escape(credentials.into()),
            escape(self.tools.chpasswd_bin.as_str().into()),
        );
        NamedCommand::new("set password", "sh")
            .arg("-c")
            .arg(script)
            .sensitive()
            .run(&self.runner)?;
        Ok(())
    }

    fn delete_account(&self, username: &str) -> Result<(), SystemError> {
        NamedCommand::new("delete user", &self.tools.deluser_bin)
            .arg(username)
            .run(&self.runner)?;
        Ok(())
    }

    fn generate_host_keys(&self) -> Result<(), SystemError> {
        NamedCommand::new("generate host keys", &self.tools.ssh_keygen_bin)
            .arg("-A")
            .run(&self.runner)?;
        Ok(())
    }

    fn remove_host_keys(&self) -> Result<(), SystemError> {
        let ssh_dir = &self.tools.ssh_dir;
        let dir = match Dir::open_ambient_dir(ssh_dir, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(SystemError::io(ssh_dir, &err)),
        };

        let entries = dir.entries().map_err(|err| SystemError::io(ssh_dir, &err))?;
        for entry in entries {
            let entry = entry.map_err(|err| SystemError::io(ssh_dir, &err))?;
            let name = entry
                .file_name()
                .map_err(|err| SystemError::io(ssh_dir, &err))?;
            if !name.starts_with(HOST_KEY_PREFIX) {
                continue;
            }
            dir.remove_file(&name)
                .map_err(|err| SystemError::io(&ssh_dir.join(&name), &err))?;
            debug!(key = %ssh_dir.join(&name), "removed host key");
        }
        Ok(())
    }
}

/// [`FilesystemPort`] over the real filesystem.
///
/// Everything except ownership goes through `cap-std`; `chown` needs a user
/// and group name lookup, so it is delegated to the `chown` binary.
#[derive(Clone, Debug)]
pub struct HostFilesystem<R: CommandRunner> {
    runner: R,
    chown_bin: String,
}

impl<R: CommandRunner> HostFilesystem<R> {
    /// Creates the port, using `chown` from `PATH`.
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            chown_bin: String::from("chown"),
        }
    }
}

impl<R: CommandRunner> FilesystemPort for HostFilesystem<R> {
    fn create_dir_all(&self, path: &Utf8Path) -> Result<(), SystemError> {
        Dir::create_ambient_dir_all(path, ambient_authority())
            .map_err(|err| SystemError::io(path, &err))
    }

    fn replace_file(&self, path: &Utf8Path, contents: &str) -> Result<(), SystemError> {
        let (dir, file_name) = open_parent(path)?;
        match dir.remove_file(file_name) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(SystemError::io(path, &err)),
        }
        dir.write(file_name, contents)
            .map_err(|err| SystemError::io(path, &err))
    }

    fn append_file(&self, path: &Utf8Path, contents: &str) -> Result<(), SystemError> {
        let (dir, file_name) = open_parent(path)?;
        let mut file = dir
            .open_with(file_name, OpenOptions::new().append(true))
            .map_err(|err| SystemError::io(path, &err))?;
        file.write_all(contents.as_bytes())
            .map_err(|err| SystemError::io(path, &err))
    }

    fn remove_file(&self, path: &Utf8Path) -> Result<(), SystemError> {
        let Some(file_name) = path.file_name() else {
            return Ok(());
        };
        let parent = parent_of(path);
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(SystemError::io(parent, &err)),
        };
        match dir.remove_file(file_name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SystemError::io(path, &err)),
        }
    }

    fn exists(&self, path: &Utf8Path) -> Result<bool, SystemError> {
        let parent = parent_of(path);
        let Some(file_name) = path.file_name() else {
            return Ok(Dir::open_ambient_dir(path, ambient_authority()).is_ok());
        };
        match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir
                .try_exists(file_name)
                .map_err(|err| SystemError::io(path, &err)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(SystemError::io(parent, &err)),
        }
    }

    fn set_owner(&self, path: &Utf8Path, user: &str, group: &str) -> Result<(), SystemError> {
        NamedCommand::new("set ownership", &self.chown_bin)
            .arg(format!("{user}:{group}"))
            .arg(path.as_str())
            .run(&self.runner)?;
        Ok(())
    }

    fn set_mode(&self, path: &Utf8Path, mode: u32) -> Result<(), SystemError> {
        let (dir, file_name) = open_parent(path)?;
        let permissions = Permissions::from_std(std::fs::Permissions::from_mode(mode));
        dir.set_permissions(file_name, permissions)
            .map_err(|err| SystemError::io(path, &err))
    }
}

fn parent_of(path: &Utf8Path) -> &Utf8Path {
    path.parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."))
}

fn open_parent(path: &Utf8Path) -> Result<(Dir, &str), SystemError> {
    let file_name = path.file_name().ok_or_else(|| SystemError::Io {
        path: path.to_path_buf(),
        message: String::from("path is missing a file name"),
    })?;
    let parent = parent_of(path);
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| SystemError::io(parent, &err))?;
    Ok((dir, file_name))
}

fn read_file(path: &Utf8Path) -> Result<String, SystemError> {
    let (dir, file_name) = open_parent(path)?;
    dir.read_to_string(file_name)
        .map_err(|err| SystemError::io(path, &err))
}
