//! Provisioning state machine for chrooted SFTP accounts.
//!
//! Provisioning moves through
//! `Unprovisioned → BaselineWritten → GroupCreated → UsersAdded(n) → Ready`.
//! [`Provisioner::reset`] returns to `Unprovisioned` from any state and is
//! best-effort: every teardown step is attempted, failures are logged and
//! collected in a [`ResetReport`] instead of being propagated.
//!
//! Each user gets a root-owned `0755` chroot root (`<home_root>/<user>`)
//! holding a user-owned `0700` writable directory (`<home_root>/<user>/<user>`),
//! which is the split `sshd` requires for `ChrootDirectory`.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::system::{AccountsPort, FilesystemPort, NOLOGIN_SHELL, NewAccount, SystemError};
use crate::users::{UserSpec, is_safe_username};

/// Baseline `sshd_config` written before any per-user block.
pub const BASELINE_SSHD_CONFIG: &str = include_str!("sshd_config");
/// Contents of the provisioned marker file.
pub const MARKER_CONTENTS: &str = "executed";
/// Group tagging every provisioned account.
pub const DEFAULT_USERS_GROUP: &str = "s3ftp-users";
/// Mode required by `sshd` on a chroot root.
pub const CHROOT_MODE: u32 = 0o755;
/// Mode of the writable directory inside the chroot.
pub const USER_DIR_MODE: u32 = 0o700;

const ROOT_OWNER: &str = "root";

/// Paths and names the provisioner derives host state from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionLayout {
    /// Parent of every chroot root.
    pub home_root: Utf8PathBuf,
    /// Full path of the daemon configuration.
    pub sshd_config_path: Utf8PathBuf,
    /// Marker file written once provisioning completes.
    pub marker_path: Utf8PathBuf,
    /// Marker group.
    pub users_group: String,
    /// Login shell of provisioned accounts.
    pub shell: String,
}

impl Default for ProvisionLayout {
    fn default() -> Self {
        Self {
            home_root: Utf8PathBuf::from("/home"),
            sshd_config_path: Utf8PathBuf::from("/etc/ssh/sshd_config"),
            marker_path: Utf8PathBuf::from("/.s3ftp-executed"),
            users_group: String::from(DEFAULT_USERS_GROUP),
            shell: String::from(NOLOGIN_SHELL),
        }
    }
}

impl ProvisionLayout {
    /// Chroot root for `username`.
    #[must_use]
    pub fn chroot_dir(&self, username: &str) -> Utf8PathBuf {
        self.home_root.join(username)
    }

    /// Writable directory inside the chroot root for `username`.
    #[must_use]
    pub fn user_dir(&self, username: &str) -> Utf8PathBuf {
        self.chroot_dir(username).join(username)
    }
}

/// Renders the `Match User` block appended for one account.
#[must_use]
pub fn render_user_block(spec: &UserSpec, chroot_dir: &Utf8Path) -> String {
    let force_command = if spec.read_only {
        "internal-sftp -R"
    } else {
        "internal-sftp"
    };
    format!(
        "\nMatch User {user}\n  ChrootDirectory {chroot_dir}\n  ForceCommand {force_command}\n  AllowTcpForwarding no\n  X11Forwarding no\n",
        user = spec.username,
    )
}

/// Where the provisioner is in its sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisioningState {
    /// Nothing written yet, or freshly reset.
    Unprovisioned,
    /// Baseline `sshd_config` in place.
    BaselineWritten,
    /// Marker group exists.
    GroupCreated,
    /// This many users have been added.
    UsersAdded(usize),
    /// Marker written; the daemon may start.
    Ready,
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unprovisioned => formatter.write_str("unprovisioned"),
            Self::BaselineWritten => formatter.write_str("baseline written"),
            Self::GroupCreated => formatter.write_str("group created"),
            Self::UsersAdded(count) => write!(formatter, "{count} users added"),
            Self::Ready => formatter.write_str("ready"),
        }
    }
}

/// Individual mutation performed while adding a user.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UserStep {
    /// `mkdir -p <home_root>/<user>`.
    CreateChrootDir,
    /// `mkdir -p <home_root>/<user>/<user>`.
    CreateUserDir,
    /// Account creation.
    AddAccount,
    /// Password assignment.
    SetPassword,
    /// `chown root:root` on the chroot root.
    SetChrootOwnership,
    /// `chmod 755` on the chroot root.
    SetChrootPermissions,
    /// `chown <user>:<group>` on the writable directory.
    SetUserDirOwnership,
    /// `chmod 700` on the writable directory.
    SetUserDirPermissions,
    /// Appending the `Match User` block.
    AppendSshdConfig,
}

impl fmt::Display for UserStep {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::CreateChrootDir => "create chroot dir",
            Self::CreateUserDir => "create user dir",
            Self::AddAccount => "add user",
            Self::SetPassword => "set user password",
            Self::SetChrootOwnership => "set chroot dir ownership",
            Self::SetChrootPermissions => "set chroot dir permissions",
            Self::SetUserDirOwnership => "set user dir ownership",
            Self::SetUserDirPermissions => "set user dir permissions",
            Self::AppendSshdConfig => "append sshd_config",
        })
    }
}

/// Stage of [`Provisioner::apply`] that failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProvisionStage {
    /// Host key generation.
    GenerateHostKeys,
    /// Baseline `sshd_config` write.
    WriteBaselineConfig,
    /// Marker group creation.
    CreateMarkerGroup,
    /// A step of adding one user.
    AddUser {
        /// Account being provisioned.
        user: String,
        /// Step that failed.
        step: UserStep,
    },
    /// Marker file write.
    WriteMarker,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GenerateHostKeys => formatter.write_str("generate host keys"),
            Self::WriteBaselineConfig => formatter.write_str("write baseline sshd_config"),
            Self::CreateMarkerGroup => formatter.write_str("create marker group"),
            Self::AddUser { user, step } => write!(formatter, "add user {user} ({step})"),
            Self::WriteMarker => formatter.write_str("write provisioned marker"),
        }
    }
}

/// Errors raised by the provisioning sequence.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Raised when a host mutation fails.
    #[error("provisioning failed at {stage}: {source}")]
    Step {
        /// Stage that failed.
        stage: ProvisionStage,
        /// Underlying port failure.
        #[source]
        source: SystemError,
    },
    /// Raised when an operation is invoked from the wrong state.
    #[error("cannot {operation} while {state}")]
    OutOfOrder {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the provisioner was in.
        state: ProvisioningState,
    },
    /// Raised when a username cannot be used as a single path component.
    #[error("refusing to provision unsafe username {user:?}")]
    UnsafeUsername {
        /// Rejected username.
        user: String,
    },
}

impl ProvisionError {
    /// Stage that failed, if the error came from a host mutation.
    #[must_use]
    pub const fn stage(&self) -> Option<&ProvisionStage> {
        match self {
            Self::Step { stage, .. } => Some(stage),
            Self::OutOfOrder { .. } | Self::UnsafeUsername { .. } => None,
        }
    }
}

/// A reset step that failed and was skipped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResetFailure {
    /// Step name, for example `delete user alice`.
    pub step: String,
    /// Failure message.
    pub message: String,
}

/// Outcome of a best-effort reset.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResetReport {
    /// Accounts deleted from the marker group.
    pub removed_accounts: Vec<String>,
    /// Steps that failed and were skipped.
    pub failures: Vec<ResetFailure>,
}

impl ResetReport {
    fn record(&mut self, step: impl Into<String>, result: Result<(), SystemError>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                let failure = ResetFailure {
                    step: step.into(),
                    message: err.to_string(),
                };
                warn!(step = %failure.step, error = %failure.message, "reset step failed, continuing");
                self.failures.push(failure);
                false
            }
        }
    }
}

/// Drives host state from a list of [`UserSpec`]s.
#[derive(Debug)]
pub struct Provisioner<A, F> {
    accounts: A,
    filesystem: F,
    layout: ProvisionLayout,
    state: ProvisioningState,
}

impl<A: AccountsPort, F: FilesystemPort> Provisioner<A, F> {
    /// Creates a provisioner in the `Unprovisioned` state.
    pub const fn new(accounts: A, filesystem: F, layout: ProvisionLayout) -> Self {
        Self {
            accounts,
            filesystem,
            layout,
            state: ProvisioningState::Unprovisioned,
        }
    }

    /// Current state.
    pub const fn state(&self) -> ProvisioningState {
        self.state
    }

    /// Layout in use.
    pub const fn layout(&self) -> &ProvisionLayout {
        &self.layout
    }

    /// Accounts port, mostly for assertions.
    pub const fn accounts(&self) -> &A {
        &self.accounts
    }

    /// Filesystem port, mostly for assertions.
    pub const fn filesystem(&self) -> &F {
        &self.filesystem
    }

    /// Reports whether a previous run left the provisioned marker behind.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError`] when the marker path cannot be inspected.
    pub fn is_provisioned(&self) -> Result<bool, SystemError> {
        self.filesystem.exists(&self.layout.marker_path)
    }

    /// Tears down everything a previous run may have provisioned.
    ///
    /// Deletes every account whose primary group is the marker group, the
    /// host keys, the marker group, `sshd_config` and the marker file.
    /// Never fails; skipped steps are listed in the returned report.
    pub fn reset(&mut self) -> ResetReport {
        let mut report = ResetReport::default();

        match self.accounts.list_accounts() {
            Ok(accounts) => {
                for account in accounts
                    .into_iter()
                    .filter(|account| account.group == self.layout.users_group)
                {
                    let step = format!("delete user {}", account.username);
                    if report.record(step, self.accounts.delete_account(&account.username)) {
                        report.removed_accounts.push(account.username);
                    }
                }
            }
            Err(err) => {
                report.record("list users", Err(err));
            }
        }

        report.record("delete ssh host keys", self.accounts.remove_host_keys());
        report.record(
            format!("delete group {}", self.layout.users_group),
            self.accounts.delete_group(&self.layout.users_group),
        );
        report.record(
            "delete sshd_config",
            self.filesystem.remove_file(&self.layout.sshd_config_path),
        );
        report.record(
            "delete provisioned marker",
            self.filesystem.remove_file(&self.layout.marker_path),
        );

        self.state = ProvisioningState::Unprovisioned;
        info!(
            removed = report.removed_accounts.len(),
            skipped = report.failures.len(),
            "s3ftp reset executed"
        );
        report
    }

    /// Generates SSH host keys. Allowed from any state.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Step`] at [`ProvisionStage::GenerateHostKeys`].
    pub fn generate_host_keys(&mut self) -> Result<(), ProvisionError> {
        self.accounts
            .generate_host_keys()
            .map_err(|source| ProvisionError::Step {
                stage: ProvisionStage::GenerateHostKeys,
                source,
            })?;
        info!("ssh host keys generated");
        Ok(())
    }

    /// Replaces `sshd_config` with the baseline template.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::OutOfOrder`] unless unprovisioned, and
    /// [`ProvisionError::Step`] when the directory or file cannot be written.
    pub fn write_baseline_ssh_config(&mut self) -> Result<(), ProvisionError> {
        self.require("write the baseline sshd_config", |state| {
            state == ProvisioningState::Unprovisioned
        })?;

        let stage = || ProvisionStage::WriteBaselineConfig;
        if let Some(parent) = self.layout.sshd_config_path.parent() {
            self.filesystem
                .create_dir_all(parent)
                .map_err(|source| ProvisionError::Step {
                    stage: stage(),
                    source,
                })?;
        }
        self.filesystem
            .replace_file(&self.layout.sshd_config_path, BASELINE_SSHD_CONFIG)
            .map_err(|source| ProvisionError::Step {
                stage: stage(),
                source,
            })?;

        self.state = ProvisioningState::BaselineWritten;
        info!(path = %self.layout.sshd_config_path, "baseline sshd_config written");
        Ok(())
    }

    /// Creates the marker group.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::OutOfOrder`] before the baseline is written,
    /// and [`ProvisionError::Step`] when the group cannot be created.
    pub fn create_marker_group(&mut self) -> Result<(), ProvisionError> {
        self.require("create the marker group", |state| {
            state == ProvisioningState::BaselineWritten
        })?;

        self.accounts
            .create_group(&self.layout.users_group)
            .map_err(|source| ProvisionError::Step {
                stage: ProvisionStage::CreateMarkerGroup,
                source,
            })?;

        self.state = ProvisioningState::GroupCreated;
        info!(group = %self.layout.users_group, "marker group created");
        Ok(())
    }

    /// Provisions one chrooted account and appends its `Match User` block.
    ///
    /// Partial state is left in place when a step fails; the next reset
    /// clears it.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::OutOfOrder`] before the marker group exists,
    /// [`ProvisionError::UnsafeUsername`] for a name that is not a single
    /// path component, and [`ProvisionError::Step`] naming the user and the
    /// failed [`UserStep`].
    pub fn add_user(&mut self, spec: &UserSpec) -> Result<(), ProvisionError> {
        let added = match self.state {
            ProvisioningState::GroupCreated => 0,
            ProvisioningState::UsersAdded(count) => count,
            state => {
                return Err(ProvisionError::OutOfOrder {
                    operation: "add a user",
                    state,
                });
            }
        };

        let user = spec.username.as_str();
        if !is_safe_username(user) {
            return Err(ProvisionError::UnsafeUsername {
                user: user.to_owned(),
            });
        }
        let group = self.layout.users_group.as_str();
        let chroot_dir = self.layout.chroot_dir(user);
        let user_dir = self.layout.user_dir(user);
        let fail = |step: UserStep| {
            move |source: SystemError| ProvisionError::Step {
                stage: ProvisionStage::AddUser {
                    user: user.to_owned(),
                    step,
                },
                source,
            }
        };

        self.filesystem
            .create_dir_all(&chroot_dir)
            .map_err(fail(UserStep::CreateChrootDir))?;
        self.filesystem
            .create_dir_all(&user_dir)
            .map_err(fail(UserStep::CreateUserDir))?;
        self.accounts
            .create_account(&NewAccount {
                username: user,
                home: &chroot_dir,
                group,
                shell: &self.layout.shell,
            })
            .map_err(fail(UserStep::AddAccount))?;
        self.accounts
            .set_password(user, &spec.password)
            .map_err(fail(UserStep::SetPassword))?;
        self.filesystem
            .set_owner(&chroot_dir, ROOT_OWNER, ROOT_OWNER)
            .map_err(fail(UserStep::SetChrootOwnership))?;
        self.filesystem
            .set_mode(&chroot_dir, CHROOT_MODE)
            .map_err(fail(UserStep::SetChrootPermissions))?;
        self.filesystem
            .set_owner(&user_dir, user, group)
            .map_err(fail(UserStep::SetUserDirOwnership))?;
        self.filesystem
            .set_mode(&user_dir, USER_DIR_MODE)
            .map_err(fail(UserStep::SetUserDirPermissions))?;
        self.filesystem
            .append_file(
                &self.layout.sshd_config_path,
                &render_user_block(spec, &chroot_dir),
            )
            .map_err(fail(UserStep::AppendSshdConfig))?;

        self.state = ProvisioningState::UsersAdded(added + 1);
        info!(user, access = spec.access_label(), "user added");
        Ok(())
    }

    /// Writes the marker file and moves to `Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::OutOfOrder`] before the marker group exists,
    /// and [`ProvisionError::Step`] when the marker cannot be written.
    pub fn mark_ready(&mut self) -> Result<(), ProvisionError> {
        self.require("mark provisioning complete", |state| {
            matches!(
                state,
                ProvisioningState::GroupCreated | ProvisioningState::UsersAdded(_)
            )
        })?;

        self.filesystem
            .replace_file(&self.layout.marker_path, MARKER_CONTENTS)
            .map_err(|source| ProvisionError::Step {
                stage: ProvisionStage::WriteMarker,
                source,
            })?;

        self.state = ProvisioningState::Ready;
        debug!(path = %self.layout.marker_path, "provisioned marker written");
        Ok(())
    }

    /// Runs host keys, baseline, marker group, then every user in order,
    /// and finally writes the marker. Stops at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProvisionError`] encountered.
    pub fn apply(&mut self, specs: &[UserSpec]) -> Result<(), ProvisionError> {
        self.generate_host_keys()?;
        self.write_baseline_ssh_config()?;
        self.create_marker_group()?;
        for spec in specs {
            self.add_user(spec)?;
        }
        self.mark_ready()
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: impl FnOnce(ProvisioningState) -> bool,
    ) -> Result<(), ProvisionError> {
        if allowed(self.state) {
            Ok(())
        } else {
            Err(ProvisionError::OutOfOrder {
                operation,
                state: self.state,
            })
        }
    }
}
