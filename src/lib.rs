//! Core library for s3ftp, a chroot-jailed SFTP front end whose files are
//! mirrored to an S3 bucket.
//!
//! Startup parses a declarative user list, rebuilds the host's accounts and
//! `sshd_config` through the [`provision::Provisioner`] state machine, then
//! supervises the SSH daemon next to a periodic `rclone` sync loop. Host
//! mutations go through the ports in [`system`] so everything above them
//! runs against in-memory doubles in tests.

pub mod app;
pub mod command;
pub mod config;
pub mod mirror;
pub mod provision;
pub mod schedule;
pub mod supervise;
pub mod system;
pub mod test_support;
pub mod users;

pub use app::{AppError, PrepareOutcome};
pub use command::{
    CommandError, CommandOutput, CommandRunner, NamedCommand, ProcessCommandRunner,
    ProcessLauncher, TokioProcessLauncher,
};
pub use config::{ConfigError, RuntimeConfig, S3Config, Settings, SftpConfig, SyncSettings};
pub use mirror::{Mirror, MirrorError, RcloneConf, RcloneMirror, RcloneTarget, SyncMode};
pub use provision::{
    ProvisionError, ProvisionLayout, ProvisionStage, Provisioner, ProvisioningState, ResetReport,
};
pub use schedule::{Cadence, CadenceError, SchedulerError, SyncScheduler};
pub use supervise::{SshDaemon, SshdError, SupervisorError, supervise};
pub use system::{AccountsPort, FilesystemPort, HostFilesystem, ShellAccounts, SystemError};
pub use users::{UserSpec, UserSpecError, parse_users};
